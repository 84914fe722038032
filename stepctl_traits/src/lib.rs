//! Hardware seams for the closed-loop stepper control core.
//!
//! Everything the control core touches outside its own state goes through
//! these traits: the absolute encoder (`AngleSource`), the driver's ramp
//! generator (`MotionActuator`), tuning persistence (`ParamStore`) and time
//! (`Clock`). Implementations live in `stepctl_hardware` or in tests.

pub mod clock;
pub mod status;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use status::{AngleSample, Direction, DriverStatus, SampleStatus};

/// Error type used across every trait boundary.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Absolute shaft-angle encoder.
pub trait AngleSource {
    /// Read one 16-bit angle plus its status byte.
    fn capture_sample(&mut self) -> Result<AngleSample, BoxError>;

    /// Whether the sensor (and its magnet) is present and answering.
    fn detect_presence(&mut self) -> bool;
}

/// Stepper driver ramp generator.
///
/// Positions are in microsteps, velocities in the driver's native register
/// units. The control core never interprets register contents passed through
/// `write_raw_register` / `read_raw_register`.
pub trait MotionActuator {
    /// Positioning mode: ramp to an absolute microstep position.
    fn set_target_position(&mut self, position: i32) -> Result<(), BoxError>;

    /// Velocity mode: ramp to `velocity` in `direction`.
    fn set_target_velocity(&mut self, velocity: u32, direction: Direction)
    -> Result<(), BoxError>;

    /// Cruise velocity used by positioning moves.
    fn set_velocity_limit(&mut self, velocity: u32) -> Result<(), BoxError>;

    fn set_acceleration_limits(&mut self, accel: u32, decel: u32) -> Result<(), BoxError>;

    /// Overwrite the driver's internal actual position without moving.
    fn set_actual_position(&mut self, position: i32) -> Result<(), BoxError>;

    fn position(&mut self) -> Result<i32, BoxError>;

    /// Signed actual velocity in register units.
    fn velocity(&mut self) -> Result<i32, BoxError>;

    fn status(&mut self) -> Result<DriverStatus, BoxError>;

    /// Run and hold current, in driver scale (0..=31).
    fn set_currents(&mut self, run: u8, hold: u8) -> Result<(), BoxError>;

    fn write_raw_register(&mut self, address: u8, value: u32) -> Result<(), BoxError>;
    fn read_raw_register(&mut self, address: u8) -> Result<u32, BoxError>;
}

/// Persisted tuning parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TuningRecord {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    /// Run current (0..=31).
    pub current: u8,
    /// Hold current (0..=31).
    pub hold_current: u8,
    pub invert_direction: bool,
}

impl Default for TuningRecord {
    fn default() -> Self {
        Self {
            kp: 20.0,
            ki: 0.2,
            kd: 5.0,
            current: 16,
            hold_current: 16,
            invert_direction: false,
        }
    }
}

/// Durable storage for a `TuningRecord`.
pub trait ParamStore {
    /// `Ok(None)` when nothing valid is stored (absent or failed checksum).
    fn load(&mut self) -> Result<Option<TuningRecord>, BoxError>;
    fn save(&mut self, record: &TuningRecord) -> Result<(), BoxError>;
}

impl<T: AngleSource + ?Sized> AngleSource for Box<T> {
    fn capture_sample(&mut self) -> Result<AngleSample, BoxError> {
        (**self).capture_sample()
    }
    fn detect_presence(&mut self) -> bool {
        (**self).detect_presence()
    }
}

impl<T: MotionActuator + ?Sized> MotionActuator for Box<T> {
    fn set_target_position(&mut self, position: i32) -> Result<(), BoxError> {
        (**self).set_target_position(position)
    }
    fn set_target_velocity(
        &mut self,
        velocity: u32,
        direction: Direction,
    ) -> Result<(), BoxError> {
        (**self).set_target_velocity(velocity, direction)
    }
    fn set_velocity_limit(&mut self, velocity: u32) -> Result<(), BoxError> {
        (**self).set_velocity_limit(velocity)
    }
    fn set_acceleration_limits(&mut self, accel: u32, decel: u32) -> Result<(), BoxError> {
        (**self).set_acceleration_limits(accel, decel)
    }
    fn set_actual_position(&mut self, position: i32) -> Result<(), BoxError> {
        (**self).set_actual_position(position)
    }
    fn position(&mut self) -> Result<i32, BoxError> {
        (**self).position()
    }
    fn velocity(&mut self) -> Result<i32, BoxError> {
        (**self).velocity()
    }
    fn status(&mut self) -> Result<DriverStatus, BoxError> {
        (**self).status()
    }
    fn set_currents(&mut self, run: u8, hold: u8) -> Result<(), BoxError> {
        (**self).set_currents(run, hold)
    }
    fn write_raw_register(&mut self, address: u8, value: u32) -> Result<(), BoxError> {
        (**self).write_raw_register(address, value)
    }
    fn read_raw_register(&mut self, address: u8) -> Result<u32, BoxError> {
        (**self).read_raw_register(address)
    }
}
