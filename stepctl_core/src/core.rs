//! The control core (`ControlCore`): encoder, driver and all control state.
//!
//! The tick handler lives in `scheduler`; this file holds the state and the
//! foreground command API. Foreground calls configure the driver and reset
//! state; only the tick handler runs the estimator and the control loops.

use std::sync::Arc;
use std::time::Duration;

use eyre::WrapErr;
use stepctl_traits::{
    AngleSample, AngleSource, BoxError, Clock, Direction, DriverStatus, MotionActuator,
    ParamStore, TuningRecord,
};

use crate::config::CoreConfig;
use crate::error::{ControlError, Result};
use crate::estimator::{ExternalStepFilter, PositionVelocityEstimator};
use crate::hw_error::to_report;
use crate::pid::ClosedLoopController;
use crate::scheduler::OperatingMode;
use crate::stall::StallDetector;
use crate::status::{SensorHealth, StopMode, Telemetry};
use crate::step_input::StepInput;
use crate::units::{MAX_ACCEL_REG, Units};

/// Poll interval while waiting for an immediate stop to complete.
pub const STOP_POLL: Duration = Duration::from_millis(1);

/// Counts faults and keeps repeated ones out of the warn log.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct FaultLog {
    pub(crate) total: u64,
    streak: u32,
}

impl FaultLog {
    pub(crate) fn record(&mut self, what: &'static str, e: &BoxError) {
        self.total += 1;
        self.streak = self.streak.saturating_add(1);
        if self.streak == 1 {
            tracing::warn!(error = %e, "{what} failed");
        } else {
            tracing::trace!(error = %e, streak = self.streak, "{what} failed");
        }
    }

    pub(crate) fn ok(&mut self) {
        if self.streak > 1 {
            tracing::debug!(streak = self.streak, "fault streak ended");
        }
        self.streak = 0;
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Counters {
    pub(crate) ticks: u64,
    pub(crate) gated_samples: u64,
    pub(crate) rebases: u64,
    pub(crate) stalls: u64,
}

/// Closed-loop stepper control core over an encoder and a driver.
pub struct ControlCore<A: AngleSource, M: MotionActuator> {
    pub(crate) encoder: A,
    pub(crate) actuator: M,
    pub(crate) cfg: CoreConfig,
    pub(crate) units: Units,
    pub(crate) clock: Arc<dyn Clock + Send + Sync>,
    pub(crate) step_input: StepInput,

    pub(crate) mode: OperatingMode,
    pub(crate) estimator: PositionVelocityEstimator,
    pub(crate) external: ExternalStepFilter,
    pub(crate) stall: StallDetector,
    pub(crate) pid: ClosedLoopController,

    pub(crate) last_sample: AngleSample,
    pub(crate) prev_actuator_pos: Option<i32>,
    pub(crate) prev_accumulated: i64,
    pub(crate) control_error: f64,
    pub(crate) counters: Counters,
    pub(crate) sensor_faults: FaultLog,
    pub(crate) actuator_faults: FaultLog,

    /// +1, or -1 when the driver's direction is inverted.
    pub(crate) dir_sign: i32,
    pub(crate) velocity_limit: u32,
    pub(crate) accel: u32,
    pub(crate) decel: u32,
    pub(crate) current: u8,
    pub(crate) hold_current: u8,
}

impl<A: AngleSource, M: MotionActuator> std::fmt::Debug for ControlCore<A, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlCore")
            .field("mode", &self.mode)
            .field("accumulated", &self.estimator.accumulated())
            .field("stalled", &self.stall.is_stalled())
            .field("ticks", &self.counters.ticks)
            .finish_non_exhaustive()
    }
}

impl<A: AngleSource, M: MotionActuator> ControlCore<A, M> {
    // ── Driver frame helpers ────────────────────────────────────────────────

    /// Driver position in the user frame.
    pub(crate) fn actuator_position(&mut self) -> std::result::Result<i32, BoxError> {
        Ok(self.actuator.position()?.wrapping_mul(self.dir_sign))
    }

    pub(crate) fn to_driver_dir(&self, d: Direction) -> Direction {
        if self.dir_sign < 0 { d.reversed() } else { d }
    }

    /// Signed step rate (user frame) as a velocity-mode command.
    pub(crate) fn command_velocity(&mut self, steps_per_s: f64) -> std::result::Result<(), BoxError> {
        let reg = self.units.velocity_reg(steps_per_s);
        let dir = self.to_driver_dir(Direction::from_sign(steps_per_s));
        self.actuator.set_target_velocity(reg, dir)
    }

    fn ensure_not_drop_in(&self, what: &str) -> Result<()> {
        if self.mode == OperatingMode::DropIn {
            return Err(eyre::Report::new(ControlError::State(format!(
                "{what} is not available in drop-in mode"
            ))));
        }
        Ok(())
    }

    // ── Motion commands ─────────────────────────────────────────────────────

    /// Relative positioning move from the driver's current position.
    pub fn move_steps(&mut self, steps: i32) -> Result<()> {
        self.ensure_not_drop_in("move_steps")?;
        let pos = self
            .actuator_position()
            .map_err(|e| to_report(&e))
            .wrap_err("read driver position")?;
        let target = pos.saturating_add(steps);
        self.actuator
            .set_velocity_limit(self.velocity_limit)
            .and_then(|()| {
                self.actuator
                    .set_target_position(target.wrapping_mul(self.dir_sign))
            })
            .map_err(|e| to_report(&e))
            .wrap_err("command positioning move")?;
        tracing::info!(steps, target, "move");
        Ok(())
    }

    /// Relative move in degrees of shaft rotation.
    pub fn move_angle(&mut self, degrees: f64) -> Result<()> {
        let steps = self.units.degrees_to_steps(degrees).round();
        self.move_steps(clamp_to_i32(steps))
    }

    /// Move to an absolute angle from home, measured by the encoder.
    pub fn move_to_angle(&mut self, degrees: f64) -> Result<()> {
        let here = self
            .units
            .encoder_to_steps(self.estimator.accumulated() as f64);
        let delta = (self.units.degrees_to_steps(degrees) - here).round();
        self.move_steps(clamp_to_i32(delta))
    }

    /// Spin at the configured maximum velocity until stopped.
    pub fn run_continuous(&mut self, direction: Direction) -> Result<()> {
        self.ensure_not_drop_in("run_continuous")?;
        let dir = self.to_driver_dir(direction);
        self.actuator
            .set_target_velocity(self.velocity_limit, dir)
            .map_err(|e| to_report(&e))
            .wrap_err("command continuous run")?;
        tracing::info!(?direction, vmax = self.velocity_limit, "run continuous");
        Ok(())
    }

    /// Spin at `rpm`; the sign selects the direction.
    pub fn set_rpm(&mut self, rpm: f64) -> Result<()> {
        self.ensure_not_drop_in("set_rpm")?;
        if !rpm.is_finite() {
            return Err(eyre::Report::new(ControlError::Config(format!(
                "rpm must be finite, got {rpm}"
            ))));
        }
        let sps = self.units.rpm_to_steps_per_s(rpm);
        self.command_velocity(sps)
            .map_err(|e| to_report(&e))
            .wrap_err("command velocity")?;
        tracing::info!(rpm, "set rpm");
        Ok(())
    }

    /// Cruise velocity for positioning moves and `run_continuous`, in microsteps/s.
    pub fn set_max_velocity(&mut self, steps_per_s: f64) -> Result<()> {
        self.velocity_limit = self.units.velocity_reg(steps_per_s).max(1);
        self.apply_velocity_limit()
    }

    pub(crate) fn apply_velocity_limit(&mut self) -> Result<()> {
        self.actuator
            .set_velocity_limit(self.velocity_limit)
            .map_err(|e| to_report(&e))
            .wrap_err("set velocity limit")
    }

    /// Acceleration in microsteps/s^2.
    pub fn set_max_acceleration(&mut self, steps_per_s2: f64) -> Result<()> {
        self.accel = self.units.accel_reg(steps_per_s2);
        self.apply_ramp_limits()
    }

    /// Deceleration in microsteps/s^2.
    pub fn set_max_deceleration(&mut self, steps_per_s2: f64) -> Result<()> {
        self.decel = self.units.accel_reg(steps_per_s2);
        self.apply_ramp_limits()
    }

    pub(crate) fn apply_ramp_limits(&mut self) -> Result<()> {
        self.actuator
            .set_acceleration_limits(self.accel, self.decel)
            .map_err(|e| to_report(&e))
            .wrap_err("set acceleration limits")
    }

    /// Issue the stop command without waiting for standstill.
    ///
    /// In drop-in mode the controller is disabled so the tick handler does
    /// not restart the motor; `enable_pid` resumes tracking.
    pub fn begin_stop(&mut self, mode: StopMode) -> Result<()> {
        if self.mode == OperatingMode::DropIn {
            self.pid.disable();
        }
        let decel = match mode {
            StopMode::Immediate => MAX_ACCEL_REG,
            StopMode::Graceful => self.decel,
        };
        self.actuator
            .set_acceleration_limits(self.accel, decel)
            .and_then(|()| self.command_velocity(0.0))
            .map_err(|e| to_report(&e))
            .wrap_err("command stop")?;
        tracing::info!(?mode, "stop");
        Ok(())
    }

    /// Whether the driver reports zero velocity.
    pub fn is_standstill(&mut self) -> Result<bool> {
        let v = self
            .actuator
            .velocity()
            .map_err(|e| to_report(&e))
            .wrap_err("read driver velocity")?;
        Ok(v == 0)
    }

    /// Stop the motor. `Immediate` blocks until the driver reports zero
    /// velocity; there is no timeout.
    pub fn stop(&mut self, mode: StopMode) -> Result<()> {
        self.begin_stop(mode)?;
        if mode == StopMode::Immediate {
            while !self.is_standstill()? {
                self.clock.sleep(STOP_POLL);
            }
        }
        Ok(())
    }

    // ── Driver configuration ────────────────────────────────────────────────

    /// Run current, driver scale 0..=31.
    pub fn set_current(&mut self, run: u8) -> Result<()> {
        self.current = run.min(31);
        self.apply_currents()
    }

    /// Hold current, driver scale 0..=31.
    pub fn set_hold_current(&mut self, hold: u8) -> Result<()> {
        self.hold_current = hold.min(31);
        self.apply_currents()
    }

    fn apply_currents(&mut self) -> Result<()> {
        self.actuator
            .set_currents(self.current, self.hold_current)
            .map_err(|e| to_report(&e))
            .wrap_err("set driver currents")
    }

    pub fn driver_status(&mut self) -> Result<DriverStatus> {
        self.actuator
            .status()
            .map_err(|e| to_report(&e))
            .wrap_err("read driver status")
    }

    pub fn write_raw_register(&mut self, address: u8, value: u32) -> Result<()> {
        self.actuator
            .write_raw_register(address, value)
            .map_err(|e| to_report(&e))
            .wrap_err_with(|| format!("write register {address:#04x}"))
    }

    pub fn read_raw_register(&mut self, address: u8) -> Result<u32> {
        self.actuator
            .read_raw_register(address)
            .map_err(|e| to_report(&e))
            .wrap_err_with(|| format!("read register {address:#04x}"))
    }

    // ── Reference and mode ──────────────────────────────────────────────────

    /// Redefine home at the current shaft angle.
    ///
    /// Resets the estimator, the external step filter, the controller and the
    /// stall state together, and zeroes the driver's position and target.
    pub fn set_home(&mut self) -> Result<()> {
        let sample = self
            .encoder
            .capture_sample()
            .map_err(|e| to_report(&e))
            .wrap_err("capture home angle")?;
        self.last_sample = sample;
        self.estimator.reset(sample.angle);
        self.external.reset(self.step_input.count(), 0.0);
        self.pid.reset();
        self.stall.clear();
        self.prev_accumulated = 0;
        self.control_error = 0.0;
        self.actuator
            .set_actual_position(0)
            .and_then(|()| self.actuator.set_target_position(0))
            .map_err(|e| to_report(&e))
            .wrap_err("zero driver position")?;
        self.prev_actuator_pos = Some(0);
        tracing::info!(raw = sample.angle, "home set");
        Ok(())
    }

    /// Switch operating mode.
    ///
    /// Filter dynamics, controller and stall state restart; the accumulated
    /// position (and so the home reference) is kept. Leaving drop-in
    /// commands zero velocity and restores the configured ramp limits.
    pub fn set_mode(&mut self, mode: OperatingMode) -> Result<()> {
        let leaving_drop_in = self.mode == OperatingMode::DropIn && mode != OperatingMode::DropIn;
        self.mode = mode;
        let dt = self.period().as_secs_f64();
        self.estimator.set_period(dt);
        self.estimator.reseed();
        self.external.set_period(dt);
        self.external.reset(
            self.step_input.count(),
            self.estimator.accumulated() as f64,
        );
        self.pid.reset();
        self.stall.clear();
        self.prev_actuator_pos = None;
        self.control_error = 0.0;
        if leaving_drop_in {
            self.apply_ramp_limits()?;
            self.command_velocity(0.0)
                .map_err(|e| to_report(&e))
                .wrap_err("stop drop-in motion")?;
        }
        tracing::info!(?mode, period_us = self.period().as_micros(), "mode set");
        Ok(())
    }

    pub fn mode(&self) -> OperatingMode {
        self.mode
    }

    /// Tick period for the current mode.
    pub fn period(&self) -> Duration {
        let hz = match self.mode {
            OperatingMode::DropIn => self.cfg.control.dropin_tick_hz,
            _ => self.cfg.control.tick_hz,
        };
        crate::util::period(hz)
    }

    // ── Observation ─────────────────────────────────────────────────────────

    /// Degrees turned since home.
    pub fn angle_moved(&self) -> f64 {
        Units::encoder_to_degrees(self.estimator.accumulated() as f64)
    }

    /// Absolute encoder angle within one revolution, degrees.
    pub fn encoder_angle(&self) -> f64 {
        Units::encoder_to_degrees(f64::from(self.last_sample.angle))
    }

    /// Estimated shaft speed.
    pub fn speed_rpm(&self) -> f64 {
        Units::encoder_rate_to_rpm(self.estimator.filtered_velocity())
    }

    pub fn is_stalled(&self) -> bool {
        self.stall.is_stalled()
    }

    /// Must be called before resuming motion after a stall-triggered stop.
    pub fn clear_stall(&mut self) {
        self.stall.clear();
        tracing::debug!("stall cleared");
    }

    pub fn sensor_health(&mut self) -> SensorHealth {
        SensorHealth {
            present: self.encoder.detect_presence(),
            status: self.last_sample.status,
            read_faults: self.sensor_faults.total,
        }
    }

    pub fn telemetry(&self) -> Telemetry {
        Telemetry {
            mode: self.mode,
            ticks: self.counters.ticks,
            sensor_faults: self.sensor_faults.total,
            actuator_faults: self.actuator_faults.total,
            gated_samples: self.counters.gated_samples,
            rebases: self.counters.rebases,
            stalls: self.counters.stalls,
            stalled: self.stall.is_stalled(),
            accumulated: self.estimator.accumulated(),
            angle_moved_deg: self.angle_moved(),
            speed_rpm: self.speed_rpm(),
            control_error: self.control_error,
            pid_enabled: self.pid.is_enabled(),
        }
    }

    pub fn estimator(&self) -> &PositionVelocityEstimator {
        &self.estimator
    }

    pub fn external_filter(&self) -> &ExternalStepFilter {
        &self.external
    }

    pub fn controller(&self) -> &ClosedLoopController {
        &self.pid
    }

    pub fn stall_detector(&self) -> &StallDetector {
        &self.stall
    }

    pub fn step_input(&self) -> StepInput {
        self.step_input.clone()
    }

    pub fn clock(&self) -> &Arc<dyn Clock + Send + Sync> {
        &self.clock
    }

    pub fn units(&self) -> Units {
        self.units
    }

    // ── Tuning ──────────────────────────────────────────────────────────────

    pub fn set_control_threshold(&mut self, steps: f64) {
        self.cfg.control.control_threshold = steps.max(0.0);
    }

    pub fn set_stall_sensitivity(&mut self, sensitivity: f64) {
        self.stall.set_sensitivity(sensitivity);
        self.cfg.stall.sensitivity = self.stall.confidence().sensitivity();
    }

    pub fn set_proportional(&mut self, kp: f32) {
        self.pid.set_kp(f64::from(kp.max(0.0)));
    }

    pub fn set_integral(&mut self, ki: f32) {
        self.pid.set_ki(f64::from(ki.max(0.0)));
    }

    pub fn set_differential(&mut self, kd: f32) {
        self.pid.set_kd(f64::from(kd.max(0.0)));
    }

    /// Last control error in microsteps.
    pub fn pid_error(&self) -> f64 {
        self.control_error
    }

    pub fn enable_pid(&mut self) {
        self.pid.enable();
        tracing::debug!("controller enabled");
    }

    pub fn disable_pid(&mut self) {
        self.pid.disable();
        tracing::debug!("controller disabled");
    }

    pub fn tuning(&self) -> TuningRecord {
        let g = self.pid.gains();
        TuningRecord {
            kp: g.kp as f32,
            ki: g.ki as f32,
            kd: g.kd as f32,
            current: self.current,
            hold_current: self.hold_current,
            invert_direction: self.dir_sign < 0,
        }
    }

    /// Apply gains, currents and direction from a stored record.
    pub fn apply_tuning(&mut self, record: &TuningRecord) -> Result<()> {
        self.set_proportional(record.kp);
        self.set_integral(record.ki);
        self.set_differential(record.kd);
        self.current = record.current.min(31);
        self.hold_current = record.hold_current.min(31);
        self.apply_currents()?;
        let dir_sign = if record.invert_direction { -1 } else { 1 };
        if dir_sign != self.dir_sign {
            self.mirror_frame(dir_sign);
        }
        Ok(())
    }

    /// Switch the user frame to the other rotation direction.
    ///
    /// The driver keeps its own registers, so its user-frame position flips
    /// sign with `dir_sign`; the encoder count is mirrored to match. Loop
    /// state that was built in the old frame is dropped.
    fn mirror_frame(&mut self, dir_sign: i32) {
        self.dir_sign = dir_sign;
        self.estimator.mirror();
        let accumulated = self.estimator.accumulated();
        self.prev_accumulated = accumulated;
        self.external.reset(self.step_input.count(), accumulated as f64);
        self.pid.reset();
        self.stall.clear();
        self.prev_actuator_pos = None;
        self.control_error = 0.0;
        tracing::info!(inverted = dir_sign < 0, accumulated, "direction frame mirrored");
    }

    /// Load and apply a stored record; `false` when none was stored.
    pub fn load_tuning(&mut self, store: &mut dyn ParamStore) -> Result<bool> {
        let record = store
            .load()
            .map_err(|e| eyre::eyre!(e.to_string()))
            .wrap_err("load tuning record")?;
        match record {
            Some(r) => {
                self.apply_tuning(&r)?;
                tracing::info!(kp = r.kp, ki = r.ki, kd = r.kd, "tuning loaded");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn save_tuning(&mut self, store: &mut dyn ParamStore) -> Result<()> {
        store
            .save(&self.tuning())
            .map_err(|e| eyre::eyre!(e.to_string()))
            .wrap_err("save tuning record")
    }
}

fn clamp_to_i32(v: f64) -> i32 {
    if v.is_nan() {
        0
    } else {
        v.clamp(f64::from(i32::MIN), f64::from(i32::MAX)) as i32
    }
}
