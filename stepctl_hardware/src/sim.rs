//! Simulated axis: one physical shaft shared by a simulated encoder and a
//! simulated TMC5130-style ramp generator.
//!
//! Time comes from an injected `Clock`; every handle call first integrates
//! the model up to `clock.now()`. With a `ManualClock` advanced by the tick
//! period this gives fully deterministic closed-loop runs.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use stepctl_traits::{
    AngleSample, AngleSource, BoxError, Clock, Direction, DriverStatus, MotionActuator,
    SampleStatus,
};

use crate::error::HwError;
use crate::tmc5130::{self, RampProfile, areg_to_steps_per_s2, reg, vreg_to_steps_per_s};

const ENCODER_UNITS: f64 = 65_536.0;
/// Longest integration step; coarser clock jumps are subdivided.
const MAX_SUBSTEP_S: f64 = 0.001;
const VELOCITY_REACHED_TOL: f64 = 0.5;

#[derive(Debug, Clone, Copy)]
pub struct AxisParams {
    pub microsteps_per_rev: u32,
    pub fclk_hz: u32,
    /// Raw encoder reading when the shaft is at microstep 0.
    pub encoder_offset: u16,
    pub profile: RampProfile,
}

impl Default for AxisParams {
    fn default() -> Self {
        Self {
            microsteps_per_rev: 200 * 256,
            fclk_hz: tmc5130::DEFAULT_FCLK_HZ,
            encoder_offset: 0,
            profile: RampProfile::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum RampTarget {
    Position(i32),
    Velocity { reg: u32, direction: Direction },
}

#[derive(Debug)]
struct AxisState {
    params: AxisParams,
    last: Instant,
    xactual: f64,
    shaft: f64,
    v: f64,
    target: RampTarget,
    vmax_reg: u32,
    amax_reg: u32,
    dmax_reg: u32,
    blocked: bool,
    encoder_status: u8,
    present: bool,
    encoder_fault: bool,
    driver_fault: bool,
    run_current: u8,
    hold_current: u8,
    registers: BTreeMap<u8, u32>,
}

impl AxisState {
    fn advance_to(&mut self, now: Instant) {
        let mut remaining = now.saturating_duration_since(self.last).as_secs_f64();
        self.last = now;
        while remaining > 1e-12 {
            let dt = remaining.min(MAX_SUBSTEP_S);
            self.integrate(dt);
            remaining -= dt;
        }
    }

    fn target_velocity(&self) -> f64 {
        let fclk = self.params.fclk_hz;
        match self.target {
            RampTarget::Velocity { reg, direction } => {
                f64::from(direction.signum()) * vreg_to_steps_per_s(f64::from(reg), fclk)
            }
            RampTarget::Position(p) => {
                let dist = f64::from(p) - self.xactual;
                if dist.abs() < 1e-9 {
                    return 0.0;
                }
                let vmax = vreg_to_steps_per_s(f64::from(self.vmax_reg), fclk);
                let dmax = areg_to_steps_per_s2(f64::from(self.dmax_reg), fclk);
                dist.signum() * vmax.min((2.0 * dmax * dist.abs()).sqrt())
            }
        }
    }

    fn integrate(&mut self, dt: f64) {
        let fclk = self.params.fclk_hz;
        let vt = self.target_velocity();
        let speeding_up = vt.abs() > self.v.abs() && vt * self.v >= 0.0;
        let a = if speeding_up {
            areg_to_steps_per_s2(f64::from(self.amax_reg), fclk)
        } else {
            areg_to_steps_per_s2(f64::from(self.dmax_reg), fclk)
        };
        self.v += (vt - self.v).clamp(-a * dt, a * dt);

        let mut step = self.v * dt;
        let mut landed = None;
        if let RampTarget::Position(p) = self.target {
            let dist = f64::from(p) - self.xactual;
            if step * dist >= 0.0 && step.abs() >= dist.abs() {
                step = dist;
                self.v = 0.0;
                landed = Some(f64::from(p));
            }
        }
        self.xactual = landed.unwrap_or(self.xactual + step);
        if !self.blocked {
            self.shaft += step;
        }
    }

    fn encoder_raw(&self) -> u16 {
        let units = (self.shaft * ENCODER_UNITS / f64::from(self.params.microsteps_per_rev))
            .floor() as i64;
        (units + i64::from(self.params.encoder_offset)).rem_euclid(65_536) as u16
    }

    fn velocity_reg(&self) -> i32 {
        (self.v * f64::from(1u32 << 24) / f64::from(self.params.fclk_hz)).round() as i32
    }

    fn status(&self) -> DriverStatus {
        let standstill = self.v.abs() < 1e-9;
        DriverStatus {
            standstill,
            velocity_reached: (self.target_velocity() - self.v).abs() < VELOCITY_REACHED_TOL,
            position_reached: matches!(self.target, RampTarget::Position(p) if f64::from(p) == self.xactual),
            stallguard: self.blocked && !standstill,
            ..DriverStatus::default()
        }
    }
}

fn lock(state: &Mutex<AxisState>) -> MutexGuard<'_, AxisState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owner of the simulated physics; hands out encoder and driver handles.
#[derive(Clone)]
pub struct SimulatedAxis {
    state: Arc<Mutex<AxisState>>,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl SimulatedAxis {
    pub fn new(params: AxisParams, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        let state = AxisState {
            params,
            last: clock.now(),
            xactual: 0.0,
            shaft: 0.0,
            v: 0.0,
            target: RampTarget::Position(0),
            vmax_reg: params.profile.vmax,
            amax_reg: params.profile.amax,
            dmax_reg: params.profile.dmax,
            blocked: false,
            encoder_status: 0,
            present: true,
            encoder_fault: false,
            driver_fault: false,
            run_current: 16,
            hold_current: 16,
            registers: BTreeMap::new(),
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            clock,
        }
    }

    pub fn encoder(&self) -> SimulatedEncoder {
        SimulatedEncoder {
            state: Arc::clone(&self.state),
            clock: Arc::clone(&self.clock),
        }
    }

    pub fn driver(&self) -> SimulatedDriver {
        SimulatedDriver {
            state: Arc::clone(&self.state),
            clock: Arc::clone(&self.clock),
        }
    }

    fn synced(&self) -> MutexGuard<'_, AxisState> {
        let mut s = lock(&self.state);
        s.advance_to(self.clock.now());
        s
    }

    /// Hold the shaft still; the ramp generator keeps counting.
    pub fn set_blocked(&self, blocked: bool) {
        self.synced().blocked = blocked;
    }

    pub fn set_encoder_status(&self, bits: u8) {
        self.synced().encoder_status = bits;
    }

    pub fn set_present(&self, present: bool) {
        self.synced().present = present;
    }

    /// Make every encoder read fail with a timeout.
    pub fn set_encoder_fault(&self, fault: bool) {
        self.synced().encoder_fault = fault;
    }

    /// Make every driver call fail with an SPI error.
    pub fn set_driver_fault(&self, fault: bool) {
        self.synced().driver_fault = fault;
    }

    /// Turn the shaft by hand without the driver noticing.
    pub fn rotate_shaft(&self, microsteps: f64) {
        self.synced().shaft += microsteps;
    }

    /// Physical shaft position in microsteps.
    pub fn shaft_position(&self) -> f64 {
        self.synced().shaft
    }

    /// Driver's internal position counter in microsteps.
    pub fn actual_position(&self) -> f64 {
        self.synced().xactual
    }

    pub fn velocity_steps_per_s(&self) -> f64 {
        self.synced().v
    }

    pub fn acceleration_limits(&self) -> (u32, u32) {
        let s = self.synced();
        (s.amax_reg, s.dmax_reg)
    }

    pub fn currents(&self) -> (u8, u8) {
        let s = self.synced();
        (s.run_current, s.hold_current)
    }
}

pub struct SimulatedEncoder {
    state: Arc<Mutex<AxisState>>,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl AngleSource for SimulatedEncoder {
    fn capture_sample(&mut self) -> Result<AngleSample, BoxError> {
        let mut s = lock(&self.state);
        s.advance_to(self.clock.now());
        if s.encoder_fault {
            return Err(Box::new(HwError::Timeout));
        }
        if !s.present {
            return Err(Box::new(HwError::NotDetected("encoder")));
        }
        Ok(AngleSample::new(
            s.encoder_raw(),
            SampleStatus::from_bits(s.encoder_status),
        ))
    }

    fn detect_presence(&mut self) -> bool {
        let s = lock(&self.state);
        let status = SampleStatus::from_bits(s.encoder_status);
        s.present && !s.encoder_fault && !(status.magnet_too_weak() || status.magnet_too_strong())
    }
}

pub struct SimulatedDriver {
    state: Arc<Mutex<AxisState>>,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl SimulatedDriver {
    fn synced(&self) -> Result<MutexGuard<'_, AxisState>, BoxError> {
        let mut s = lock(&self.state);
        s.advance_to(self.clock.now());
        if s.driver_fault {
            return Err(Box::new(HwError::Spi("simulated bus fault".into())));
        }
        Ok(s)
    }
}

impl MotionActuator for SimulatedDriver {
    fn set_target_position(&mut self, position: i32) -> Result<(), BoxError> {
        self.synced()?.target = RampTarget::Position(position);
        Ok(())
    }

    fn set_target_velocity(&mut self, velocity: u32, direction: Direction) -> Result<(), BoxError> {
        self.synced()?.target = RampTarget::Velocity {
            reg: velocity,
            direction,
        };
        Ok(())
    }

    fn set_velocity_limit(&mut self, velocity: u32) -> Result<(), BoxError> {
        self.synced()?.vmax_reg = velocity;
        Ok(())
    }

    fn set_acceleration_limits(&mut self, accel: u32, decel: u32) -> Result<(), BoxError> {
        let mut s = self.synced()?;
        s.amax_reg = accel.min(tmc5130::MAX_ACCEL_REG);
        s.dmax_reg = decel.min(tmc5130::MAX_ACCEL_REG);
        Ok(())
    }

    fn set_actual_position(&mut self, position: i32) -> Result<(), BoxError> {
        self.synced()?.xactual = f64::from(position);
        Ok(())
    }

    fn position(&mut self) -> Result<i32, BoxError> {
        Ok(self.synced()?.xactual.round() as i32)
    }

    fn velocity(&mut self) -> Result<i32, BoxError> {
        Ok(self.synced()?.velocity_reg())
    }

    fn status(&mut self) -> Result<DriverStatus, BoxError> {
        Ok(self.synced()?.status())
    }

    fn set_currents(&mut self, run: u8, hold: u8) -> Result<(), BoxError> {
        let mut s = self.synced()?;
        s.run_current = run.min(31);
        s.hold_current = hold.min(31);
        Ok(())
    }

    fn write_raw_register(&mut self, address: u8, value: u32) -> Result<(), BoxError> {
        let mut s = self.synced()?;
        match address {
            reg::XACTUAL => s.xactual = f64::from(value as i32),
            reg::XTARGET => s.target = RampTarget::Position(value as i32),
            reg::VMAX => s.vmax_reg = value,
            reg::AMAX => s.amax_reg = value.min(tmc5130::MAX_ACCEL_REG),
            reg::DMAX => s.dmax_reg = value.min(tmc5130::MAX_ACCEL_REG),
            _ => {}
        }
        s.registers.insert(address, value);
        Ok(())
    }

    fn read_raw_register(&mut self, address: u8) -> Result<u32, BoxError> {
        let s = self.synced()?;
        Ok(match address {
            reg::XACTUAL => s.xactual.round() as i32 as u32,
            reg::VACTUAL => (s.velocity_reg() as u32) & 0x00FF_FFFF,
            reg::RAMP_STAT => u32::from(s.status().bits()),
            _ => s.registers.get(&address).copied().unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use stepctl_traits::ManualClock;

    fn axis() -> (ManualClock, SimulatedAxis) {
        let clock = ManualClock::new();
        let axis = SimulatedAxis::new(AxisParams::default(), Arc::new(clock.clone()));
        (clock, axis)
    }

    #[test]
    fn positioning_move_lands_on_target() {
        let (clock, axis) = axis();
        let mut drv = axis.driver();
        drv.set_target_position(5_000).unwrap();
        for _ in 0..2_000 {
            clock.advance(Duration::from_millis(1));
        }
        assert_eq!(drv.position().unwrap(), 5_000);
        assert!(drv.status().unwrap().position_reached);
        assert!(drv.status().unwrap().standstill);
        assert!((axis.shaft_position() - 5_000.0).abs() < 1e-6);
    }

    #[test]
    fn blocked_shaft_leaves_encoder_still() {
        let (clock, axis) = axis();
        let mut enc = axis.encoder();
        let mut drv = axis.driver();
        let before = enc.capture_sample().unwrap().angle;
        axis.set_blocked(true);
        drv.set_target_velocity(100_000, Direction::Clockwise).unwrap();
        clock.advance(Duration::from_millis(200));
        assert_eq!(enc.capture_sample().unwrap().angle, before);
        assert!(drv.position().unwrap() > 0);
        assert!(drv.status().unwrap().stallguard);
    }

    #[test]
    fn encoder_wraps_with_shaft() {
        let (_clock, axis) = axis();
        let mut enc = axis.encoder();
        axis.rotate_shaft(51_200.0 * 1.5);
        assert_eq!(enc.capture_sample().unwrap().angle, 32_768);
        axis.rotate_shaft(-51_200.0 * 2.0);
        assert_eq!(enc.capture_sample().unwrap().angle, 32_768);
    }

    #[test]
    fn faults_surface_as_errors() {
        let (_clock, axis) = axis();
        let mut enc = axis.encoder();
        let mut drv = axis.driver();
        axis.set_encoder_fault(true);
        assert!(enc.capture_sample().is_err());
        assert!(!enc.detect_presence());
        axis.set_driver_fault(true);
        assert!(drv.position().is_err());
    }
}
