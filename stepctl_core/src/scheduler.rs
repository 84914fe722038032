//! The periodic control tick.
//!
//! One call to `ControlCore::tick` reads the encoder, advances the estimator
//! and then runs the work of the current operating mode:
//!
//! - `Normal`: stall supervision only.
//! - `ClosedLoopPositionHold`: supervision plus re-basing the driver's
//!   position counter on the encoder when they disagree.
//! - `DropIn`: the motor follows the external step count through the PID.
//!
//! Hardware faults never abort a tick with an error; they are counted,
//! logged and reported in the `TickReport`.

use stepctl_traits::{AngleSource, MotionActuator};

use crate::core::ControlCore;
use crate::units::MAX_ACCEL_REG;

/// Operating mode of the control core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperatingMode {
    /// Open-loop driver ramps with encoder supervision.
    #[default]
    Normal,
    /// The driver's position counter is kept aligned with the encoder.
    ClosedLoopPositionHold,
    /// Velocity is commanded from an external step/direction count.
    DropIn,
}

/// What happened during one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TickReport {
    pub tick: u64,
    pub mode: OperatingMode,
    /// The encoder read failed; nothing else ran.
    pub sensor_fault: bool,
    pub actuator_fault: bool,
    /// The sample was discarded by the health gate.
    pub gated: bool,
    /// The driver's position counter was re-based on the encoder.
    pub rebased: bool,
    pub stalled: bool,
    /// Encoder units since home.
    pub accumulated: i64,
    /// Filtered position, encoder units.
    pub position: f64,
    /// Filtered velocity, encoder units per second.
    pub velocity: f64,
    /// Microsteps.
    pub control_error: f64,
    /// Drop-in velocity command in microsteps per second.
    pub velocity_command: Option<f64>,
}

impl<A: AngleSource, M: MotionActuator> ControlCore<A, M> {
    /// Run one control tick.
    pub fn tick(&mut self) -> TickReport {
        self.counters.ticks += 1;
        let mut report = TickReport {
            tick: self.counters.ticks,
            mode: self.mode,
            ..TickReport::default()
        };

        let sample = match self.encoder.capture_sample() {
            Ok(s) => {
                self.sensor_faults.ok();
                s
            }
            Err(e) => {
                self.sensor_faults.record("encoder read", &e);
                report.sensor_fault = true;
                return self.finish(report);
            }
        };
        self.last_sample = sample;

        if self.cfg.estimator.health_gate && !sample.status.is_valid() {
            self.counters.gated_samples += 1;
            tracing::trace!(status = sample.status.bits(), "sample gated");
            report.gated = true;
            return self.finish(report);
        }
        self.estimator.update(sample.angle);

        let was_stalled = self.stall.is_stalled();
        match self.actuator_position() {
            Ok(pos) => {
                self.actuator_faults.ok();
                self.supervise(pos);
                if self.mode == OperatingMode::ClosedLoopPositionHold {
                    report.rebased = self.hold_position(pos);
                }
            }
            Err(e) => {
                self.actuator_faults.record("driver position read", &e);
                report.actuator_fault = true;
            }
        }
        self.prev_accumulated = self.estimator.accumulated();

        if self.mode == OperatingMode::DropIn {
            match self.track_external() {
                Ok(cmd) => report.velocity_command = cmd,
                Err(e) => {
                    self.actuator_faults.record("drop-in velocity command", &e);
                    report.actuator_fault = true;
                }
            }
        }

        if self.stall.is_stalled() && !was_stalled {
            self.on_stall();
        }
        self.finish(report)
    }

    fn finish(&self, mut report: TickReport) -> TickReport {
        let est = self.estimator.estimate();
        report.stalled = self.stall.is_stalled();
        report.accumulated = est.accumulated;
        report.position = est.position;
        report.velocity = est.velocity;
        report.control_error = self.control_error;
        report
    }

    /// Feed this tick's commanded and observed motion to the stall detector.
    fn supervise(&mut self, actuator_pos: i32) {
        let Some(prev) = self.prev_actuator_pos.replace(actuator_pos) else {
            return;
        };
        let commanded = f64::from(actuator_pos.wrapping_sub(prev));
        let moved = self.estimator.accumulated() - self.prev_accumulated;
        let observed = self.units.encoder_to_steps(moved as f64);
        self.stall.evaluate(self.mode, observed, commanded);
    }

    /// Re-base the driver on the encoder when the position error exceeds the
    /// threshold. Returns whether a re-base happened.
    fn hold_position(&mut self, actuator_pos: i32) -> bool {
        let measured = self
            .units
            .encoder_to_steps(self.estimator.accumulated() as f64);
        let error = f64::from(actuator_pos) - measured;
        self.control_error = error;
        if error.abs() <= self.cfg.control.control_threshold {
            return false;
        }

        let rebased = measured.round() as i32;
        match self.actuator.set_actual_position(rebased.wrapping_mul(self.dir_sign)) {
            Ok(()) => {
                self.prev_actuator_pos = Some(rebased);
                self.counters.rebases += 1;
                tracing::debug!(error, position = rebased, "driver re-based on encoder");
                true
            }
            Err(e) => {
                self.actuator_faults.record("driver re-base", &e);
                false
            }
        }
    }

    /// Drop-in: close the loop between the external step count and the
    /// encoder. Returns the velocity command issued, if any.
    fn track_external(&mut self) -> Result<Option<f64>, stepctl_traits::BoxError> {
        let (target, target_velocity) = self.external.update(self.step_input.count());
        let error = target - self.estimator.filtered_position();
        self.control_error = self.units.encoder_to_steps(error);
        if !self.pid.is_enabled() {
            return Ok(None);
        }

        let correction = self.pid.step(error, target_velocity);
        let feed_forward = if self.cfg.pid.feed_forward {
            target_velocity
        } else {
            0.0
        };
        let steps_per_s = self.units.encoder_to_steps(feed_forward + correction);
        self.actuator
            .set_acceleration_limits(MAX_ACCEL_REG, MAX_ACCEL_REG)?;
        self.command_velocity(steps_per_s)?;
        Ok(Some(steps_per_s))
    }

    fn on_stall(&mut self) {
        self.counters.stalls += 1;
        tracing::warn!(
            mode = ?self.mode,
            confidence = self.stall.confidence().confidence(),
            "stall detected"
        );
        if !self.cfg.stall.stop_on_stall {
            return;
        }
        if self.mode == OperatingMode::DropIn {
            self.pid.disable();
        }
        let stopped = self
            .actuator
            .set_acceleration_limits(self.accel, self.decel)
            .and_then(|()| self.command_velocity(0.0));
        match stopped {
            Ok(()) => tracing::info!("graceful stop on stall"),
            Err(e) => self.actuator_faults.record("stall stop", &e),
        }
    }
}
