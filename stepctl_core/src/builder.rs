//! Type-state builder for `ControlCore` and the generic `build_core` constructor.
//!
//! The builder enforces at compile time that an encoder and a driver are
//! provided before `build()` is available. `try_build()` is always available
//! for dynamic checks.

use std::marker::PhantomData;
use std::sync::Arc;

use stepctl_traits::clock::{Clock, MonotonicClock};
use stepctl_traits::{AngleSample, AngleSource, MotionActuator, TuningRecord};

use crate::config::CoreConfig;
use crate::core::{ControlCore, Counters, FaultLog};
use crate::error::{BuildError, Result};
use crate::estimator::{ExternalStepFilter, PositionVelocityEstimator};
use crate::pid::ClosedLoopController;
use crate::stall::StallDetector;
use crate::step_input::StepInput;
use crate::units::{MAX_ACCEL_REG, Units};

/// Boxed encoder used by the dynamic core.
pub type DynEncoder = Box<dyn AngleSource + Send>;
/// Boxed driver used by the dynamic core.
pub type DynActuator = Box<dyn MotionActuator + Send>;
/// Dynamically dispatched control core, as produced by `ControlCoreBuilder`.
pub type DynControlCore = ControlCore<DynEncoder, DynActuator>;

// ── Type-state markers ───────────────────────────────────────────────────────

pub struct Missing;
pub struct Set;

/// Builder for `DynControlCore`. Configuration is validated on `build()`.
pub struct ControlCoreBuilder<E, D> {
    encoder: Option<DynEncoder>,
    actuator: Option<DynActuator>,
    config: Option<CoreConfig>,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
    step_input: Option<StepInput>,
    tuning: Option<TuningRecord>,
    _e: PhantomData<E>,
    _d: PhantomData<D>,
}

impl Default for ControlCoreBuilder<Missing, Missing> {
    fn default() -> Self {
        Self {
            encoder: None,
            actuator: None,
            config: None,
            clock: None,
            step_input: None,
            tuning: None,
            _e: PhantomData,
            _d: PhantomData,
        }
    }
}

impl DynControlCore {
    /// Start building a control core.
    pub fn builder() -> ControlCoreBuilder<Missing, Missing> {
        ControlCoreBuilder::default()
    }
}

fn invalid(msg: &'static str) -> eyre::Report {
    eyre::Report::new(BuildError::InvalidConfig(msg))
}

fn validate(cfg: &CoreConfig) -> Result<()> {
    let m = &cfg.motion;
    if m.microsteps_per_rev == 0 {
        return Err(invalid("microsteps_per_rev must be > 0"));
    }
    if m.fclk_hz == 0 {
        return Err(invalid("driver clock must be > 0"));
    }
    if m.vmax == 0 {
        return Err(invalid("vmax must be > 0"));
    }
    if !(1..=MAX_ACCEL_REG).contains(&m.amax) || !(1..=MAX_ACCEL_REG).contains(&m.dmax) {
        return Err(invalid("amax and dmax must be in 1..=65535"));
    }
    if m.current > 31 || m.hold_current > 31 {
        return Err(invalid("currents must be in 0..=31"));
    }
    if cfg.control.tick_hz == 0 || cfg.control.dropin_tick_hz == 0 {
        return Err(invalid("tick rates must be > 0"));
    }
    let threshold = cfg.control.control_threshold;
    if !threshold.is_finite() || threshold < 0.0 {
        return Err(invalid("control_threshold must be finite and >= 0"));
    }
    let g = cfg.estimator.gains;
    if !(g.kp.is_finite() && g.ki.is_finite()) || g.kp <= 0.0 || g.ki < 0.0 {
        return Err(invalid("estimator gains must be finite, kp > 0 and ki >= 0"));
    }
    let p = &cfg.pid;
    for v in [p.kp, p.ki, p.kd, p.hysteresis, p.output_margin, p.integral_limit] {
        if !v.is_finite() || v < 0.0 {
            return Err(invalid("pid parameters must be finite and >= 0"));
        }
    }
    let s = &cfg.stall;
    if !(0.0..1.0).contains(&s.sensitivity) {
        return Err(invalid("stall sensitivity must be in [0.0, 1.0)"));
    }
    if s.window_ticks == 0 {
        return Err(invalid("stall window must be >= 1 tick"));
    }
    if !(s.min_ratio > 0.0 && s.min_ratio <= 1.0) {
        return Err(invalid("stall min_ratio must be in (0.0, 1.0]"));
    }
    if !s.min_motion_steps.is_finite() || s.min_motion_steps < 0.0 {
        return Err(invalid("stall min_motion_steps must be finite and >= 0"));
    }
    if cfg.dropin.pulses_per_rev == 0 {
        return Err(invalid("pulses_per_rev must be > 0"));
    }
    Ok(())
}

/// Validate configuration, configure the driver, and construct a core homed
/// at the current shaft angle.
///
/// This is the single source of truth for validation and construction,
/// used by both `ControlCoreBuilder::try_build()` and `build_core()`.
fn validate_and_build<A: AngleSource, M: MotionActuator>(
    encoder: A,
    actuator: M,
    cfg: CoreConfig,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
    step_input: Option<StepInput>,
    tuning: Option<TuningRecord>,
) -> Result<ControlCore<A, M>> {
    validate(&cfg)?;

    let clock = clock.unwrap_or_else(|| Arc::new(MonotonicClock::new()));
    let units = Units::new(cfg.motion.microsteps_per_rev, cfg.motion.fclk_hz);
    let mode = cfg.control.initial_mode;
    let hz = match mode {
        crate::scheduler::OperatingMode::DropIn => cfg.control.dropin_tick_hz,
        _ => cfg.control.tick_hz,
    };
    let dt = crate::util::period_secs(hz);
    let invert_direction = cfg.motion.invert_direction;

    let mut core = ControlCore {
        units,
        clock,
        step_input: step_input.unwrap_or_default(),
        mode,
        estimator: PositionVelocityEstimator::new(
            cfg.estimator.gains,
            dt,
            0,
            cfg.estimator.invert ^ invert_direction,
        ),
        external: ExternalStepFilter::new(cfg.estimator.gains, dt, cfg.dropin.pulses_per_rev),
        stall: StallDetector::new(&cfg.stall),
        pid: ClosedLoopController::new(&cfg.pid),
        last_sample: AngleSample::default(),
        prev_actuator_pos: None,
        prev_accumulated: 0,
        control_error: 0.0,
        counters: Counters::default(),
        sensor_faults: FaultLog::default(),
        actuator_faults: FaultLog::default(),
        dir_sign: if invert_direction { -1 } else { 1 },
        velocity_limit: cfg.motion.vmax,
        accel: cfg.motion.amax,
        decel: cfg.motion.dmax,
        current: cfg.motion.current,
        hold_current: cfg.motion.hold_current,
        encoder,
        actuator,
        cfg,
    };

    match tuning {
        Some(record) => core.apply_tuning(&record)?,
        None => core.set_current(core.current)?,
    }
    core.apply_velocity_limit()?;
    core.apply_ramp_limits()?;
    core.set_home()?;

    tracing::info!(
        mode = ?core.mode,
        microsteps_per_rev = core.cfg.motion.microsteps_per_rev,
        period_us = core.period().as_micros(),
        "control core ready"
    );
    Ok(core)
}

impl<E, D> ControlCoreBuilder<E, D> {
    /// Fallible build available in any type-state; returns detailed error for missing pieces.
    pub fn try_build(self) -> Result<DynControlCore> {
        let encoder = self
            .encoder
            .ok_or_else(|| eyre::Report::new(BuildError::MissingEncoder))?;
        let actuator = self
            .actuator
            .ok_or_else(|| eyre::Report::new(BuildError::MissingDriver))?;
        validate_and_build(
            encoder,
            actuator,
            self.config.unwrap_or_default(),
            self.clock,
            self.step_input,
            self.tuning,
        )
    }
}

/// Chainable setters that do not affect type-state.
impl<E, D> ControlCoreBuilder<E, D> {
    pub fn with_config(mut self, config: CoreConfig) -> Self {
        self.config = Some(config);
        self
    }
    /// Provide a custom clock implementation; defaults to `MonotonicClock` when not provided.
    pub fn with_clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        self.clock = Some(clock);
        self
    }
    /// Share an external step counter (drop-in mode input).
    pub fn with_step_input(mut self, input: StepInput) -> Self {
        self.step_input = Some(input);
        self
    }
    /// Apply a stored tuning record on top of the configuration.
    pub fn with_tuning(mut self, record: TuningRecord) -> Self {
        self.tuning = Some(record);
        self
    }
}

// Setters that advance type-state
impl<D> ControlCoreBuilder<Missing, D> {
    pub fn with_encoder(
        self,
        encoder: impl AngleSource + Send + 'static,
    ) -> ControlCoreBuilder<Set, D> {
        ControlCoreBuilder {
            encoder: Some(Box::new(encoder)),
            actuator: self.actuator,
            config: self.config,
            clock: self.clock,
            step_input: self.step_input,
            tuning: self.tuning,
            _e: PhantomData,
            _d: PhantomData,
        }
    }
}

impl<E> ControlCoreBuilder<E, Missing> {
    pub fn with_actuator(
        self,
        actuator: impl MotionActuator + Send + 'static,
    ) -> ControlCoreBuilder<E, Set> {
        ControlCoreBuilder {
            encoder: self.encoder,
            actuator: Some(Box::new(actuator)),
            config: self.config,
            clock: self.clock,
            step_input: self.step_input,
            tuning: self.tuning,
            _e: PhantomData,
            _d: PhantomData,
        }
    }
}

impl ControlCoreBuilder<Set, Set> {
    /// Validate and build. Only available when the encoder and driver are set.
    pub fn build(self) -> Result<DynControlCore> {
        self.try_build()
    }
}

/// Build a statically dispatched core from a concrete encoder and driver.
///
/// Delegates to the shared `validate_and_build`.
pub fn build_core<A, M>(
    encoder: A,
    actuator: M,
    cfg: CoreConfig,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
    step_input: Option<StepInput>,
) -> Result<ControlCore<A, M>>
where
    A: AngleSource,
    M: MotionActuator,
{
    validate_and_build(encoder, actuator, cfg, clock, step_input, None)
}
