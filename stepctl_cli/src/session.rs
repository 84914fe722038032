//! Hardware assembly and the `run`, `self-check` and `tune` commands.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use eyre::WrapErr;
use stepctl_core::runner::{self, RunOptions, RunSummary, TickMode};
use stepctl_core::{
    ControlError, CoreConfig, DynControlCore, OperatingMode, StepInput, Telemetry,
};
use stepctl_hardware::{AxisParams, SimulatedAxis};
use stepctl_hardware::tmc5130::RampProfile;
use stepctl_traits::clock::{Clock, MonotonicClock};
use stepctl_traits::{AngleSource, DriverStatus, MotionActuator, TuningRecord};

use crate::cli::{Backend, ModeArg, RtArgs};
use crate::rt::{RtPlan, setup_rt_once};

/// Fault injected into the simulator, for exercising error paths end to end.
pub const SIM_FAULT_ENV: &str = "STEPCTL_TEST_SIM_FAULT";

const THREADED_POLL: Duration = Duration::from_millis(5);

/// Encoder and driver ready to hand to the builder.
pub struct Rig {
    pub encoder: Box<dyn AngleSource + Send>,
    pub actuator: Box<dyn MotionActuator + Send>,
    /// Simulator handle; `None` on real hardware.
    pub sim: Option<SimulatedAxis>,
    pub clock: Arc<dyn Clock + Send + Sync>,
}

fn ramp_profile(cfg: &stepctl_config::Config) -> RampProfile {
    RampProfile {
        vmax: cfg.driver.vmax,
        amax: cfg.driver.amax,
        dmax: cfg.driver.dmax,
        ..RampProfile::default()
    }
}

fn open_sim(cfg: &stepctl_config::Config) -> eyre::Result<Rig> {
    let clock: Arc<dyn Clock + Send + Sync> = Arc::new(MonotonicClock::new());
    let axis = SimulatedAxis::new(
        AxisParams {
            microsteps_per_rev: cfg.microsteps_per_rev(),
            fclk_hz: cfg.driver.fclk_hz,
            encoder_offset: 0,
            profile: ramp_profile(cfg),
        },
        Arc::clone(&clock),
    );
    if let Ok(fault) = std::env::var(SIM_FAULT_ENV) {
        match fault.as_str() {
            "absent" => axis.set_present(false),
            "encoder" => axis.set_encoder_fault(true),
            "driver" => axis.set_driver_fault(true),
            "parity" => axis.set_encoder_status(stepctl_traits::SampleStatus::PARITY),
            other => eyre::bail!("unknown {SIM_FAULT_ENV} value '{other}'"),
        }
        tracing::warn!(fault = %fault, "simulator fault injected");
    }
    Ok(Rig {
        encoder: Box::new(axis.encoder()),
        actuator: Box::new(axis.driver()),
        sim: Some(axis),
        clock,
    })
}

#[cfg(feature = "hardware")]
fn open_hardware(cfg: &stepctl_config::Config) -> eyre::Result<Rig> {
    use stepctl_hardware::transport::RppalSpi;
    use stepctl_hardware::{AeatEncoder, Tmc5130};

    let driver_spi = RppalSpi::open(cfg.driver.spi_bus, cfg.driver.spi_slave, cfg.driver.spi_clock_hz)
        .wrap_err("open driver SPI")?;
    let encoder_spi =
        RppalSpi::open(cfg.encoder.spi_bus, cfg.encoder.spi_slave, cfg.encoder.spi_clock_hz)
            .wrap_err("open encoder SPI")?;
    let mut driver = Tmc5130::new(driver_spi);
    driver
        .init(&ramp_profile(cfg), cfg.motor.current, cfg.motor.hold_current)
        .wrap_err("initialize TMC5130")?;
    Ok(Rig {
        encoder: Box::new(AeatEncoder::new(encoder_spi)),
        actuator: Box::new(driver),
        sim: None,
        clock: Arc::new(MonotonicClock::new()),
    })
}

#[cfg(not(feature = "hardware"))]
fn open_hardware(_cfg: &stepctl_config::Config) -> eyre::Result<Rig> {
    Err(eyre::Report::new(ControlError::Config(
        "hardware backend not compiled in; rebuild with --features hardware".into(),
    )))
}

pub fn open_rig(backend: Backend, cfg: &stepctl_config::Config) -> eyre::Result<Rig> {
    match backend {
        Backend::Sim => open_sim(cfg),
        Backend::Hardware => open_hardware(cfg),
    }
}

fn tuning_store(
    cfg: &stepctl_config::Config,
    explicit: Option<PathBuf>,
) -> Option<stepctl_config::FileParamStore> {
    explicit
        .or_else(|| cfg.persistence.path.as_ref().map(PathBuf::from))
        .map(stepctl_config::FileParamStore::new)
}

/// Build the core with `mode` as its startup mode and apply any stored tuning.
pub fn build_core(
    cfg: &stepctl_config::Config,
    rig: Rig,
    mode: Option<OperatingMode>,
    step_input: StepInput,
) -> eyre::Result<(DynControlCore, Option<SimulatedAxis>)> {
    let mut core_cfg = CoreConfig::from(cfg);
    if let Some(m) = mode {
        core_cfg.control.initial_mode = m;
    }
    let mut core = DynControlCore::builder()
        .with_config(core_cfg)
        .with_clock(rig.clock)
        .with_step_input(step_input)
        .with_encoder(rig.encoder)
        .with_actuator(rig.actuator)
        .build()?;
    if cfg.persistence.load_on_start
        && let Some(mut store) = tuning_store(cfg, None)
    {
        let loaded = core.load_tuning(&mut store)?;
        tracing::debug!(loaded, path = %store.path().display(), "startup tuning");
    }
    Ok((core, rig.sim))
}

/// Parameters of a `run` invocation.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub mode: Option<ModeArg>,
    pub duration: Duration,
    pub move_steps: Option<i32>,
    pub move_angle: Option<f64>,
    pub rpm: Option<f64>,
    pub dropin_rate: Option<i64>,
    pub block_after: Option<Duration>,
    pub direct: bool,
    pub rt: RtArgs,
}

/// Feeds simulated external step pulses at a fixed rate per tick.
#[derive(Debug)]
struct PulseFeeder {
    input: StepInput,
    rate: i64,
    fed: i64,
}

impl PulseFeeder {
    fn feed(&mut self, elapsed: Duration, period: Duration) {
        let due = (self.rate as f64 * elapsed.as_secs_f64() / period.as_secs_f64()) as i64;
        if due != self.fed {
            self.input.add(due - self.fed);
            self.fed = due;
        }
    }
}

pub fn run_session(
    backend: Backend,
    cfg: &stepctl_config::Config,
    req: &RunRequest,
    shutdown: Arc<AtomicBool>,
) -> eyre::Result<RunSummary> {
    let step_input = StepInput::new();
    let rig = open_rig(backend, cfg)?;
    let (mut core, sim) = build_core(cfg, rig, req.mode.map(Into::into), step_input.clone())?;

    if let Some(steps) = req.move_steps {
        core.move_steps(steps)?;
    } else if let Some(deg) = req.move_angle {
        core.move_angle(deg)?;
    } else if let Some(rpm) = req.rpm {
        core.set_rpm(rpm)?;
    }

    if req.dropin_rate.is_some() && core.mode() != OperatingMode::DropIn {
        tracing::warn!("--dropin-rate has no effect outside drop-in mode");
    }
    let mut feeder = req.dropin_rate.map(|rate| PulseFeeder {
        input: step_input,
        rate,
        fed: 0,
    });
    let blocker = match (req.block_after, sim) {
        (Some(after), Some(axis)) => Some((after, axis)),
        (Some(_), None) => {
            tracing::warn!("--block-after-ms only applies to the simulator");
            None
        }
        _ => None,
    };
    let mut blocked = false;

    setup_rt_once(RtPlan::resolve(&req.rt, &cfg.runner));

    let opts = RunOptions {
        duration: req.duration,
        mode: if req.direct {
            TickMode::Direct
        } else {
            TickMode::Threaded {
                poll: THREADED_POLL,
            }
        },
        abort: Some(shutdown),
        stop_at_end: true,
    };
    let (_core, summary) = runner::run(core, &opts, |core, elapsed| {
        if let Some(f) = feeder.as_mut() {
            f.feed(elapsed, core.period());
        }
        if let Some((after, axis)) = blocker.as_ref()
            && !blocked
            && elapsed >= *after
        {
            axis.set_blocked(true);
            blocked = true;
            tracing::info!(elapsed_ms = elapsed.as_millis(), "shaft blocked");
        }
    })
    .wrap_err("control session")?;
    Ok(summary)
}

/// Result of `self-check`.
#[derive(Debug, Clone, Copy)]
pub struct SelfCheck {
    pub encoder_angle_deg: f64,
    pub encoder_status: u8,
    pub driver: DriverStatus,
}

pub fn self_check(backend: Backend, cfg: &stepctl_config::Config) -> eyre::Result<SelfCheck> {
    let mut rig = open_rig(backend, cfg)?;
    if !rig.encoder.detect_presence() {
        return Err(eyre::Report::new(ControlError::SensorNotDetected))
            .wrap_err("encoder presence check");
    }
    let (mut core, _) = build_core(cfg, rig, None, StepInput::new())?;
    let driver = core.driver_status()?;
    if driver.driver_error {
        return Err(eyre::Report::new(ControlError::HardwareFault(
            "driver reports an error flag".into(),
        )));
    }
    let health = core.sensor_health();
    if !health.is_healthy() {
        return Err(eyre::Report::new(ControlError::HardwareFault(format!(
            "encoder status {:#04x}",
            health.status.bits()
        ))));
    }
    Ok(SelfCheck {
        encoder_angle_deg: core.encoder_angle(),
        encoder_status: health.status.bits(),
        driver,
    })
}

/// Parameters of a `tune` invocation.
#[derive(Debug, Clone, Default)]
pub struct TuneRequest {
    pub kp: Option<f32>,
    pub ki: Option<f32>,
    pub kd: Option<f32>,
    pub current: Option<u8>,
    pub hold_current: Option<u8>,
    pub store: Option<PathBuf>,
}

/// Merge the requested changes into the stored (or configured) tuning and
/// persist it. Returns the record written.
pub fn tune(
    backend: Backend,
    cfg: &stepctl_config::Config,
    req: &TuneRequest,
) -> eyre::Result<TuningRecord> {
    let mut store = tuning_store(cfg, req.store.clone()).ok_or_else(|| {
        eyre::Report::new(ControlError::Config(
            "no tuning store: set [persistence].path or pass --store".into(),
        ))
    })?;
    let rig = open_rig(backend, cfg)?;
    let (mut core, _) = build_core(cfg, rig, None, StepInput::new())?;
    // build_core only loads on start when configured; tune always merges.
    core.load_tuning(&mut store)?;

    if let Some(kp) = req.kp {
        core.set_proportional(kp);
    }
    if let Some(ki) = req.ki {
        core.set_integral(ki);
    }
    if let Some(kd) = req.kd {
        core.set_differential(kd);
    }
    if let Some(run) = req.current {
        core.set_current(run)?;
    }
    if let Some(hold) = req.hold_current {
        core.set_hold_current(hold)?;
    }
    core.save_tuning(&mut store)?;
    Ok(core.tuning())
}

/// Flat summary used by both output formats.
pub fn telemetry_json(t: &Telemetry) -> serde_json::Value {
    serde_json::json!({
        "mode": mode_name(t.mode),
        "ticks": t.ticks,
        "angle_deg": t.angle_moved_deg,
        "accumulated": t.accumulated,
        "speed_rpm": t.speed_rpm,
        "stalled": t.stalled,
        "stalls": t.stalls,
        "rebases": t.rebases,
        "gated_samples": t.gated_samples,
        "sensor_faults": t.sensor_faults,
        "actuator_faults": t.actuator_faults,
        "control_error": t.control_error,
        "pid_enabled": t.pid_enabled,
    })
}

pub fn mode_name(m: OperatingMode) -> &'static str {
    match m {
        OperatingMode::Normal => "normal",
        OperatingMode::ClosedLoopPositionHold => "closed-loop",
        OperatingMode::DropIn => "drop-in",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feeder_tracks_elapsed_ticks() {
        let input = StepInput::new();
        let mut f = PulseFeeder {
            input: input.clone(),
            rate: 3,
            fed: 0,
        };
        let period = Duration::from_millis(1);
        f.feed(Duration::from_millis(10), period);
        assert_eq!(input.count(), 30);
        f.feed(Duration::from_millis(10), period);
        assert_eq!(input.count(), 30);
        f.feed(Duration::from_millis(25), period);
        assert_eq!(input.count(), 75);
    }

    #[test]
    fn negative_rate_counts_down() {
        let input = StepInput::new();
        let mut f = PulseFeeder {
            input: input.clone(),
            rate: -2,
            fed: 0,
        };
        f.feed(Duration::from_millis(5), Duration::from_millis(1));
        assert_eq!(input.count(), -10);
    }

    #[test]
    fn missing_store_is_a_config_error() {
        let cfg = stepctl_config::Config::default();
        let err = tune(Backend::Sim, &cfg, &TuneRequest::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ControlError>(),
            Some(ControlError::Config(_))
        ));
    }
}
