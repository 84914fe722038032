//! Encoder-side estimation through the full tick path.

use stepctl_core::mocks::{RecordingActuator, ScriptedEncoder, flagged_sample};
use stepctl_core::{CoreConfig, DynControlCore};
use stepctl_traits::SampleStatus;

fn core_with(encoder: &ScriptedEncoder, cfg: CoreConfig) -> DynControlCore {
    DynControlCore::builder()
        .with_encoder(encoder.clone())
        .with_actuator(RecordingActuator::new())
        .with_config(cfg)
        .build()
        .expect("build")
}

#[test]
fn linear_ramp_accumulates_exactly_and_velocity_converges() {
    let encoder = ScriptedEncoder::new();
    encoder.push(0);
    let mut core = core_with(&encoder, CoreConfig::default());

    encoder.push_ramp(0, 100, 100);
    for _ in 0..100 {
        core.tick();
    }
    assert_eq!(core.estimator().accumulated(), 10_000);

    // Keep ramping (wrapping several times) until the filter settles.
    let last = core.estimator().previous_raw();
    encoder.push_ramp(last, 100, 1_900);
    for _ in 0..1_900 {
        core.tick();
    }
    assert_eq!(core.estimator().accumulated(), 200_000);
    let per_tick = core.estimator().velocity_per_tick();
    assert!((per_tick - 100.0).abs() < 0.5, "velocity {per_tick} units/tick");
}

#[test]
fn backwards_ramp_through_wrap_counts_negative() {
    let encoder = ScriptedEncoder::new();
    encoder.push(100);
    let mut core = core_with(&encoder, CoreConfig::default());

    encoder.push_ramp(100, -256, 256);
    for _ in 0..256 {
        core.tick();
    }
    assert_eq!(core.estimator().accumulated(), -65_536);
    assert!((core.angle_moved() + 360.0).abs() < 1e-9);
}

#[test]
fn encoder_invert_flips_sign() {
    let encoder = ScriptedEncoder::new();
    encoder.push(0);
    let mut cfg = CoreConfig::default();
    cfg.estimator.invert = true;
    let mut core = core_with(&encoder, cfg);

    encoder.push_ramp(0, 50, 10);
    for _ in 0..10 {
        core.tick();
    }
    assert_eq!(core.estimator().accumulated(), -500);
}

#[test]
fn set_home_twice_leaves_zero_state() {
    let encoder = ScriptedEncoder::new();
    encoder.push(0);
    let mut core = core_with(&encoder, CoreConfig::default());
    encoder.push_ramp(0, 300, 50);
    for _ in 0..50 {
        core.tick();
    }
    assert_ne!(core.estimator().accumulated(), 0);

    for _ in 0..2 {
        core.set_home().unwrap();
        let est = core.estimator();
        assert_eq!(est.accumulated(), 0);
        assert_eq!(est.filtered_velocity(), 0.0);
        assert_eq!(est.filtered_position(), 0.0);
        assert_eq!(est.velocity_integrator(), 0.0);
        assert_eq!(est.position_error(), 0.0);
    }

    // The wrap reference moved with home: holding still adds nothing.
    core.tick();
    assert_eq!(core.estimator().accumulated(), 0);
}

#[test]
fn health_gate_skips_flagged_samples() {
    let encoder = ScriptedEncoder::new();
    encoder.push(0);
    let mut cfg = CoreConfig::default();
    cfg.estimator.health_gate = true;
    let mut core = core_with(&encoder, cfg);

    encoder.push(100);
    encoder.push_sample(flagged_sample(30_000, SampleStatus::MAG_LOW));
    encoder.push(200);

    assert!(!core.tick().gated);
    let gated = core.tick();
    assert!(gated.gated);
    assert_eq!(gated.accumulated, 100);
    assert!(!core.tick().gated);

    assert_eq!(core.estimator().accumulated(), 200);
    assert_eq!(core.telemetry().gated_samples, 1);
    assert!(core.sensor_health().is_healthy());
}

#[test]
fn without_gate_flagged_samples_are_trusted() {
    let encoder = ScriptedEncoder::new();
    encoder.push(0);
    let mut core = core_with(&encoder, CoreConfig::default());

    encoder.push_sample(flagged_sample(500, SampleStatus::PARITY));
    let report = core.tick();
    assert!(!report.gated);
    assert_eq!(report.accumulated, 500);

    let health = core.sensor_health();
    assert!(health.present);
    assert!(health.status.parity_error());
    assert!(!health.is_healthy());
}

#[test]
fn sensor_faults_are_counted_not_raised() {
    let encoder = ScriptedEncoder::new();
    encoder.push(0);
    let mut core = core_with(&encoder, CoreConfig::default());

    encoder.push(10);
    encoder.push_error("spi glitch");
    encoder.push_error("spi glitch");
    encoder.push(20);

    assert!(!core.tick().sensor_fault);
    assert!(core.tick().sensor_fault);
    assert!(core.tick().sensor_fault);
    let ok = core.tick();
    assert!(!ok.sensor_fault);
    assert_eq!(ok.accumulated, 20);

    let t = core.telemetry();
    assert_eq!(t.ticks, 4);
    assert_eq!(t.sensor_faults, 2);
    assert_eq!(core.sensor_health().read_faults, 2);
}
