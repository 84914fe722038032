//! Closed-loop position hold and stall supervision on the simulated axis.

use std::sync::Arc;
use std::time::Duration;

use rstest::{fixture, rstest};
use stepctl_core::{CoreConfig, DynControlCore, OperatingMode, StallStrategy};
use stepctl_hardware::{AxisParams, SimulatedAxis};
use stepctl_traits::{Clock, Direction, ManualClock};

const TICK: Duration = Duration::from_micros(500);

struct Rig {
    core: DynControlCore,
    axis: SimulatedAxis,
    clock: ManualClock,
}

impl Rig {
    fn new(cfg: CoreConfig) -> Self {
        let clock = ManualClock::new();
        let shared: Arc<dyn Clock + Send + Sync> = Arc::new(clock.clone());
        let axis = SimulatedAxis::new(AxisParams::default(), shared.clone());
        let core = DynControlCore::builder()
            .with_encoder(axis.encoder())
            .with_actuator(axis.driver())
            .with_config(cfg)
            .with_clock(shared)
            .build()
            .expect("build");
        Self { core, axis, clock }
    }

    fn run(&mut self, ticks: usize) -> Vec<stepctl_core::TickReport> {
        (0..ticks)
            .map(|_| {
                self.clock.advance(TICK);
                self.core.tick()
            })
            .collect()
    }
}

#[fixture]
fn hold() -> Rig {
    let mut cfg = CoreConfig::default();
    cfg.control.initial_mode = OperatingMode::ClosedLoopPositionHold;
    Rig::new(cfg)
}

#[rstest]
fn free_move_completes_without_rebase(mut hold: Rig) {
    hold.core.move_steps(25_600).unwrap();
    let reports = hold.run(4_000);

    assert!(reports.iter().all(|r| !r.rebased && !r.stalled));
    assert_eq!(hold.axis.actual_position(), 25_600.0);
    assert!((hold.core.angle_moved() - 180.0).abs() < 0.01);
    assert!(hold.core.pid_error().abs() <= 1.0);
}

#[rstest]
fn blocked_shaft_rebases_driver_and_flags_ratio_stall(mut hold: Rig) {
    hold.core.move_steps(51_200).unwrap();
    hold.run(40);
    hold.axis.set_blocked(true);
    let shaft = hold.axis.shaft_position();

    let reports = hold.run(1_000);

    let rebases = reports.iter().filter(|r| r.rebased).count();
    assert!(rebases > 0, "driver never re-based");
    // Each re-base pulls the driver counter back to the encoder reading.
    let encoder_steps = (shaft * 65_536.0 / 51_200.0).floor() * 51_200.0 / 65_536.0;
    let drift = (hold.axis.actual_position() - encoder_steps).abs();
    assert!(drift <= 10.0 + 200.0, "driver drifted {drift} steps from the shaft");
    assert!(reports.iter().all(|r| r.control_error.abs() < 400.0));

    assert!(hold.core.is_stalled());
    let t = hold.core.telemetry();
    assert_eq!(t.stalls, 1);
    assert_eq!(t.rebases, rebases as u64);

    // The ratio policy carries the flag in this mode.
    assert!(hold.core.stall_detector().confidence().confidence() < 0.992);
}

#[rstest]
fn clear_stall_resets_the_flag(mut hold: Rig) {
    hold.core.move_steps(51_200).unwrap();
    hold.axis.set_blocked(true);
    hold.run(600);
    assert!(hold.core.is_stalled());

    hold.core.clear_stall();
    assert!(!hold.core.is_stalled());
}

#[rstest]
fn unblocked_shaft_clears_ratio_flag(mut hold: Rig) {
    hold.core.move_steps(51_200).unwrap();
    hold.axis.set_blocked(true);
    hold.run(600);
    assert!(hold.core.is_stalled());

    hold.axis.set_blocked(false);
    hold.run(200);
    assert!(!hold.core.is_stalled());
}

#[test]
fn normal_mode_confidence_stall_on_blocked_shaft() {
    let mut rig = Rig::new(CoreConfig::default());
    rig.core.run_continuous(Direction::Clockwise).unwrap();
    rig.run(200);
    assert!(!rig.core.is_stalled());

    rig.axis.set_blocked(true);
    let reports = rig.run(3_000);
    let first = reports.iter().position(|r| r.stalled).expect("stall flagged");
    assert!(first >= 100, "flag rose after {first} ticks");
    assert!(reports.iter().all(|r| !r.rebased));
    assert_eq!(rig.core.telemetry().stalls, 1);
}

#[test]
fn forced_ratio_strategy_applies_in_normal_mode() {
    let mut cfg = CoreConfig::default();
    cfg.stall.strategy = StallStrategy::Ratio;
    let mut rig = Rig::new(cfg);
    rig.core.run_continuous(Direction::Clockwise).unwrap();
    rig.axis.set_blocked(true);
    rig.run(600);
    assert!(rig.core.is_stalled());
    assert_eq!(rig.core.stall_detector().confidence().confidence(), 0.0);
}

#[test]
fn stop_on_stall_brings_the_motor_to_rest() {
    let mut cfg = CoreConfig::default();
    cfg.stall.stop_on_stall = true;
    let mut rig = Rig::new(cfg);
    rig.core.run_continuous(Direction::Clockwise).unwrap();
    rig.run(400);
    rig.axis.set_blocked(true);
    rig.run(3_000);

    assert!(rig.core.is_stalled());
    assert_eq!(rig.axis.velocity_steps_per_s(), 0.0);
    assert!(rig.core.is_standstill().unwrap());
}
