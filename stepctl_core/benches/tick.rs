use std::sync::Arc;
use std::time::Duration;

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use stepctl_core::mocks::{RecordingActuator, ScriptedEncoder};
use stepctl_core::{CoreConfig, DynControlCore, OperatingMode, StepInput};
use stepctl_hardware::{AxisParams, SimulatedAxis};
use stepctl_traits::{Clock, ManualClock};

fn configure(g: &mut criterion::BenchmarkGroup<'_, criterion::measurement::WallTime>) {
    // Allow quick tweaking without CLI flags (Criterion 0.5):
    //   BENCH_SAMPLE_SIZE=10 BENCH_MEAS_MS=50 cargo bench -p stepctl_core --bench tick
    if let Ok(ss) = std::env::var("BENCH_SAMPLE_SIZE") {
        if let Ok(n) = ss.parse::<usize>() {
            g.sample_size(n.max(10));
        }
    } else {
        g.sample_size(50);
    }
    if let Ok(ms) = std::env::var("BENCH_MEAS_MS")
        && let Ok(ms_u64) = ms.parse::<u64>()
    {
        g.measurement_time(Duration::from_millis(ms_u64));
    }
}

/// Tick cost without the simulator: mocks return immediately.
pub fn bench_tick_mocked(c: &mut Criterion) {
    let mut g = c.benchmark_group("tick_mocked");
    configure(&mut g);

    for mode in [
        OperatingMode::Normal,
        OperatingMode::ClosedLoopPositionHold,
        OperatingMode::DropIn,
    ] {
        let encoder = ScriptedEncoder::new();
        let driver = RecordingActuator::new();
        let input = StepInput::new();
        let mut cfg = CoreConfig::default();
        cfg.control.initial_mode = mode;
        let Ok(mut core) = DynControlCore::builder()
            .with_encoder(encoder.clone())
            .with_actuator(driver.clone())
            .with_config(cfg)
            .with_step_input(input.clone())
            .build()
        else {
            continue;
        };
        let mut raw = 0u16;
        g.bench_function(format!("{mode:?}"), |b| {
            b.iter(|| {
                raw = raw.wrapping_add(37);
                if raw < 37 {
                    driver.clear_calls();
                }
                encoder.push(raw);
                input.add(3);
                black_box(core.tick());
            })
        });
    }
    g.finish();
}

/// Tick cost against the simulated axis, including its physics step.
pub fn bench_tick_simulated(c: &mut Criterion) {
    let mut g = c.benchmark_group("tick_simulated");
    configure(&mut g);

    let clock = ManualClock::new();
    let shared: Arc<dyn Clock + Send + Sync> = Arc::new(clock.clone());
    let axis = SimulatedAxis::new(AxisParams::default(), shared.clone());
    let input = StepInput::new();
    let mut cfg = CoreConfig::default();
    cfg.control.initial_mode = OperatingMode::DropIn;
    let Ok(mut core) = DynControlCore::builder()
        .with_encoder(axis.encoder())
        .with_actuator(axis.driver())
        .with_config(cfg)
        .with_clock(shared)
        .with_step_input(input.clone())
        .build()
    else {
        return;
    };

    g.bench_function("drop_in", |b| {
        b.iter(|| {
            input.add(5);
            clock.advance(Duration::from_millis(1));
            black_box(core.tick());
        })
    });
    g.finish();
}

criterion_group!(tick, bench_tick_mocked, bench_tick_simulated);
criterion_main!(tick);
