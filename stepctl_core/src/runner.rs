//! Timed control sessions: drive a core for a fixed duration, either by
//! ticking on the calling thread or on a dedicated `Ticker` thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use stepctl_traits::{AngleSource, MotionActuator};

use crate::core::ControlCore;
use crate::error::Result;
use crate::scheduler::TickReport;
use crate::status::{StopMode, Telemetry};
use crate::stepper::Stepper;
use crate::ticker::TickerStats;

/// Upper bound on the wait for a threaded session's first tick.
const FIRST_TICK_TIMEOUT: Duration = Duration::from_secs(1);

/// How ticks are scheduled during a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TickMode {
    /// Tick on the calling thread, sleeping one period between ticks.
    #[default]
    Direct,
    /// Tick on a dedicated thread; the caller polls every `poll`.
    Threaded { poll: Duration },
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub duration: Duration,
    pub mode: TickMode,
    /// Set from another thread (e.g. a signal handler) to end the session early.
    pub abort: Option<Arc<AtomicBool>>,
    /// Stop gracefully when the session ends.
    pub stop_at_end: bool,
}

/// Outcome of a session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    pub telemetry: Telemetry,
    pub last_report: Option<TickReport>,
    /// Tick thread timing; `None` for direct sessions.
    pub stats: Option<TickerStats>,
    pub aborted: bool,
}

fn aborted(flag: Option<&Arc<AtomicBool>>) -> bool {
    flag.is_some_and(|f| f.load(Ordering::Relaxed))
}

/// Run `core` for `opts.duration`, calling `hook` after every tick (direct)
/// or every poll (threaded) with the elapsed session time.
pub fn run<A, M, H>(
    core: ControlCore<A, M>,
    opts: &RunOptions,
    hook: H,
) -> Result<(ControlCore<A, M>, RunSummary)>
where
    A: AngleSource + Send + 'static,
    M: MotionActuator + Send + 'static,
    H: FnMut(&mut ControlCore<A, M>, Duration),
{
    tracing::info!(
        mode = ?core.mode(),
        duration_ms = opts.duration.as_millis(),
        tick_mode = ?opts.mode,
        "session start"
    );
    let out = match opts.mode {
        TickMode::Direct => run_direct(core, opts, hook),
        TickMode::Threaded { poll } => run_threaded(core, opts, poll, hook),
    }?;
    tracing::info!(
        ticks = out.1.telemetry.ticks,
        stalls = out.1.telemetry.stalls,
        aborted = out.1.aborted,
        "session end"
    );
    Ok(out)
}

fn run_direct<A, M, H>(
    mut core: ControlCore<A, M>,
    opts: &RunOptions,
    mut hook: H,
) -> Result<(ControlCore<A, M>, RunSummary)>
where
    A: AngleSource,
    M: MotionActuator,
    H: FnMut(&mut ControlCore<A, M>, Duration),
{
    let clock = core.clock().clone();
    let start = clock.now();
    let mut last_report = None;
    let mut was_aborted = false;

    while clock.elapsed_since(start) < opts.duration {
        if aborted(opts.abort.as_ref()) {
            was_aborted = true;
            break;
        }
        last_report = Some(core.tick());
        hook(&mut core, clock.elapsed_since(start));
        clock.sleep(core.period());
    }

    if opts.stop_at_end {
        core.stop(StopMode::Graceful)?;
    }
    let summary = RunSummary {
        telemetry: core.telemetry(),
        last_report,
        stats: None,
        aborted: was_aborted,
    };
    Ok((core, summary))
}

fn run_threaded<A, M, H>(
    core: ControlCore<A, M>,
    opts: &RunOptions,
    poll: Duration,
    mut hook: H,
) -> Result<(ControlCore<A, M>, RunSummary)>
where
    A: AngleSource + Send + 'static,
    M: MotionActuator + Send + 'static,
    H: FnMut(&mut ControlCore<A, M>, Duration),
{
    let clock = core.clock().clone();
    let stepper = Stepper::start(core);
    // The session clock starts with the first tick, so a session never ends
    // before the tick thread has run.
    let first_report = stepper.next_report(FIRST_TICK_TIMEOUT);
    if first_report.is_none() {
        tracing::warn!(
            timeout_ms = FIRST_TICK_TIMEOUT.as_millis(),
            "tick thread produced no report"
        );
    }
    let start = clock.now();
    let mut was_aborted = false;

    while clock.elapsed_since(start) < opts.duration {
        if aborted(opts.abort.as_ref()) {
            was_aborted = true;
            break;
        }
        let elapsed = clock.elapsed_since(start);
        stepper.with_core(|c| hook(c, elapsed));
        clock.sleep(poll);
    }

    if opts.stop_at_end {
        stepper.stop(StopMode::Graceful)?;
    }
    let stats = stepper.stats();
    let last_report = stepper.latest_report().or(first_report);
    let core = stepper.shutdown()?;
    let summary = RunSummary {
        telemetry: core.telemetry(),
        last_report,
        stats: Some(stats),
        aborted: was_aborted,
    };
    Ok((core, summary))
}
