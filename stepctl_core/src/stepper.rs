//! Threaded handle: a `ControlCore` behind a mutex, ticked by a `Ticker`.
//!
//! The mutex is the hosted stand-in for masking the tick interrupt. The tick
//! thread and foreground calls each hold it for one call, so every tick sees
//! a consistent core.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use stepctl_traits::{AngleSource, Direction, MotionActuator};

use crate::builder::{DynActuator, DynEncoder};
use crate::core::{ControlCore, STOP_POLL};
use crate::error::{ControlError, Result};
use crate::scheduler::{OperatingMode, TickReport};
use crate::status::{StopMode, Telemetry};
use crate::ticker::{DEFAULT_REPORT_CAPACITY, Ticker, TickerStats};

pub struct Stepper<A = DynEncoder, M = DynActuator>
where
    A: AngleSource + Send + 'static,
    M: MotionActuator + Send + 'static,
{
    core: Arc<Mutex<ControlCore<A, M>>>,
    ticker: Ticker<TickReport>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<A, M> Stepper<A, M>
where
    A: AngleSource + Send + 'static,
    M: MotionActuator + Send + 'static,
{
    /// Move the core onto a tick thread running at the mode's period.
    pub fn start(core: ControlCore<A, M>) -> Self {
        let period = core.period();
        let clock = core.clock().clone();
        let core = Arc::new(Mutex::new(core));
        let tick_core = core.clone();
        let ticker = Ticker::spawn(
            move || {
                let mut c = lock(&tick_core);
                let report = c.tick();
                (report, c.period())
            },
            period,
            clock,
            DEFAULT_REPORT_CAPACITY,
        );
        tracing::debug!(period_us = period.as_micros(), "stepper started");
        Self { core, ticker }
    }

    /// Run `f` with exclusive access to the core.
    pub fn with_core<R>(&self, f: impl FnOnce(&mut ControlCore<A, M>) -> R) -> R {
        f(&mut lock(&self.core))
    }

    pub fn move_steps(&self, steps: i32) -> Result<()> {
        self.with_core(|c| c.move_steps(steps))
    }

    pub fn move_angle(&self, degrees: f64) -> Result<()> {
        self.with_core(|c| c.move_angle(degrees))
    }

    pub fn move_to_angle(&self, degrees: f64) -> Result<()> {
        self.with_core(|c| c.move_to_angle(degrees))
    }

    pub fn run_continuous(&self, direction: Direction) -> Result<()> {
        self.with_core(|c| c.run_continuous(direction))
    }

    pub fn set_rpm(&self, rpm: f64) -> Result<()> {
        self.with_core(|c| c.set_rpm(rpm))
    }

    pub fn set_mode(&self, mode: OperatingMode) -> Result<()> {
        self.with_core(|c| c.set_mode(mode))
    }

    pub fn set_home(&self) -> Result<()> {
        self.with_core(ControlCore::set_home)
    }

    /// Stop the motor. The immediate variant polls for standstill without
    /// holding the lock, so ticks keep running while the driver decelerates.
    pub fn stop(&self, mode: StopMode) -> Result<()> {
        let clock = self.with_core(|c| {
            c.begin_stop(mode)?;
            Ok::<_, eyre::Report>(c.clock().clone())
        })?;
        if mode == StopMode::Immediate {
            while !self.with_core(ControlCore::is_standstill)? {
                clock.sleep(STOP_POLL);
            }
        }
        Ok(())
    }

    pub fn is_stalled(&self) -> bool {
        self.with_core(|c| c.is_stalled())
    }

    pub fn clear_stall(&self) {
        self.with_core(ControlCore::clear_stall);
    }

    pub fn telemetry(&self) -> Telemetry {
        self.with_core(|c| c.telemetry())
    }

    /// Most recent tick report; older queued reports are discarded.
    pub fn latest_report(&self) -> Option<TickReport> {
        self.ticker.latest()
    }

    /// Wait up to `timeout` for the next tick report.
    pub fn next_report(&self, timeout: Duration) -> Option<TickReport> {
        self.ticker.recv_timeout(timeout)
    }

    pub fn stats(&self) -> TickerStats {
        self.ticker.stats()
    }

    /// Stop the tick thread and hand the core back.
    pub fn shutdown(self) -> Result<ControlCore<A, M>> {
        let Self { core, ticker } = self;
        drop(ticker);
        Arc::try_unwrap(core)
            .map(|m| m.into_inner().unwrap_or_else(PoisonError::into_inner))
            .map_err(|_| {
                eyre::Report::new(ControlError::State("core still shared after shutdown".into()))
            })
    }
}
