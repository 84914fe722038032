//! Periodic tick thread.
//!
//! Spawns one thread that calls a tick closure at the period the closure
//! returns, pushes each report through a bounded channel (oldest dropped when
//! full), and tracks missed deadlines and worst-case execution time.
//!
//! Each `Ticker` owns exactly one thread, shut down and joined on drop.
use crossbeam_channel as xch;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use stepctl_traits::clock::Clock;

/// Reports kept for consumers that poll less often than the tick rate.
pub const DEFAULT_REPORT_CAPACITY: usize = 64;

#[derive(Debug, Default)]
struct Counters {
    ticks: AtomicU64,
    missed: AtomicU64,
    worst_exec_us: AtomicU64,
}

/// Snapshot of the tick thread's timing counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickerStats {
    pub ticks: u64,
    /// Ticks whose execution took longer than their period.
    pub missed: u64,
    pub worst_exec: Duration,
}

pub struct Ticker<T> {
    rx: xch::Receiver<T>,
    counters: Arc<Counters>,
    shutdown: Arc<AtomicBool>,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl<T: Send + 'static> Ticker<T> {
    /// Spawn the tick thread. `tick` returns its report and the period to
    /// wait before the next call.
    pub fn spawn<F>(
        mut tick: F,
        period: Duration,
        clock: Arc<dyn Clock + Send + Sync>,
        capacity: usize,
    ) -> Self
    where
        F: FnMut() -> (T, Duration) + Send + 'static,
    {
        let (tx, rx) = xch::bounded(capacity.max(1));
        let overflow_rx = rx.clone();
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();
        let counters = Arc::new(Counters::default());
        let counters_clone = counters.clone();

        let join_handle = std::thread::spawn(move || {
            let mut period = period;
            tracing::debug!(period_us = period.as_micros(), "tick thread started");
            loop {
                if shutdown_clone.load(Ordering::Relaxed) {
                    tracing::debug!("tick thread received shutdown signal");
                    break;
                }

                let started = clock.now();
                let (report, next) = tick();
                let exec = clock.elapsed_since(started);

                counters_clone.ticks.fetch_add(1, Ordering::Relaxed);
                let exec_us = crate::util::as_micros_u64(exec);
                counters_clone
                    .worst_exec_us
                    .fetch_max(exec_us, Ordering::Relaxed);
                if exec > period {
                    let missed = counters_clone.missed.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::warn!(
                        exec_us,
                        period_us = period.as_micros(),
                        missed,
                        "tick deadline missed"
                    );
                }

                if let Err(xch::TrySendError::Full(report)) = tx.try_send(report) {
                    let _ = overflow_rx.try_recv();
                    let _ = tx.try_send(report);
                }

                if shutdown_clone.load(Ordering::Relaxed) {
                    break;
                }
                let remaining = next.saturating_sub(exec);
                if !remaining.is_zero() {
                    clock.sleep(remaining);
                }
                period = next;
            }
            tracing::trace!("tick thread exiting cleanly");
        });

        Self {
            rx,
            counters,
            shutdown,
            join_handle: Some(join_handle),
        }
    }

    /// Most recent report, discarding older ones.
    pub fn latest(&self) -> Option<T> {
        self.rx.try_iter().last()
    }

    /// Every report currently queued, oldest first.
    pub fn drain(&self) -> Vec<T> {
        self.rx.try_iter().collect()
    }

    /// Wait up to `timeout` for the next report.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        self.rx.recv_timeout(timeout).ok()
    }

    pub fn stats(&self) -> TickerStats {
        TickerStats {
            ticks: self.counters.ticks.load(Ordering::Relaxed),
            missed: self.counters.missed.load(Ordering::Relaxed),
            worst_exec: Duration::from_micros(self.counters.worst_exec_us.load(Ordering::Relaxed)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.join_handle
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

impl<T> Drop for Ticker<T> {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.join_handle.take() {
            match handle.join() {
                Ok(()) => {
                    tracing::trace!("tick thread joined successfully");
                }
                Err(e) => {
                    tracing::warn!(?e, "tick thread panicked during shutdown");
                }
            }
        }
    }
}
