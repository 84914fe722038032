//! External step/direction pulse counter.
//!
//! Stands in for the step-pin edge interrupt: producers call `pulse` from
//! any thread, the tick handler reads `count` once per tick. Lock-free.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use stepctl_traits::Direction;

#[derive(Debug, Clone, Default)]
pub struct StepInput {
    count: Arc<AtomicI64>,
}

impl StepInput {
    pub fn new() -> Self {
        Self::default()
    }

    /// One step edge with the direction pin's current level.
    #[inline]
    pub fn pulse(&self, direction: Direction) {
        self.count
            .fetch_add(i64::from(direction.signum()), Ordering::Relaxed);
    }

    #[inline]
    pub fn add(&self, delta: i64) {
        self.count.fetch_add(delta, Ordering::Relaxed);
    }

    #[inline]
    pub fn count(&self) -> i64 {
        self.count.load(Ordering::Relaxed)
    }
}
