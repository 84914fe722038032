//! Stall detection: commanded motion (driver position counter) versus
//! observed motion (encoder), both in microsteps per tick.
//!
//! Two independent policies implement `StallPolicy`:
//! - `ConfidenceStall`: exponentially smoothed magnitudes feeding a
//!   confidence accumulator, tuned by a single sensitivity.
//! - `RatioStall`: windowed sums of commanded and observed motion compared
//!   by ratio.
//!
//! A raised flag stays latched until `clear` or until a tick (or window)
//! with commanded motion shows the shaft keeping up again.

use crate::config::{StallCfg, StallStrategy};
use crate::scheduler::OperatingMode;

/// Upper bound for the confidence sensitivity; 1.0 would never react.
pub const MAX_SENSITIVITY: f64 = 0.999;

pub trait StallPolicy {
    /// Feed one tick of observed and commanded motion; returns the flag.
    fn evaluate(&mut self, observed: f64, commanded: f64) -> bool;
    fn is_stalled(&self) -> bool;
    fn clear(&mut self);
}

#[derive(Debug, Clone)]
pub struct ConfidenceStall {
    sensitivity: f64,
    observed_smooth: f64,
    commanded_smooth: f64,
    confidence: f64,
    stalled: bool,
}

impl ConfidenceStall {
    pub fn new(sensitivity: f64) -> Self {
        Self {
            sensitivity: clamp_sensitivity(sensitivity),
            observed_smooth: 0.0,
            commanded_smooth: 0.0,
            confidence: 0.0,
            stalled: false,
        }
    }

    pub fn set_sensitivity(&mut self, sensitivity: f64) {
        self.sensitivity = clamp_sensitivity(sensitivity);
    }

    #[inline]
    pub fn sensitivity(&self) -> f64 {
        self.sensitivity
    }

    #[inline]
    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Number of ticks of zero observed motion against constant commanded
    /// motion before the flag rises.
    pub fn ticks_to_detect(sensitivity: f64) -> u32 {
        let s = clamp_sensitivity(sensitivity);
        if s <= 0.0 {
            return 1;
        }
        // confidence after n ticks is 1 - s^n
        ((1.0 - s).ln() / s.ln()).ceil().max(1.0) as u32
    }
}

fn clamp_sensitivity(s: f64) -> f64 {
    if s.is_finite() {
        s.clamp(0.0, MAX_SENSITIVITY)
    } else {
        0.0
    }
}

impl StallPolicy for ConfidenceStall {
    fn evaluate(&mut self, observed: f64, commanded: f64) -> bool {
        let s = self.sensitivity;
        self.observed_smooth = s * self.observed_smooth + (1.0 - s) * observed.abs();
        self.commanded_smooth = s * self.commanded_smooth + (1.0 - s) * commanded.abs();

        let lagging = self.observed_smooth < 0.5 * self.commanded_smooth;
        if lagging {
            self.confidence = s * self.confidence + (1.0 - s);
        } else {
            self.confidence *= s;
        }

        if lagging && self.confidence >= s {
            self.stalled = true;
        } else if !lagging && commanded != 0.0 && self.confidence < s {
            self.stalled = false;
        }
        self.stalled
    }

    fn is_stalled(&self) -> bool {
        self.stalled
    }

    fn clear(&mut self) {
        self.observed_smooth = 0.0;
        self.commanded_smooth = 0.0;
        self.confidence = 0.0;
        self.stalled = false;
    }
}

#[derive(Debug, Clone)]
pub struct RatioStall {
    window_ticks: u32,
    min_ratio: f64,
    min_motion: f64,
    observed_sum: f64,
    commanded_sum: f64,
    ticks: u32,
    stalled: bool,
}

impl RatioStall {
    pub fn new(window_ticks: u32, min_ratio: f64, min_motion: f64) -> Self {
        Self {
            window_ticks: window_ticks.max(1),
            min_ratio,
            min_motion,
            observed_sum: 0.0,
            commanded_sum: 0.0,
            ticks: 0,
            stalled: false,
        }
    }
}

impl StallPolicy for RatioStall {
    fn evaluate(&mut self, observed: f64, commanded: f64) -> bool {
        self.observed_sum += observed;
        self.commanded_sum += commanded;
        self.ticks += 1;
        if self.ticks < self.window_ticks {
            return self.stalled;
        }

        let cmd = self.commanded_sum.abs();
        if cmd >= self.min_motion {
            let ratio = self.observed_sum.abs() / cmd;
            self.stalled = ratio < self.min_ratio;
            tracing::trace!(ratio, commanded = cmd, stalled = self.stalled, "ratio window");
        }
        self.observed_sum = 0.0;
        self.commanded_sum = 0.0;
        self.ticks = 0;
        self.stalled
    }

    fn is_stalled(&self) -> bool {
        self.stalled
    }

    fn clear(&mut self) {
        self.observed_sum = 0.0;
        self.commanded_sum = 0.0;
        self.ticks = 0;
        self.stalled = false;
    }
}

/// Both policies plus the rule that picks one per operating mode.
#[derive(Debug, Clone)]
pub struct StallDetector {
    strategy: StallStrategy,
    confidence: ConfidenceStall,
    ratio: RatioStall,
}

impl StallDetector {
    pub fn new(cfg: &StallCfg) -> Self {
        Self {
            strategy: cfg.strategy,
            confidence: ConfidenceStall::new(cfg.sensitivity),
            ratio: RatioStall::new(cfg.window_ticks, cfg.min_ratio, cfg.min_motion_steps),
        }
    }

    fn policy_mut(&mut self, mode: OperatingMode) -> &mut dyn StallPolicy {
        match (self.strategy, mode) {
            (StallStrategy::Ratio, _)
            | (StallStrategy::PerMode, OperatingMode::ClosedLoopPositionHold) => &mut self.ratio,
            _ => &mut self.confidence,
        }
    }

    pub fn evaluate(&mut self, mode: OperatingMode, observed: f64, commanded: f64) -> bool {
        self.policy_mut(mode).evaluate(observed, commanded)
    }

    pub fn is_stalled(&self) -> bool {
        self.confidence.is_stalled() || self.ratio.is_stalled()
    }

    pub fn clear(&mut self) {
        self.confidence.clear();
        self.ratio.clear();
    }

    pub fn set_sensitivity(&mut self, sensitivity: f64) {
        self.confidence.set_sensitivity(sensitivity);
    }

    pub fn confidence(&self) -> &ConfidenceStall {
        &self.confidence
    }

    pub fn strategy(&self) -> StallStrategy {
        self.strategy
    }
}
