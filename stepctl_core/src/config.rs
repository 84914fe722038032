//! Configuration types for the control core.
//!
//! These are the runtime configuration structs used by `ControlCore`.
//! They are separate from the TOML-deserialized config in `stepctl_config`.

use crate::estimator::FilterGains;
use crate::scheduler::OperatingMode;

/// Motor geometry, driver register scale and ramp limits.
#[derive(Debug, Clone)]
pub struct MotionCfg {
    pub microsteps_per_rev: u32,
    /// Driver clock (Hz)
    pub fclk_hz: u32,
    /// Cruise velocity register value for positioning moves.
    pub vmax: u32,
    /// Acceleration register value.
    pub amax: u32,
    /// Deceleration register value.
    pub dmax: u32,
    pub invert_direction: bool,
    /// Run current (0..=31).
    pub current: u8,
    /// Hold current (0..=31).
    pub hold_current: u8,
}

impl Default for MotionCfg {
    fn default() -> Self {
        Self {
            microsteps_per_rev: 200 * 256,
            fclk_hz: 16_000_000,
            vmax: 200_000,
            amax: 400,
            dmax: 800,
            invert_direction: false,
            current: 16,
            hold_current: 16,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EstimatorCfg {
    pub gains: FilterGains,
    /// Count decreasing angle as positive motion.
    pub invert: bool,
    /// Skip samples whose status byte flags a problem.
    pub health_gate: bool,
}

#[derive(Debug, Clone)]
pub struct ControlCfg {
    pub initial_mode: OperatingMode,
    /// Tick rate in normal and position-hold modes.
    pub tick_hz: u32,
    /// Tick rate in drop-in mode.
    pub dropin_tick_hz: u32,
    /// Position-hold error (microsteps) above which the driver is re-based.
    pub control_threshold: f64,
}

impl Default for ControlCfg {
    fn default() -> Self {
        Self {
            initial_mode: OperatingMode::Normal,
            tick_hz: 2000,
            dropin_tick_hz: 1000,
            control_threshold: 10.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PidCfg {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    /// Dead-band half width (encoder units).
    pub hysteresis: f64,
    /// Output clamp is `|observed speed| + output_margin` (encoder units/s).
    pub output_margin: f64,
    pub integral_limit: f64,
    /// Add the external step rate to the drop-in velocity command.
    pub feed_forward: bool,
    pub enabled: bool,
}

impl Default for PidCfg {
    fn default() -> Self {
        Self {
            kp: 20.0,
            ki: 0.2,
            kd: 5.0,
            hysteresis: 10.0,
            output_margin: 10_000.0,
            integral_limit: 200_000.0,
            feed_forward: true,
            enabled: true,
        }
    }
}

/// Which stall policy runs in which mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StallStrategy {
    /// Ratio in closed-loop position hold, confidence elsewhere.
    #[default]
    PerMode,
    Confidence,
    Ratio,
}

#[derive(Debug, Clone)]
pub struct StallCfg {
    pub strategy: StallStrategy,
    pub sensitivity: f64,
    pub window_ticks: u32,
    pub min_ratio: f64,
    pub min_motion_steps: f64,
    pub stop_on_stall: bool,
}

impl Default for StallCfg {
    fn default() -> Self {
        Self {
            strategy: StallStrategy::PerMode,
            sensitivity: 0.992,
            window_ticks: 50,
            min_ratio: 0.5,
            min_motion_steps: 64.0,
            stop_on_stall: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DropInCfg {
    /// External step pulses per shaft revolution.
    pub pulses_per_rev: u32,
}

impl Default for DropInCfg {
    fn default() -> Self {
        Self {
            pulses_per_rev: 200 * 16,
        }
    }
}

/// Everything `ControlCore` needs besides its hardware.
#[derive(Debug, Clone, Default)]
pub struct CoreConfig {
    pub motion: MotionCfg,
    pub estimator: EstimatorCfg,
    pub control: ControlCfg,
    pub pid: PidCfg,
    pub stall: StallCfg,
    pub dropin: DropInCfg,
}
