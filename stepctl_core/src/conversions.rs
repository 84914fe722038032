//! `From` implementations bridging `stepctl_config` types to `stepctl_core` types.

use crate::config::{
    ControlCfg, CoreConfig, DropInCfg, EstimatorCfg, MotionCfg, PidCfg, StallCfg, StallStrategy,
};
use crate::estimator::FilterGains;
use crate::scheduler::OperatingMode;

impl From<stepctl_config::ModeCfg> for OperatingMode {
    fn from(m: stepctl_config::ModeCfg) -> Self {
        match m {
            stepctl_config::ModeCfg::Normal => Self::Normal,
            stepctl_config::ModeCfg::ClosedLoop => Self::ClosedLoopPositionHold,
            stepctl_config::ModeCfg::DropIn => Self::DropIn,
        }
    }
}

impl From<stepctl_config::StallStrategyCfg> for StallStrategy {
    fn from(s: stepctl_config::StallStrategyCfg) -> Self {
        match s {
            stepctl_config::StallStrategyCfg::PerMode => Self::PerMode,
            stepctl_config::StallStrategyCfg::Confidence => Self::Confidence,
            stepctl_config::StallStrategyCfg::Ratio => Self::Ratio,
        }
    }
}

// ── MotionCfg ────────────────────────────────────────────────────────────────

impl From<&stepctl_config::Config> for MotionCfg {
    fn from(c: &stepctl_config::Config) -> Self {
        Self {
            microsteps_per_rev: c.microsteps_per_rev(),
            fclk_hz: c.driver.fclk_hz,
            vmax: c.driver.vmax,
            amax: c.driver.amax,
            dmax: c.driver.dmax,
            invert_direction: c.motor.invert_direction,
            current: c.motor.current,
            hold_current: c.motor.hold_current,
        }
    }
}

// ── EstimatorCfg ─────────────────────────────────────────────────────────────

impl From<&stepctl_config::Config> for EstimatorCfg {
    fn from(c: &stepctl_config::Config) -> Self {
        Self {
            gains: FilterGains {
                kp: c.control.estimator_kp,
                ki: c.control.estimator_ki,
            },
            invert: c.encoder.invert,
            health_gate: c.encoder.health_gate,
        }
    }
}

// ── ControlCfg ───────────────────────────────────────────────────────────────

impl From<&stepctl_config::ControlCfg> for ControlCfg {
    fn from(c: &stepctl_config::ControlCfg) -> Self {
        Self {
            initial_mode: c.mode.into(),
            tick_hz: c.tick_hz,
            dropin_tick_hz: c.dropin_tick_hz,
            control_threshold: f64::from(c.control_threshold),
        }
    }
}

// ── PidCfg ───────────────────────────────────────────────────────────────────

impl From<&stepctl_config::PidCfg> for PidCfg {
    fn from(c: &stepctl_config::PidCfg) -> Self {
        Self {
            kp: f64::from(c.kp),
            ki: f64::from(c.ki),
            kd: f64::from(c.kd),
            hysteresis: c.hysteresis,
            output_margin: c.output_margin,
            integral_limit: c.integral_limit,
            feed_forward: c.feed_forward,
            enabled: c.enabled,
        }
    }
}

// ── StallCfg ─────────────────────────────────────────────────────────────────

impl From<&stepctl_config::StallCfg> for StallCfg {
    fn from(c: &stepctl_config::StallCfg) -> Self {
        Self {
            strategy: c.strategy.into(),
            sensitivity: c.sensitivity,
            window_ticks: c.window_ticks,
            min_ratio: c.min_ratio,
            min_motion_steps: c.min_motion_steps,
            stop_on_stall: c.stop_on_stall,
        }
    }
}

// ── DropInCfg ────────────────────────────────────────────────────────────────

impl From<&stepctl_config::DropInCfg> for DropInCfg {
    fn from(c: &stepctl_config::DropInCfg) -> Self {
        Self {
            pulses_per_rev: c.pulses_per_rev,
        }
    }
}

// ── CoreConfig ───────────────────────────────────────────────────────────────

impl From<&stepctl_config::Config> for CoreConfig {
    fn from(c: &stepctl_config::Config) -> Self {
        Self {
            motion: c.into(),
            estimator: c.into(),
            control: (&c.control).into(),
            pid: (&c.pid).into(),
            stall: (&c.stall).into(),
            dropin: (&c.dropin).into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_agree_with_config_defaults() {
        let cfg = stepctl_config::Config::default();
        let core = CoreConfig::from(&cfg);
        let dflt = CoreConfig::default();
        assert_eq!(core.motion.microsteps_per_rev, dflt.motion.microsteps_per_rev);
        assert_eq!(core.motion.vmax, dflt.motion.vmax);
        assert_eq!(core.control.tick_hz, dflt.control.tick_hz);
        assert_eq!(core.control.control_threshold, dflt.control.control_threshold);
        assert_eq!(core.estimator.gains, dflt.estimator.gains);
        assert_eq!(core.stall.strategy, dflt.stall.strategy);
        assert_eq!(core.stall.sensitivity, dflt.stall.sensitivity);
        assert_eq!(core.dropin.pulses_per_rev, dflt.dropin.pulses_per_rev);
        assert!((core.pid.ki - dflt.pid.ki).abs() < 1e-6);
    }

    #[test]
    fn mode_mapping() {
        assert_eq!(
            OperatingMode::from(stepctl_config::ModeCfg::ClosedLoop),
            OperatingMode::ClosedLoopPositionHold
        );
        assert_eq!(
            OperatingMode::from(stepctl_config::ModeCfg::DropIn),
            OperatingMode::DropIn
        );
    }
}
