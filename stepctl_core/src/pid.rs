//! Closed-loop PID used in drop-in mode.
//!
//! Input is a position error in encoder units; output is a velocity
//! correction in encoder units per second. The proportional term and the
//! final output are clamped to `|observed speed| + margin`; the integral is
//! clamped to a fixed bound and zeroed on the first tick the error enters
//! the hysteresis band.

use crate::config::PidCfg;

/// Weight of the previous derivative in the smoothed derivative term.
const DERIVATIVE_SMOOTHING: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

#[derive(Debug, Clone)]
pub struct ClosedLoopController {
    gains: PidGains,
    hysteresis: f64,
    output_margin: f64,
    integral_limit: f64,
    enabled: bool,

    integral: f64,
    previous_error: f64,
    differential: f64,
    in_band: bool,
    band_resets: u64,
    last_error: f64,
    last_output: f64,
}

impl ClosedLoopController {
    pub fn new(cfg: &PidCfg) -> Self {
        Self {
            gains: PidGains {
                kp: non_negative(cfg.kp),
                ki: non_negative(cfg.ki),
                kd: non_negative(cfg.kd),
            },
            hysteresis: non_negative(cfg.hysteresis),
            output_margin: non_negative(cfg.output_margin),
            integral_limit: non_negative(cfg.integral_limit),
            enabled: cfg.enabled,
            integral: 0.0,
            previous_error: 0.0,
            differential: 0.0,
            in_band: false,
            band_resets: 0,
            last_error: 0.0,
            last_output: 0.0,
        }
    }

    /// One controller update. `observed_speed` sets the clamp.
    pub fn step(&mut self, error: f64, observed_speed: f64) -> f64 {
        let limit = non_negative(observed_speed.abs() + self.output_margin);

        let p = (error * self.gains.kp).clamp(-limit, limit);

        self.integral = (self.integral + error * self.gains.ki)
            .clamp(-self.integral_limit, self.integral_limit);
        if error.abs() < self.hysteresis {
            if !self.in_band {
                self.in_band = true;
                self.integral = 0.0;
                self.band_resets += 1;
            }
        } else {
            self.in_band = false;
        }

        self.differential = DERIVATIVE_SMOOTHING * self.differential
            + (1.0 - DERIVATIVE_SMOOTHING) * (error - self.previous_error) * self.gains.kd;
        self.previous_error = error;

        let out = (p + self.integral + self.differential).clamp(-limit, limit);
        self.last_error = error;
        self.last_output = out;
        out
    }

    /// Zero every accumulator.
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.previous_error = 0.0;
        self.differential = 0.0;
        self.in_band = false;
        self.last_error = 0.0;
        self.last_output = 0.0;
    }

    pub fn enable(&mut self) {
        self.reset();
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.reset();
        self.enabled = false;
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_kp(&mut self, kp: f64) {
        self.gains.kp = kp;
    }
    pub fn set_ki(&mut self, ki: f64) {
        self.gains.ki = ki;
    }
    pub fn set_kd(&mut self, kd: f64) {
        self.gains.kd = kd;
    }
    pub fn gains(&self) -> PidGains {
        self.gains
    }
    pub fn hysteresis(&self) -> f64 {
        self.hysteresis
    }
    pub fn integral(&self) -> f64 {
        self.integral
    }
    pub fn differential(&self) -> f64 {
        self.differential
    }
    /// Number of dead-band entries that zeroed the integral.
    pub fn band_resets(&self) -> u64 {
        self.band_resets
    }
    pub fn last_error(&self) -> f64 {
        self.last_error
    }
    pub fn last_output(&self) -> f64 {
        self.last_output
    }
}

/// Negative and NaN inputs saturate to zero.
#[inline]
fn non_negative(v: f64) -> f64 {
    v.max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn pid() -> ClosedLoopController {
        ClosedLoopController::new(&PidCfg::default())
    }

    #[test]
    fn integral_reset_is_edge_triggered() {
        let mut c = pid();
        for _ in 0..20 {
            c.step(500.0, 0.0);
        }
        assert!(c.integral() > 0.0);

        // First tick in band zeroes the integral.
        c.step(4.0, 0.0);
        assert_eq!(c.integral(), 0.0);
        assert_eq!(c.band_resets(), 1);

        // Further in-band ticks accumulate again; no continuous zeroing.
        c.step(4.0, 0.0);
        c.step(4.0, 0.0);
        assert!((c.integral() - 2.0 * 4.0 * 0.2).abs() < 1e-12);
        assert_eq!(c.band_resets(), 1);

        // Leave and re-enter: exactly one more reset.
        c.step(50.0, 0.0);
        assert!(c.integral() > 0.0);
        c.step(-3.0, 0.0);
        assert_eq!(c.integral(), 0.0);
        c.step(-3.0, 0.0);
        assert_eq!(c.band_resets(), 2);
    }

    #[test]
    fn integral_is_bounded() {
        let mut c = pid();
        for _ in 0..100_000 {
            c.step(1e6, 1e9);
        }
        assert_eq!(c.integral(), 200_000.0);
    }

    #[test]
    fn derivative_is_smoothed() {
        let mut c = ClosedLoopController::new(&PidCfg {
            kp: 0.0,
            ki: 0.0,
            kd: 10.0,
            ..PidCfg::default()
        });
        let out = c.step(100.0, 0.0);
        assert!((out - 100.0).abs() < 1e-9);
        let out = c.step(100.0, 0.0);
        assert!((out - 90.0).abs() < 1e-9);
    }

    #[test]
    fn negative_limits_saturate_instead_of_panicking() {
        let mut c = ClosedLoopController::new(&PidCfg {
            output_margin: -50.0,
            integral_limit: -1.0,
            kp: -3.0,
            ..PidCfg::default()
        });
        assert_eq!(c.gains().kp, 0.0);
        assert_eq!(c.step(1_000.0, 0.0), 0.0);
        assert_eq!(c.integral(), 0.0);
        // The clamp opens up with the observed speed.
        assert!(c.step(1_000.0, 10.0).abs() <= 10.0);
        assert_eq!(c.step(1_000.0, f64::NAN), 0.0);
    }

    #[test]
    fn reset_zeroes_state() {
        let mut c = pid();
        c.step(1_000.0, 0.0);
        c.disable();
        assert!(!c.is_enabled());
        assert_eq!(c.integral(), 0.0);
        assert_eq!(c.differential(), 0.0);
        c.enable();
        assert!(c.is_enabled());
    }

    proptest! {
        #[test]
        fn output_never_exceeds_speed_plus_margin(
            errors in proptest::collection::vec(-1e12f64..1e12, 1..50),
            speed in -1e7f64..1e7,
        ) {
            let mut c = pid();
            for e in errors {
                let out = c.step(e, speed);
                prop_assert!(out.abs() <= speed.abs() + 10_000.0);
            }
        }
    }
}
