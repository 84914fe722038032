//! Unit conversions between encoder units, microsteps, degrees, RPM and
//! the driver's register scales.
//!
//! - Encoder: 65536 units per revolution.
//! - Velocity register: `steps/s * 2^24 / f_clk`.
//! - Acceleration register: `steps/s^2 * 2^41 / f_clk^2`.

/// Encoder units per revolution.
pub const ENCODER_UNITS_PER_REV: f64 = 65_536.0;
/// Largest velocity register value the ramp generator accepts.
pub const MAX_VELOCITY_REG: u32 = (1 << 23) - 512;
/// Largest acceleration register value.
pub const MAX_ACCEL_REG: u32 = 65_535;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Units {
    microsteps_per_rev: f64,
    fclk_hz: f64,
}

impl Units {
    pub fn new(microsteps_per_rev: u32, fclk_hz: u32) -> Self {
        Self {
            microsteps_per_rev: f64::from(microsteps_per_rev.max(1)),
            fclk_hz: f64::from(fclk_hz.max(1)),
        }
    }

    #[inline]
    pub fn microsteps_per_rev(&self) -> f64 {
        self.microsteps_per_rev
    }

    #[inline]
    pub fn encoder_to_steps(&self, units: f64) -> f64 {
        units * self.microsteps_per_rev / ENCODER_UNITS_PER_REV
    }

    #[inline]
    pub fn steps_to_encoder(&self, steps: f64) -> f64 {
        steps * ENCODER_UNITS_PER_REV / self.microsteps_per_rev
    }

    #[inline]
    pub fn degrees_to_steps(&self, degrees: f64) -> f64 {
        degrees * self.microsteps_per_rev / 360.0
    }

    #[inline]
    pub fn encoder_to_degrees(units: f64) -> f64 {
        units * 360.0 / ENCODER_UNITS_PER_REV
    }

    #[inline]
    pub fn rpm_to_steps_per_s(&self, rpm: f64) -> f64 {
        rpm * self.microsteps_per_rev / 60.0
    }

    #[inline]
    pub fn steps_per_s_to_rpm(&self, steps_per_s: f64) -> f64 {
        steps_per_s * 60.0 / self.microsteps_per_rev
    }

    /// Encoder units per second to RPM.
    #[inline]
    pub fn encoder_rate_to_rpm(rate: f64) -> f64 {
        rate * 60.0 / ENCODER_UNITS_PER_REV
    }

    /// Magnitude of a step rate as a velocity register value (saturating).
    pub fn velocity_reg(&self, steps_per_s: f64) -> u32 {
        let reg = steps_per_s.abs() * f64::from(1u32 << 24) / self.fclk_hz;
        if reg.is_finite() {
            (reg as u64).min(u64::from(MAX_VELOCITY_REG)) as u32
        } else {
            MAX_VELOCITY_REG
        }
    }

    /// Acceleration in steps/s^2 as a register value, clamped to `1..=MAX_ACCEL_REG`.
    pub fn accel_reg(&self, steps_per_s2: f64) -> u32 {
        let reg = steps_per_s2.abs() * (1u64 << 41) as f64 / (self.fclk_hz * self.fclk_hz);
        if reg.is_finite() {
            (reg.round() as u64).clamp(1, u64::from(MAX_ACCEL_REG)) as u32
        } else {
            MAX_ACCEL_REG
        }
    }
}

impl Default for Units {
    fn default() -> Self {
        Self::new(200 * 256, 16_000_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoder_and_step_scales_agree() {
        let u = Units::default();
        assert_eq!(u.encoder_to_steps(65_536.0), 51_200.0);
        assert_eq!(u.steps_to_encoder(25_600.0), 32_768.0);
        assert_eq!(u.degrees_to_steps(90.0), 12_800.0);
        assert_eq!(Units::encoder_to_degrees(16_384.0), 90.0);
    }

    #[test]
    fn rpm_round_trip() {
        let u = Units::default();
        let sps = u.rpm_to_steps_per_s(60.0);
        assert_eq!(sps, 51_200.0);
        assert!((u.steps_per_s_to_rpm(sps) - 60.0).abs() < 1e-12);
        assert_eq!(Units::encoder_rate_to_rpm(65_536.0), 60.0);
    }

    #[test]
    fn register_scales_at_16mhz() {
        let u = Units::default();
        // 1 step/s = 1.048576 register units
        assert_eq!(u.velocity_reg(1_000_000.0), 1_048_576);
        assert_eq!(u.velocity_reg(-1_000_000.0), 1_048_576);
        assert_eq!(u.velocity_reg(1e12), MAX_VELOCITY_REG);
        assert_eq!(u.accel_reg(1e12), MAX_ACCEL_REG);
        assert_eq!(u.accel_reg(0.0), 1);
        assert_eq!(u.accel_reg(116.415_321_826_934_8 * 400.0), 400);
    }
}
