//! Position/velocity estimation from wrapped absolute angle samples.
//!
//! Raw 16-bit samples are unwrapped into an unbounded counter using the
//! shortest angular path, then fed to a PI tracking filter whose integrator
//! is the velocity estimate. The same filter tracks the external step count
//! in drop-in mode.
//!
//! Units: encoder units (65536 per revolution) and encoder units per second.

/// Shortest-path delta `current - previous`, in `[-32768, 32768]`.
///
/// Assumes the shaft never moves more than half a revolution between two
/// samples.
#[inline]
pub fn unwrap_delta(previous: u16, current: u16) -> i32 {
    let mut d = i32::from(current) - i32::from(previous);
    if d < -32_768 {
        d += 65_536;
    } else if d > 32_768 {
        d -= 65_536;
    }
    d
}

/// Filter gains in continuous-time units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterGains {
    /// Proportional gain (1/s)
    pub kp: f64,
    /// Integral gain (1/s^2); multiplied by the period each tick
    pub ki: f64,
}

impl Default for FilterGains {
    fn default() -> Self {
        Self {
            kp: 120.0,
            ki: 1900.0,
        }
    }
}

/// Second-order PI tracking filter.
#[derive(Debug, Clone, Copy)]
pub struct PiFilter {
    gains: FilterGains,
    dt: f64,
    ki_per_tick: f64,
    position: f64,
    error: f64,
    integrator: f64,
    velocity: f64,
}

impl PiFilter {
    pub fn new(gains: FilterGains, dt: f64) -> Self {
        Self {
            gains,
            dt,
            ki_per_tick: gains.ki * dt,
            position: 0.0,
            error: 0.0,
            integrator: 0.0,
            velocity: 0.0,
        }
    }

    /// Advance one period towards `input`.
    #[inline]
    pub fn update(&mut self, input: f64) {
        self.position += self.velocity * self.dt;
        self.error = input - self.position;
        self.integrator += self.error * self.ki_per_tick;
        self.velocity = self.error * self.gains.kp + self.integrator;
    }

    /// Zero all state and start tracking from `position`.
    pub fn reset_to(&mut self, position: f64) {
        self.position = position;
        self.error = 0.0;
        self.integrator = 0.0;
        self.velocity = 0.0;
    }

    pub fn set_period(&mut self, dt: f64) {
        self.dt = dt;
        self.ki_per_tick = self.gains.ki * dt;
    }

    #[inline]
    pub fn dt(&self) -> f64 {
        self.dt
    }
    #[inline]
    pub fn position(&self) -> f64 {
        self.position
    }
    #[inline]
    pub fn error(&self) -> f64 {
        self.error
    }
    #[inline]
    pub fn integrator(&self) -> f64 {
        self.integrator
    }
    #[inline]
    pub fn velocity(&self) -> f64 {
        self.velocity
    }
}

/// Snapshot returned by `PositionVelocityEstimator::update`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PositionEstimate {
    pub accumulated: i64,
    pub position: f64,
    pub velocity: f64,
}

/// Encoder-side estimator: unwrap, accumulate, filter.
#[derive(Debug, Clone)]
pub struct PositionVelocityEstimator {
    filter: PiFilter,
    accumulated: i64,
    previous_raw: u16,
    invert: bool,
}

impl PositionVelocityEstimator {
    /// `reference_raw` is the sample that defines home.
    pub fn new(gains: FilterGains, dt: f64, reference_raw: u16, invert: bool) -> Self {
        Self {
            filter: PiFilter::new(gains, dt),
            accumulated: 0,
            previous_raw: reference_raw,
            invert,
        }
    }

    pub fn update(&mut self, raw: u16) -> PositionEstimate {
        let mut delta = unwrap_delta(self.previous_raw, raw);
        if self.invert {
            delta = -delta;
        }
        self.previous_raw = raw;
        self.accumulated += i64::from(delta);
        self.filter.update(self.accumulated as f64);
        self.estimate()
    }

    /// Redefine home at `reference_raw`; every state field returns to zero.
    pub fn reset(&mut self, reference_raw: u16) {
        self.accumulated = 0;
        self.previous_raw = reference_raw;
        self.filter.reset_to(0.0);
    }

    /// Drop filter dynamics but keep the accumulated position.
    pub fn reseed(&mut self) {
        self.filter.reset_to(self.accumulated as f64);
    }

    pub fn set_period(&mut self, dt: f64) {
        self.filter.set_period(dt);
    }

    pub fn set_invert(&mut self, invert: bool) {
        self.invert = invert;
    }

    /// Flip the counting direction and re-express the accumulated position
    /// in the mirrored frame. Filter dynamics restart at the new position.
    pub fn mirror(&mut self) {
        self.invert = !self.invert;
        self.accumulated = -self.accumulated;
        self.filter.reset_to(self.accumulated as f64);
    }

    pub fn estimate(&self) -> PositionEstimate {
        PositionEstimate {
            accumulated: self.accumulated,
            position: self.filter.position(),
            velocity: self.filter.velocity(),
        }
    }

    #[inline]
    pub fn accumulated(&self) -> i64 {
        self.accumulated
    }
    #[inline]
    pub fn filtered_position(&self) -> f64 {
        self.filter.position()
    }
    #[inline]
    pub fn position_error(&self) -> f64 {
        self.filter.error()
    }
    #[inline]
    pub fn velocity_integrator(&self) -> f64 {
        self.filter.integrator()
    }
    /// Encoder units per second.
    #[inline]
    pub fn filtered_velocity(&self) -> f64 {
        self.filter.velocity()
    }
    /// Encoder units per tick.
    #[inline]
    pub fn velocity_per_tick(&self) -> f64 {
        self.filter.velocity() * self.filter.dt()
    }
    #[inline]
    pub fn previous_raw(&self) -> u16 {
        self.previous_raw
    }
}

/// Tracks the externally counted step pulses in drop-in mode.
///
/// Output position is in encoder units: `origin + (count - reference) * scale`.
#[derive(Debug, Clone)]
pub struct ExternalStepFilter {
    filter: PiFilter,
    units_per_pulse: f64,
    reference_count: i64,
    origin: f64,
}

impl ExternalStepFilter {
    pub fn new(gains: FilterGains, dt: f64, pulses_per_rev: u32) -> Self {
        Self {
            filter: PiFilter::new(gains, dt),
            units_per_pulse: crate::units::ENCODER_UNITS_PER_REV / f64::from(pulses_per_rev.max(1)),
            reference_count: 0,
            origin: 0.0,
        }
    }

    pub fn update(&mut self, count: i64) -> (f64, f64) {
        let input = self.origin + (count - self.reference_count) as f64 * self.units_per_pulse;
        self.filter.update(input);
        (self.filter.position(), self.filter.velocity())
    }

    /// Align pulse `count` with encoder position `origin`.
    pub fn reset(&mut self, count: i64, origin: f64) {
        self.reference_count = count;
        self.origin = origin;
        self.filter.reset_to(origin);
    }

    pub fn set_period(&mut self, dt: f64) {
        self.filter.set_period(dt);
    }

    #[inline]
    pub fn units_per_pulse(&self) -> f64 {
        self.units_per_pulse
    }
    #[inline]
    pub fn position(&self) -> f64 {
        self.filter.position()
    }
    #[inline]
    pub fn velocity(&self) -> f64 {
        self.filter.velocity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    const DT: f64 = 0.0005;

    fn estimator() -> PositionVelocityEstimator {
        PositionVelocityEstimator::new(FilterGains::default(), DT, 0, false)
    }

    #[rstest]
    #[case(0, 100, 100)]
    #[case(100, 0, -100)]
    #[case(65_500, 36, 72)]
    #[case(36, 65_500, -72)]
    #[case(0, 32_768, 32_768)]
    #[case(32_768, 0, -32_768)]
    #[case(0, 32_769, -32_767)]
    fn shortest_path_delta(#[case] prev: u16, #[case] cur: u16, #[case] expected: i32) {
        assert_eq!(unwrap_delta(prev, cur), expected);
    }

    proptest! {
        #[test]
        fn delta_is_bounded_and_consistent(a in any::<u16>(), b in any::<u16>()) {
            let d = unwrap_delta(a, b);
            prop_assert!((-32_768..=32_768).contains(&d));
            prop_assert_eq!((i32::from(a) + d).rem_euclid(65_536), i32::from(b));
        }
    }

    #[rstest]
    #[case(256)]
    #[case(-256)]
    fn full_revolution_accumulates_one_turn(#[case] step: i32) {
        let mut est = estimator();
        let mut raw: u16 = 0;
        for _ in 0..256 {
            raw = (i32::from(raw) + step).rem_euclid(65_536) as u16;
            est.update(raw);
        }
        assert_eq!(est.accumulated(), 65_536 * i64::from(step.signum()));
    }

    #[test]
    fn linear_ramp_accumulates_exactly_and_velocity_settles() {
        let mut est = estimator();
        let mut raw: u16 = 0;
        for _ in 0..100 {
            raw = raw.wrapping_add(100);
            est.update(raw);
        }
        assert_eq!(est.accumulated(), 10_000);
        for _ in 0..900 {
            raw = raw.wrapping_add(100);
            est.update(raw);
        }
        assert!((est.velocity_per_tick() - 100.0).abs() < 1.0);
        assert!((est.filtered_position() - est.accumulated() as f64).abs() < 50.0);
    }

    #[test]
    fn home_reset_is_idempotent() {
        let mut est = estimator();
        for i in 1..=50u16 {
            est.update(i * 300);
        }
        for _ in 0..2 {
            est.reset(15_000);
            assert_eq!(est.accumulated(), 0);
            assert_eq!(est.filtered_velocity(), 0.0);
            assert_eq!(est.velocity_integrator(), 0.0);
            assert_eq!(est.filtered_position(), 0.0);
            assert_eq!(est.position_error(), 0.0);
        }
        // Next sample is measured from the recaptured reference.
        est.update(15_010);
        assert_eq!(est.accumulated(), 10);
    }

    #[test]
    fn inverted_encoder_counts_backwards() {
        let mut est = PositionVelocityEstimator::new(FilterGains::default(), DT, 1_000, true);
        est.update(1_500);
        assert_eq!(est.accumulated(), -500);
    }

    #[test]
    fn external_filter_tracks_pulse_rate() {
        let mut ext = ExternalStepFilter::new(FilterGains::default(), 0.001, 3_200);
        assert!((ext.units_per_pulse() - 20.48).abs() < 1e-12);
        ext.reset(1_000, 500.0);
        let mut count = 1_000;
        for _ in 0..3_000 {
            count += 5;
            ext.update(count);
        }
        // 5 pulses per millisecond = 102400 units/s
        assert!((ext.velocity() - 102_400.0).abs() < 100.0);
        let expected = 500.0 + 15_000.0 * 20.48;
        assert!((ext.position() - expected).abs() < 200.0);
    }
}
