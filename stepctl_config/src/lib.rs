#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema and tuning persistence for the stepper control stack.
//!
//! - `Config` and its sub-tables are deserialized from TOML and validated.
//! - `persist` stores PID gains and currents as a checksummed record.
use serde::Deserialize;

pub mod persist;

pub use persist::FileParamStore;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MotorCfg {
    pub full_steps_per_rev: u32,
    pub microsteps: u32,
    /// Flip every direction sent to the driver.
    pub invert_direction: bool,
    /// Run current, driver scale 0..=31
    pub current: u8,
    /// Hold current, driver scale 0..=31
    pub hold_current: u8,
}

impl Default for MotorCfg {
    fn default() -> Self {
        Self {
            full_steps_per_rev: 200,
            microsteps: 256,
            invert_direction: false,
            current: 16,
            hold_current: 16,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DriverCfg {
    /// Driver clock in Hz; sets the velocity/acceleration register scale.
    pub fclk_hz: u32,
    /// Cruise velocity register value for positioning moves
    pub vmax: u32,
    pub amax: u32,
    pub dmax: u32,
    pub spi_bus: u8,
    pub spi_slave: u8,
    pub spi_clock_hz: u32,
}

impl Default for DriverCfg {
    fn default() -> Self {
        Self {
            fclk_hz: 16_000_000,
            vmax: 200_000,
            amax: 400,
            dmax: 800,
            spi_bus: 0,
            spi_slave: 0,
            spi_clock_hz: 1_000_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EncoderCfg {
    /// Count angle decreasing as positive motion.
    pub invert: bool,
    /// Skip estimator updates for samples with any status bit set.
    pub health_gate: bool,
    pub spi_bus: u8,
    pub spi_slave: u8,
    pub spi_clock_hz: u32,
}

impl Default for EncoderCfg {
    fn default() -> Self {
        Self {
            invert: false,
            health_gate: false,
            spi_bus: 0,
            spi_slave: 1,
            spi_clock_hz: 1_000_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ModeCfg {
    #[default]
    Normal,
    ClosedLoop,
    DropIn,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ControlCfg {
    /// Mode entered at startup
    pub mode: ModeCfg,
    /// Tick rate for normal and closed-loop modes
    pub tick_hz: u32,
    /// Tick rate for drop-in mode
    pub dropin_tick_hz: u32,
    /// Position-hold re-base threshold in microsteps
    pub control_threshold: u32,
    /// Estimator proportional gain (1/s)
    pub estimator_kp: f64,
    /// Estimator integral gain (1/s^2)
    pub estimator_ki: f64,
}

impl Default for ControlCfg {
    fn default() -> Self {
        Self {
            mode: ModeCfg::Normal,
            tick_hz: 2000,
            dropin_tick_hz: 1000,
            control_threshold: 10,
            estimator_kp: 120.0,
            estimator_ki: 1900.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PidCfg {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    /// Dead-band half width in encoder units
    pub hysteresis: f64,
    /// Added to the observed speed to form the output clamp
    pub output_margin: f64,
    pub integral_limit: f64,
    /// Add the external step rate estimate to the drop-in velocity command
    pub feed_forward: bool,
    /// Start with the drop-in controller enabled
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

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum StallStrategyCfg {
    /// Ratio policy in closed-loop position hold, confidence otherwise
    #[default]
    PerMode,
    Confidence,
    Ratio,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StallCfg {
    pub strategy: StallStrategyCfg,
    /// Confidence smoothing weight in [0, 1); higher reacts slower
    pub sensitivity: f64,
    /// Ratio policy window length in ticks
    pub window_ticks: u32,
    /// Ratio policy: stalled when observed/commanded falls below this
    pub min_ratio: f64,
    /// Ratio policy: ignore windows with less commanded motion (microsteps)
    pub min_motion_steps: f64,
    /// Issue a graceful stop when a stall is flagged
    pub stop_on_stall: bool,
}

impl Default for StallCfg {
    fn default() -> Self {
        Self {
            strategy: StallStrategyCfg::PerMode,
            sensitivity: 0.992,
            window_ticks: 50,
            min_ratio: 0.5,
            min_motion_steps: 64.0,
            stop_on_stall: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DropInCfg {
    /// External step pulses per shaft revolution
    pub pulses_per_rev: u32,
}

impl Default for DropInCfg {
    fn default() -> Self {
        Self {
            pulses_per_rev: 200 * 16,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PersistenceCfg {
    /// Tuning record location; persistence disabled when absent
    pub path: Option<String>,
    /// Apply the stored record at startup
    pub load_on_start: bool,
}

impl Default for PersistenceCfg {
    fn default() -> Self {
        Self {
            path: None,
            load_on_start: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct RunnerCfg {
    /// Raise the tick thread to real-time priority
    pub rt: bool,
    pub rt_prio: Option<i32>,
    pub rt_cpu: Option<usize>,
    /// Lock process memory (mlockall) when rt is enabled
    pub rt_lock: bool,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub motor: MotorCfg,
    pub driver: DriverCfg,
    pub encoder: EncoderCfg,
    pub control: ControlCfg,
    pub pid: PidCfg,
    pub stall: StallCfg,
    pub dropin: DropInCfg,
    pub logging: Logging,
    pub persistence: PersistenceCfg,
    pub runner: RunnerCfg,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

fn finite_non_negative(v: f64) -> bool {
    v.is_finite() && v >= 0.0
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Motor
        if self.motor.full_steps_per_rev == 0 {
            eyre::bail!("motor.full_steps_per_rev must be > 0");
        }
        if !self.motor.microsteps.is_power_of_two() || self.motor.microsteps > 256 {
            eyre::bail!("motor.microsteps must be a power of two in 1..=256");
        }
        if self.motor.current > 31 || self.motor.hold_current > 31 {
            eyre::bail!("motor.current and motor.hold_current must be in 0..=31");
        }

        // Driver
        if self.driver.fclk_hz == 0 {
            eyre::bail!("driver.fclk_hz must be > 0");
        }
        if self.driver.vmax == 0 || self.driver.vmax >= 1 << 23 {
            eyre::bail!("driver.vmax must be in 1..8388608");
        }
        if self.driver.amax == 0 || self.driver.amax > 65_535 {
            eyre::bail!("driver.amax must be in 1..=65535");
        }
        if self.driver.dmax == 0 || self.driver.dmax > 65_535 {
            eyre::bail!("driver.dmax must be in 1..=65535");
        }

        // Control
        if self.control.tick_hz == 0 {
            eyre::bail!("control.tick_hz must be > 0");
        }
        if self.control.dropin_tick_hz == 0 {
            eyre::bail!("control.dropin_tick_hz must be > 0");
        }
        if self.control.tick_hz > 100_000 || self.control.dropin_tick_hz > 100_000 {
            eyre::bail!("control tick rates above 100 kHz are not supported");
        }
        if !(self.control.estimator_kp.is_finite() && self.control.estimator_kp > 0.0) {
            eyre::bail!("control.estimator_kp must be > 0");
        }
        if !(self.control.estimator_ki.is_finite() && self.control.estimator_ki > 0.0) {
            eyre::bail!("control.estimator_ki must be > 0");
        }

        // PID
        for (name, g) in [("kp", self.pid.kp), ("ki", self.pid.ki), ("kd", self.pid.kd)] {
            if !(g.is_finite() && g >= 0.0) {
                eyre::bail!("pid.{name} must be finite and >= 0");
            }
        }
        if !finite_non_negative(self.pid.hysteresis) {
            eyre::bail!("pid.hysteresis must be >= 0");
        }
        if !finite_non_negative(self.pid.output_margin) {
            eyre::bail!("pid.output_margin must be >= 0");
        }
        if !finite_non_negative(self.pid.integral_limit) {
            eyre::bail!("pid.integral_limit must be >= 0");
        }

        // Stall
        if !(self.stall.sensitivity >= 0.0 && self.stall.sensitivity < 1.0) {
            eyre::bail!("stall.sensitivity must be in [0.0, 1.0)");
        }
        if self.stall.window_ticks == 0 {
            eyre::bail!("stall.window_ticks must be >= 1");
        }
        if !(self.stall.min_ratio > 0.0 && self.stall.min_ratio <= 1.0) {
            eyre::bail!("stall.min_ratio must be in (0.0, 1.0]");
        }
        if !finite_non_negative(self.stall.min_motion_steps) {
            eyre::bail!("stall.min_motion_steps must be >= 0");
        }

        // Drop-in
        if self.dropin.pulses_per_rev == 0 {
            eyre::bail!("dropin.pulses_per_rev must be > 0");
        }

        // Logging
        if let Some(r) = self.logging.rotation.as_deref()
            && !matches!(r, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never|daily|hourly");
        }

        // Runner
        if let Some(p) = self.runner.rt_prio
            && !(1..=99).contains(&p)
        {
            eyre::bail!("runner.rt_prio must be in 1..=99");
        }

        Ok(())
    }

    /// Microsteps per shaft revolution.
    pub fn microsteps_per_rev(&self) -> u32 {
        self.motor.full_steps_per_rev.saturating_mul(self.motor.microsteps)
    }
}
