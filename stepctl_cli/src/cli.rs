//! CLI argument definitions.

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "stepctl", version, about = "Closed-loop stepper control")]
pub struct Cli {
    /// Path to config TOML; built-in defaults when omitted
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Hardware backend
    #[arg(long, value_enum, default_value_t = Backend::Sim)]
    pub backend: Backend,

    /// Print results (and errors) as JSON on stdout; logs become JSON lines
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace); overrides [logging].level
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum Backend {
    /// Simulated axis driven by the wall clock
    Sim,
    /// TMC5130 + AEAT encoder on SPI (requires the `hardware` feature)
    Hardware,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ModeArg {
    Normal,
    ClosedLoop,
    DropIn,
}

impl From<ModeArg> for stepctl_core::OperatingMode {
    fn from(m: ModeArg) -> Self {
        match m {
            ModeArg::Normal => Self::Normal,
            ModeArg::ClosedLoop => Self::ClosedLoopPositionHold,
            ModeArg::DropIn => Self::DropIn,
        }
    }
}

/// Memory locking mode for real-time operation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum RtLock {
    /// Do not lock memory
    None,
    /// Lock currently resident pages
    Current,
    /// Lock current and future pages
    All,
}

impl RtLock {
    #[inline]
    pub fn os_default() -> Self {
        #[cfg(target_os = "linux")]
        {
            return RtLock::Current;
        }
        #[allow(unreachable_code)]
        RtLock::None
    }
}

/// Real-time scheduling knobs shared by commands that tick the core.
#[derive(Args, Debug, Clone, Default)]
pub struct RtArgs {
    /// Enable real-time mode (SCHED_FIFO, affinity, mlockall)
    #[arg(
        long,
        action = ArgAction::SetTrue,
        long_help = "Enable real-time mode on supported OSes.\n\nLinux: Attempts SCHED_FIFO priority, pins to a CPU, and locks the address space with mlockall. The tick thread inherits the policy. Requires CAP_SYS_NICE / CAP_IPC_LOCK or root.\n\nmacOS: Only mlockall is applied."
    )]
    pub rt: bool,
    /// SCHED_FIFO priority (1..=99, Linux only); defaults to the system maximum
    #[arg(long, value_name = "PRIO")]
    pub rt_prio: Option<i32>,
    /// Memory locking mode for --rt
    #[arg(long, value_enum, value_name = "MODE")]
    pub rt_lock: Option<RtLock>,
    /// CPU index to pin to (Linux only); defaults to 0
    #[arg(long, value_name = "CPU")]
    pub rt_cpu: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a timed control session
    Run {
        /// Operating mode; defaults to [control].mode
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,
        /// Session length in milliseconds
        #[arg(long, value_name = "MS", default_value_t = 1000)]
        duration_ms: u64,
        /// Relative move in microsteps issued at session start
        #[arg(long, value_name = "STEPS", allow_negative_numbers = true, group = "motion")]
        move_steps: Option<i32>,
        /// Relative move in degrees issued at session start
        #[arg(long, value_name = "DEG", allow_negative_numbers = true, group = "motion")]
        move_angle: Option<f64>,
        /// Continuous rotation at this speed (sign selects direction)
        #[arg(long, value_name = "RPM", allow_negative_numbers = true, group = "motion")]
        rpm: Option<f64>,
        /// Drop-in mode: simulated external step pulses per tick
        #[arg(long, value_name = "PULSES", allow_negative_numbers = true)]
        dropin_rate: Option<i64>,
        /// Simulator only: block the shaft after this many milliseconds
        #[arg(long, value_name = "MS")]
        block_after_ms: Option<u64>,
        /// Tick on the calling thread instead of a dedicated tick thread
        #[arg(long, action = ArgAction::SetTrue)]
        direct: bool,
        /// Print tick thread timing stats
        #[arg(long, action = ArgAction::SetTrue)]
        stats: bool,
        #[command(flatten)]
        rt: RtArgs,
    },
    /// Check that the encoder and driver respond
    SelfCheck,
    /// Update and persist tuning (PID gains, currents)
    Tune {
        #[arg(long)]
        kp: Option<f32>,
        #[arg(long)]
        ki: Option<f32>,
        #[arg(long)]
        kd: Option<f32>,
        /// Run current, driver scale 0..=31
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=31))]
        current: Option<u8>,
        /// Hold current, driver scale 0..=31
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=31))]
        hold_current: Option<u8>,
        /// Tuning record path; overrides [persistence].path
        #[arg(long, value_name = "FILE")]
        store: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn motion_flags_are_exclusive() {
        let r = Cli::try_parse_from([
            "stepctl",
            "run",
            "--move-steps",
            "10",
            "--rpm",
            "30",
        ]);
        assert!(r.is_err());
    }

    #[test]
    fn negative_move_parses() {
        let cli = Cli::try_parse_from(["stepctl", "run", "--move-angle", "-90"]).unwrap();
        match cli.cmd {
            Commands::Run { move_angle, .. } => assert_eq!(move_angle, Some(-90.0)),
            other => panic!("unexpected {other:?}"),
        }
    }
}
