//! Observable state exposed to foreground callers.

use stepctl_traits::SampleStatus;

use crate::scheduler::OperatingMode;

/// How `stop` brings the motor to rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// Force deceleration to maximum, command zero velocity and wait until
    /// the driver reports standstill.
    Immediate,
    /// Command zero velocity with the configured deceleration and return.
    Graceful,
}

/// Encoder health as seen by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorHealth {
    pub present: bool,
    /// Status byte of the last sample read by the tick handler.
    pub status: SampleStatus,
    /// Failed encoder reads since startup.
    pub read_faults: u64,
}

impl SensorHealth {
    pub fn is_healthy(&self) -> bool {
        self.present && self.status.is_valid()
    }
}

/// Point-in-time snapshot of the control core.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Telemetry {
    pub mode: OperatingMode,
    pub ticks: u64,
    pub sensor_faults: u64,
    pub actuator_faults: u64,
    pub gated_samples: u64,
    pub rebases: u64,
    pub stalls: u64,
    pub stalled: bool,
    /// Encoder units since home.
    pub accumulated: i64,
    pub angle_moved_deg: f64,
    pub speed_rpm: f64,
    /// Last control error in microsteps, in either closed-loop mode.
    pub control_error: f64,
    pub pid_enabled: bool,
}
