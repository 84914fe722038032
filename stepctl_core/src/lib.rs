#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Closed-loop stepper control core (hardware-agnostic).
//!
//! All hardware interaction goes through `stepctl_traits::AngleSource` and
//! `stepctl_traits::MotionActuator`.
//!
//! ## Architecture
//!
//! - **Estimation**: encoder unwrap plus PI position/velocity filter (`estimator`)
//! - **Supervision**: confidence and ratio stall policies (`stall`)
//! - **Control**: drop-in PID with clamping and dead-band reset (`pid`)
//! - **Scheduling**: the per-tick state machine (`scheduler`), run either
//!   directly or on a `Ticker` thread behind a `Stepper` handle
//! - **Commands**: the foreground API on `ControlCore` (`core`)
//!
//! ## Units
//!
//! Encoder positions are in encoder units (65536 per revolution), driver
//! positions in microsteps. `units::Units` converts between them and the
//! driver's velocity and acceleration registers.

pub mod builder;
pub mod config;
pub mod conversions;
pub mod core;
pub mod error;
pub mod estimator;
pub mod hw_error;
pub mod mocks;
pub mod pid;
pub mod runner;
pub mod scheduler;
pub mod stall;
pub mod status;
pub mod step_input;
pub mod stepper;
pub mod ticker;
pub mod units;
pub mod util;

pub use crate::builder::{ControlCoreBuilder, DynControlCore, build_core};
pub use crate::config::{
    ControlCfg, CoreConfig, DropInCfg, EstimatorCfg, MotionCfg, PidCfg, StallCfg, StallStrategy,
};
pub use crate::core::ControlCore;
pub use crate::error::{BuildError, ControlError, Result};
pub use crate::estimator::{ExternalStepFilter, FilterGains, PositionVelocityEstimator};
pub use crate::pid::ClosedLoopController;
pub use crate::scheduler::{OperatingMode, TickReport};
pub use crate::stall::{ConfidenceStall, RatioStall, StallDetector, StallPolicy};
pub use crate::status::{SensorHealth, StopMode, Telemetry};
pub use crate::step_input::StepInput;
pub use crate::stepper::Stepper;
pub use crate::ticker::{Ticker, TickerStats};
pub use crate::units::Units;
