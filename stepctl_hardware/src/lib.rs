//! Hardware front ends for the stepper control core.
//!
//! - `tmc5130`: register map, datagram codec and a `MotionActuator` over SPI
//! - `aeat`: absolute encoder frame decoding and an `AngleSource` over SPI
//! - `sim`: a simulated axis (shared physics for encoder and driver)
//! - `transport`: the byte-level SPI seam, with a Raspberry Pi backend
//!   behind the `hardware` feature

pub mod aeat;
pub mod error;
pub mod sim;
pub mod tmc5130;
pub mod transport;

pub use aeat::AeatEncoder;
pub use error::HwError;
pub use sim::{AxisParams, SimulatedAxis, SimulatedDriver, SimulatedEncoder};
pub use tmc5130::Tmc5130;
pub use transport::SpiTransport;
