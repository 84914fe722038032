//! TMC5130 stepper driver over SPI.
//!
//! Every datagram is 40 bits: one address byte (bit 7 set for writes)
//! followed by a big-endian 32-bit payload. The chip answers each datagram
//! with its SPI status byte plus the payload requested by the *previous*
//! read, so a register read costs two transfers.

use stepctl_traits::{BoxError, Direction, DriverStatus, MotionActuator};

use crate::error::Result;
use crate::transport::SpiTransport;

/// Register addresses.
pub mod reg {
    pub const GCONF: u8 = 0x00;
    pub const GSTAT: u8 = 0x01;
    pub const IHOLD_IRUN: u8 = 0x10;
    pub const TPOWERDOWN: u8 = 0x11;
    pub const TCOOLTHRS: u8 = 0x14;
    pub const THIGH: u8 = 0x15;
    pub const RAMPMODE: u8 = 0x20;
    pub const XACTUAL: u8 = 0x21;
    pub const VACTUAL: u8 = 0x22;
    pub const VSTART: u8 = 0x23;
    pub const A1: u8 = 0x24;
    pub const V1: u8 = 0x25;
    pub const AMAX: u8 = 0x26;
    pub const VMAX: u8 = 0x27;
    pub const DMAX: u8 = 0x28;
    pub const D1: u8 = 0x2A;
    pub const VSTOP: u8 = 0x2B;
    pub const TZEROWAIT: u8 = 0x2C;
    pub const XTARGET: u8 = 0x2D;
    pub const SW_MODE: u8 = 0x34;
    pub const RAMP_STAT: u8 = 0x35;
    pub const XLATCH: u8 = 0x36;
    pub const CHOPCONF: u8 = 0x6C;
    pub const COOLCONF: u8 = 0x6D;
    pub const DCCTRL: u8 = 0x6E;
    pub const DRV_STATUS: u8 = 0x6F;
    pub const PWMCONF: u8 = 0x70;

    pub const WRITE_ACCESS: u8 = 0x80;
}

/// RAMPMODE register values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RampMode {
    Positioning = 0,
    VelocityPositive = 1,
    VelocityNegative = 2,
    Hold = 3,
}

impl RampMode {
    pub fn velocity(direction: Direction) -> Self {
        match direction {
            Direction::Clockwise => Self::VelocityPositive,
            Direction::CounterClockwise => Self::VelocityNegative,
        }
    }
}

/// Default internal clock of the chip.
pub const DEFAULT_FCLK_HZ: u32 = 16_000_000;

/// Largest value accepted by AMAX/DMAX.
pub const MAX_ACCEL_REG: u32 = 65_535;

const GCONF_EN_PWM_MODE: u32 = 0x04;
const CHOPCONF_DEFAULT: u32 = toff(5) | hstrt_tfd(4) | hend(2);
const PWMCONF_DEFAULT: u32 = 0x0004_01C8;
const IHOLD_DELAY: u8 = 7;

const fn toff(v: u32) -> u32 {
    v & 0x0F
}
const fn hstrt_tfd(v: u32) -> u32 {
    (v & 0x07) << 4
}
const fn hend(v: u32) -> u32 {
    (v & 0x0F) << 7
}

/// Pack run/hold current and hold delay into the IHOLD_IRUN layout.
pub const fn ihold_irun(ihold: u8, irun: u8, delay: u8) -> u32 {
    ((ihold as u32) & 0x1F) | (((irun as u32) & 0x1F) << 8) | (((delay as u32) & 0x0F) << 16)
}

pub fn write_datagram(address: u8, value: u32) -> [u8; 5] {
    let [b3, b2, b1, b0] = value.to_be_bytes();
    [address | reg::WRITE_ACCESS, b3, b2, b1, b0]
}

pub fn read_datagram(address: u8) -> [u8; 5] {
    [address & !reg::WRITE_ACCESS, 0, 0, 0, 0]
}

/// Split a reply into its status byte and payload.
pub fn decode_reply(reply: &[u8; 5]) -> (DriverStatus, u32) {
    let value = u32::from_be_bytes([reply[1], reply[2], reply[3], reply[4]]);
    (DriverStatus::from_bits(reply[0]), value)
}

/// Sign-extend the 24-bit VACTUAL register.
pub fn sign_extend_24(raw: u32) -> i32 {
    ((raw << 8) as i32) >> 8
}

/// Velocity register value to microsteps per second.
pub fn vreg_to_steps_per_s(reg: f64, fclk_hz: u32) -> f64 {
    reg * f64::from(fclk_hz) / f64::from(1u32 << 24)
}

/// Acceleration register value to microsteps per second squared.
pub fn areg_to_steps_per_s2(reg: f64, fclk_hz: u32) -> f64 {
    let f = f64::from(fclk_hz);
    reg * f * f / (1u64 << 41) as f64
}

/// Ramp profile written by `Tmc5130::init`.
#[derive(Debug, Clone, Copy)]
pub struct RampProfile {
    pub vmax: u32,
    pub amax: u32,
    pub dmax: u32,
    pub a1: u32,
    pub v1: u32,
    pub d1: u32,
    pub vstop: u32,
}

impl Default for RampProfile {
    fn default() -> Self {
        Self {
            vmax: 200_000,
            amax: 400,
            dmax: 800,
            a1: 1000,
            v1: 100_000,
            d1: 1400,
            vstop: 10,
        }
    }
}

pub struct Tmc5130<T: SpiTransport> {
    spi: T,
    vmax: u32,
    last_status: DriverStatus,
}

impl<T: SpiTransport> Tmc5130<T> {
    pub fn new(spi: T) -> Self {
        Self {
            spi,
            vmax: RampProfile::default().vmax,
            last_status: DriverStatus::default(),
        }
    }

    /// Chopper, stealthChop and positioning-ramp setup, then zero the
    /// position registers.
    pub fn init(&mut self, profile: &RampProfile, run: u8, hold: u8) -> Result<()> {
        self.write(reg::IHOLD_IRUN, ihold_irun(hold, run, IHOLD_DELAY))?;
        self.write(reg::GCONF, GCONF_EN_PWM_MODE)?;
        self.write(reg::CHOPCONF, CHOPCONF_DEFAULT)?;
        self.write(reg::PWMCONF, PWMCONF_DEFAULT)?;
        self.write(reg::A1, profile.a1)?;
        self.write(reg::V1, profile.v1)?;
        self.write(reg::AMAX, profile.amax)?;
        self.write(reg::VMAX, profile.vmax)?;
        self.write(reg::DMAX, profile.dmax)?;
        self.write(reg::D1, profile.d1)?;
        self.write(reg::VSTOP, profile.vstop)?;
        self.write(reg::RAMPMODE, RampMode::Positioning as u32)?;
        self.write(reg::XACTUAL, 0)?;
        self.write(reg::XTARGET, 0)?;
        self.vmax = profile.vmax;
        tracing::debug!(vmax = profile.vmax, run, hold, "tmc5130 initialised");
        Ok(())
    }

    pub fn write(&mut self, address: u8, value: u32) -> Result<()> {
        let mut buf = write_datagram(address, value);
        self.spi.transfer(&mut buf)?;
        self.last_status = decode_reply(&buf).0;
        Ok(())
    }

    pub fn read(&mut self, address: u8) -> Result<u32> {
        let mut buf = read_datagram(address);
        self.spi.transfer(&mut buf)?;
        let mut buf = read_datagram(address);
        self.spi.transfer(&mut buf)?;
        let (status, value) = decode_reply(&buf);
        self.last_status = status;
        Ok(value)
    }

    /// Status byte returned with the most recent datagram.
    pub fn last_status(&self) -> DriverStatus {
        self.last_status
    }

    pub fn into_inner(self) -> T {
        self.spi
    }
}

impl<T: SpiTransport> MotionActuator for Tmc5130<T> {
    fn set_target_position(&mut self, position: i32) -> std::result::Result<(), BoxError> {
        self.write(reg::RAMPMODE, RampMode::Positioning as u32)?;
        self.write(reg::VMAX, self.vmax)?;
        self.write(reg::XTARGET, position as u32)?;
        Ok(())
    }

    fn set_target_velocity(
        &mut self,
        velocity: u32,
        direction: Direction,
    ) -> std::result::Result<(), BoxError> {
        self.write(reg::VMAX, velocity)?;
        self.write(reg::RAMPMODE, RampMode::velocity(direction) as u32)?;
        Ok(())
    }

    fn set_velocity_limit(&mut self, velocity: u32) -> std::result::Result<(), BoxError> {
        self.vmax = velocity;
        self.write(reg::VMAX, velocity)?;
        Ok(())
    }

    fn set_acceleration_limits(
        &mut self,
        accel: u32,
        decel: u32,
    ) -> std::result::Result<(), BoxError> {
        self.write(reg::AMAX, accel.min(MAX_ACCEL_REG))?;
        self.write(reg::DMAX, decel.min(MAX_ACCEL_REG))?;
        Ok(())
    }

    fn set_actual_position(&mut self, position: i32) -> std::result::Result<(), BoxError> {
        self.write(reg::XACTUAL, position as u32)?;
        Ok(())
    }

    fn position(&mut self) -> std::result::Result<i32, BoxError> {
        Ok(self.read(reg::XACTUAL)? as i32)
    }

    fn velocity(&mut self) -> std::result::Result<i32, BoxError> {
        Ok(sign_extend_24(self.read(reg::VACTUAL)?))
    }

    fn status(&mut self) -> std::result::Result<DriverStatus, BoxError> {
        self.read(reg::RAMP_STAT)?;
        Ok(self.last_status)
    }

    fn set_currents(&mut self, run: u8, hold: u8) -> std::result::Result<(), BoxError> {
        self.write(reg::IHOLD_IRUN, ihold_irun(hold, run, IHOLD_DELAY))?;
        Ok(())
    }

    fn write_raw_register(&mut self, address: u8, value: u32) -> std::result::Result<(), BoxError> {
        self.write(address, value)?;
        Ok(())
    }

    fn read_raw_register(&mut self, address: u8) -> std::result::Result<u32, BoxError> {
        Ok(self.read(address)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ihold_irun_packs_fields() {
        assert_eq!(ihold_irun(3, 10, 6), 3 | (10 << 8) | (6 << 16));
        // Out-of-range currents are masked, not spilled into neighbours.
        assert_eq!(ihold_irun(0xFF, 0, 0), 0x1F);
    }

    #[test]
    fn chopconf_matches_bitfields() {
        assert_eq!(CHOPCONF_DEFAULT, 5 | (4 << 4) | (2 << 7));
    }

    #[test]
    fn write_sets_access_bit_and_big_endian_payload() {
        assert_eq!(
            write_datagram(reg::XTARGET, 0x1234_5678),
            [0xAD, 0x12, 0x34, 0x56, 0x78]
        );
        assert_eq!(read_datagram(reg::XACTUAL | 0x80)[0], 0x21);
    }

    #[test]
    fn vactual_is_signed_24_bit() {
        assert_eq!(sign_extend_24(0x00_FF_FF_FF), -1);
        assert_eq!(sign_extend_24(0x00_7F_FF_FF), 0x7F_FFFF);
        assert_eq!(sign_extend_24(0x00_80_00_00), -0x80_0000);
    }

    #[test]
    fn register_scales_at_16mhz() {
        let sps = vreg_to_steps_per_s(1_048_576.0, DEFAULT_FCLK_HZ);
        assert!((sps - 1_000_000.0).abs() < 1e-6);
        let a = areg_to_steps_per_s2(1.0, DEFAULT_FCLK_HZ);
        assert!((a - 1.0 / 0.008_589_934_592).abs() < 1e-6);
    }
}
