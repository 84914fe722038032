use std::collections::HashMap;

use rstest::rstest;
use stepctl_hardware::HwError;
use stepctl_hardware::tmc5130::{RampMode, RampProfile, Tmc5130, ihold_irun, reg};
use stepctl_hardware::transport::SpiTransport;
use stepctl_traits::{Direction, MotionActuator};

/// Register file that answers like the chip: status byte first, and the
/// payload of the previously addressed read.
#[derive(Default)]
struct FakeChip {
    regs: HashMap<u8, u32>,
    pending: u32,
    status: u8,
    log: Vec<[u8; 5]>,
}

impl SpiTransport for FakeChip {
    fn transfer(&mut self, buf: &mut [u8]) -> stepctl_hardware::error::Result<()> {
        let frame = <[u8; 5]>::try_from(&buf[..])
            .map_err(|_| HwError::Spi("bad frame length".into()))?;
        self.log.push(frame);
        let addr = frame[0] & 0x7F;
        let value = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]);
        let reply = self.pending;
        if frame[0] & reg::WRITE_ACCESS != 0 {
            self.regs.insert(addr, value);
        } else {
            self.pending = self.regs.get(&addr).copied().unwrap_or(0);
        }
        buf[0] = self.status;
        buf[1..].copy_from_slice(&reply.to_be_bytes());
        Ok(())
    }
}

fn writes(chip: &FakeChip) -> Vec<(u8, u32)> {
    chip.log
        .iter()
        .filter(|f| f[0] & reg::WRITE_ACCESS != 0)
        .map(|f| (f[0] & 0x7F, u32::from_be_bytes([f[1], f[2], f[3], f[4]])))
        .collect()
}

#[test]
fn init_writes_profile_and_zeroes_position() {
    let mut drv = Tmc5130::new(FakeChip::default());
    drv.init(&RampProfile::default(), 10, 3).unwrap();
    let chip = drv.into_inner();
    let w = writes(&chip);
    assert_eq!(w[0], (reg::IHOLD_IRUN, ihold_irun(3, 10, 7)));
    assert_eq!(w[1], (reg::GCONF, 0x04));
    assert_eq!(chip.regs[&reg::PWMCONF], 0x0004_01C8);
    assert_eq!(chip.regs[&reg::VMAX], 200_000);
    assert_eq!(chip.regs[&reg::AMAX], 400);
    assert_eq!(chip.regs[&reg::DMAX], 800);
    assert_eq!(chip.regs[&reg::RAMPMODE], RampMode::Positioning as u32);
    assert_eq!(w[w.len() - 2], (reg::XACTUAL, 0));
    assert_eq!(w[w.len() - 1], (reg::XTARGET, 0));
}

#[rstest]
#[case(Direction::Clockwise, RampMode::VelocityPositive)]
#[case(Direction::CounterClockwise, RampMode::VelocityNegative)]
fn velocity_command_selects_ramp_mode(#[case] dir: Direction, #[case] mode: RampMode) {
    let mut drv = Tmc5130::new(FakeChip::default());
    drv.set_target_velocity(12_345, dir).unwrap();
    let chip = drv.into_inner();
    assert_eq!(chip.regs[&reg::VMAX], 12_345);
    assert_eq!(chip.regs[&reg::RAMPMODE], mode as u32);
}

#[test]
fn positioning_restores_cruise_velocity() {
    let mut drv = Tmc5130::new(FakeChip::default());
    drv.set_velocity_limit(50_000).unwrap();
    drv.set_target_velocity(1_000, Direction::Clockwise).unwrap();
    drv.set_target_position(-200).unwrap();
    let chip = drv.into_inner();
    assert_eq!(chip.regs[&reg::VMAX], 50_000);
    assert_eq!(chip.regs[&reg::XTARGET], (-200i32) as u32);
    assert_eq!(chip.regs[&reg::RAMPMODE], 0);
}

#[test]
fn reads_are_pipelined_and_signed() {
    let mut chip = FakeChip::default();
    chip.regs.insert(reg::XACTUAL, (-4_000i32) as u32);
    chip.regs.insert(reg::VACTUAL, 0x00FF_FF00);
    chip.status = 0b0000_1000;
    let mut drv = Tmc5130::new(chip);
    assert_eq!(drv.position().unwrap(), -4_000);
    assert_eq!(drv.velocity().unwrap(), -256);
    assert!(drv.status().unwrap().standstill);
}

#[test]
fn acceleration_limits_are_clamped_to_register_width() {
    let mut drv = Tmc5130::new(FakeChip::default());
    drv.set_acceleration_limits(1_000_000, 500).unwrap();
    let chip = drv.into_inner();
    assert_eq!(chip.regs[&reg::AMAX], 65_535);
    assert_eq!(chip.regs[&reg::DMAX], 500);
}
