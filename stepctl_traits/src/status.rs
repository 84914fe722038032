//! Small value types exchanged across the hardware seams.

/// Rotation direction as seen by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Direction {
    #[default]
    Clockwise,
    CounterClockwise,
}

impl Direction {
    /// Direction of a signed quantity; zero maps to `Clockwise`.
    #[inline]
    pub fn from_sign(v: f64) -> Self {
        if v < 0.0 {
            Self::CounterClockwise
        } else {
            Self::Clockwise
        }
    }

    #[inline]
    pub fn reversed(self) -> Self {
        match self {
            Self::Clockwise => Self::CounterClockwise,
            Self::CounterClockwise => Self::Clockwise,
        }
    }

    /// +1 for clockwise, -1 for counter-clockwise.
    #[inline]
    pub fn signum(self) -> i32 {
        match self {
            Self::Clockwise => 1,
            Self::CounterClockwise => -1,
        }
    }
}

/// Encoder status byte. A sample is trusted only when no bit is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SampleStatus(u8);

impl SampleStatus {
    pub const MAG_LOW: u8 = 0x01;
    pub const MAG_HIGH: u8 = 0x02;
    pub const PARITY: u8 = 0x04;
    pub const NOT_READY: u8 = 0x08;

    #[inline]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }
    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }
    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 == 0
    }
    #[inline]
    pub const fn magnet_too_weak(self) -> bool {
        self.0 & Self::MAG_LOW != 0
    }
    #[inline]
    pub const fn magnet_too_strong(self) -> bool {
        self.0 & Self::MAG_HIGH != 0
    }
    #[inline]
    pub const fn parity_error(self) -> bool {
        self.0 & Self::PARITY != 0
    }
    #[inline]
    pub const fn not_ready(self) -> bool {
        self.0 & Self::NOT_READY != 0
    }
}

/// One encoder reading: angle modulo one revolution plus status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AngleSample {
    pub angle: u16,
    pub status: SampleStatus,
}

impl AngleSample {
    #[inline]
    pub const fn new(angle: u16, status: SampleStatus) -> Self {
        Self { angle, status }
    }

    /// A healthy sample at `angle`.
    #[inline]
    pub const fn valid(angle: u16) -> Self {
        Self {
            angle,
            status: SampleStatus(0),
        }
    }
}

/// Driver ramp status flags.
///
/// Bit layout follows the TMC5130 SPI status byte so raw values read from a
/// real chip decode unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DriverStatus {
    pub reset: bool,
    pub driver_error: bool,
    pub stallguard: bool,
    pub standstill: bool,
    pub velocity_reached: bool,
    pub position_reached: bool,
    pub stop_left: bool,
    pub stop_right: bool,
}

impl DriverStatus {
    pub const RESET: u8 = 1 << 0;
    pub const DRIVER_ERROR: u8 = 1 << 1;
    pub const STALLGUARD: u8 = 1 << 2;
    pub const STANDSTILL: u8 = 1 << 3;
    pub const VELOCITY_REACHED: u8 = 1 << 4;
    pub const POSITION_REACHED: u8 = 1 << 5;
    pub const STOP_LEFT: u8 = 1 << 6;
    pub const STOP_RIGHT: u8 = 1 << 7;

    pub const fn from_bits(bits: u8) -> Self {
        Self {
            reset: bits & Self::RESET != 0,
            driver_error: bits & Self::DRIVER_ERROR != 0,
            stallguard: bits & Self::STALLGUARD != 0,
            standstill: bits & Self::STANDSTILL != 0,
            velocity_reached: bits & Self::VELOCITY_REACHED != 0,
            position_reached: bits & Self::POSITION_REACHED != 0,
            stop_left: bits & Self::STOP_LEFT != 0,
            stop_right: bits & Self::STOP_RIGHT != 0,
        }
    }

    pub const fn bits(self) -> u8 {
        let mut b = 0;
        if self.reset {
            b |= Self::RESET;
        }
        if self.driver_error {
            b |= Self::DRIVER_ERROR;
        }
        if self.stallguard {
            b |= Self::STALLGUARD;
        }
        if self.standstill {
            b |= Self::STANDSTILL;
        }
        if self.velocity_reached {
            b |= Self::VELOCITY_REACHED;
        }
        if self.position_reached {
            b |= Self::POSITION_REACHED;
        }
        if self.stop_left {
            b |= Self::STOP_LEFT;
        }
        if self.stop_right {
            b |= Self::STOP_RIGHT;
        }
        b
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_status_bits_are_stable() {
        for bits in 0..=u8::MAX {
            assert_eq!(DriverStatus::from_bits(bits).bits(), bits);
        }
        let s = DriverStatus::from_bits(0b0010_1000);
        assert!(s.standstill && s.position_reached);
        assert!(!s.stallguard && !s.velocity_reached);
    }

    #[test]
    fn sample_status_valid_only_when_clear() {
        assert!(SampleStatus::from_bits(0).is_valid());
        let s = SampleStatus::from_bits(SampleStatus::MAG_LOW | SampleStatus::PARITY);
        assert!(!s.is_valid());
        assert!(s.magnet_too_weak() && s.parity_error());
        assert!(!s.magnet_too_strong() && !s.not_ready());
    }

    #[test]
    fn direction_from_sign() {
        assert_eq!(Direction::from_sign(-0.1), Direction::CounterClockwise);
        assert_eq!(Direction::from_sign(0.0), Direction::Clockwise);
        assert_eq!(Direction::Clockwise.reversed().signum(), -1);
    }
}
