//! AEAT-style absolute magnetic encoder read over a 24-bit SSI/SPI frame:
//! 16-bit angle (MSB first) followed by one status byte.

use stepctl_traits::{AngleSample, AngleSource, BoxError, SampleStatus};

use crate::error::{HwError, Result};
use crate::transport::SpiTransport;

pub const FRAME_LEN: usize = 3;

/// Decode one frame. A bus with nothing attached floats to all ones or all
/// zeros; both are rejected as `NotDetected`.
pub fn decode_frame(frame: &[u8; FRAME_LEN]) -> Result<AngleSample> {
    if frame.iter().all(|&b| b == 0xFF) || frame.iter().all(|&b| b == 0x00) {
        return Err(HwError::NotDetected("encoder bus idle"));
    }
    let angle = u16::from_be_bytes([frame[0], frame[1]]);
    Ok(AngleSample::new(angle, SampleStatus::from_bits(frame[2])))
}

pub struct AeatEncoder<T: SpiTransport> {
    spi: T,
}

impl<T: SpiTransport> AeatEncoder<T> {
    pub fn new(spi: T) -> Self {
        Self { spi }
    }

    pub fn read_frame(&mut self) -> Result<AngleSample> {
        let mut frame = [0u8; FRAME_LEN];
        self.spi.transfer(&mut frame)?;
        decode_frame(&frame)
    }
}

impl<T: SpiTransport> AngleSource for AeatEncoder<T> {
    fn capture_sample(&mut self) -> std::result::Result<AngleSample, BoxError> {
        Ok(self.read_frame()?)
    }

    fn detect_presence(&mut self) -> bool {
        match self.read_frame() {
            Ok(s) => !(s.status.magnet_too_weak() || s.status.magnet_too_strong()),
            Err(e) => {
                tracing::debug!(error = %e, "encoder presence check failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Canned([u8; FRAME_LEN]);

    impl SpiTransport for Canned {
        fn transfer(&mut self, buf: &mut [u8]) -> Result<()> {
            buf.copy_from_slice(&self.0);
            Ok(())
        }
    }

    #[test]
    fn frame_is_angle_then_status() {
        let s = decode_frame(&[0x12, 0x34, 0x00]).unwrap();
        assert_eq!(s.angle, 0x1234);
        assert!(s.status.is_valid());
        let s = decode_frame(&[0x00, 0x01, SampleStatus::MAG_HIGH]).unwrap();
        assert!(s.status.magnet_too_strong());
    }

    #[test]
    fn idle_bus_is_not_detected() {
        assert!(matches!(
            decode_frame(&[0xFF; 3]),
            Err(HwError::NotDetected(_))
        ));
        let mut enc = AeatEncoder::new(Canned([0; 3]));
        assert!(!enc.detect_presence());
    }

    #[test]
    fn weak_magnet_reads_but_is_not_present() {
        let mut enc = AeatEncoder::new(Canned([0x40, 0x00, SampleStatus::MAG_LOW]));
        assert_eq!(enc.capture_sample().unwrap().angle, 0x4000);
        assert!(!enc.detect_presence());
    }
}
