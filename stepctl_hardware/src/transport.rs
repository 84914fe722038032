//! Byte-level SPI seam shared by the driver and encoder front ends.

use crate::error::Result;

/// Full-duplex SPI transfer with chip select asserted for the whole buffer.
///
/// On return `buf` holds the bytes clocked in while the original contents
/// were clocked out.
pub trait SpiTransport {
    fn transfer(&mut self, buf: &mut [u8]) -> Result<()>;
}

impl<T: SpiTransport + ?Sized> SpiTransport for &mut T {
    fn transfer(&mut self, buf: &mut [u8]) -> Result<()> {
        (**self).transfer(buf)
    }
}

#[cfg(feature = "hardware")]
pub use rppal_spi::RppalSpi;

#[cfg(feature = "hardware")]
mod rppal_spi {
    use super::SpiTransport;
    use crate::error::{HwError, Result};
    use rppal::spi::{Bus, Mode, SlaveSelect, Spi};

    /// Raspberry Pi hardware SPI bus.
    pub struct RppalSpi {
        spi: Spi,
        scratch: Vec<u8>,
    }

    impl RppalSpi {
        /// Open `bus`/`slave` in SPI mode 3 (TMC5130 and AEAT both sample on
        /// the rising edge with an idle-high clock).
        pub fn open(bus: u8, slave: u8, clock_hz: u32) -> Result<Self> {
            let bus = match bus {
                0 => Bus::Spi0,
                1 => Bus::Spi1,
                _ => return Err(HwError::Spi(format!("unsupported bus {bus}"))),
            };
            let slave = match slave {
                0 => SlaveSelect::Ss0,
                1 => SlaveSelect::Ss1,
                2 => SlaveSelect::Ss2,
                _ => return Err(HwError::Spi(format!("unsupported slave select {slave}"))),
            };
            let spi = Spi::new(bus, slave, clock_hz, Mode::Mode3)
                .map_err(|e| HwError::Spi(e.to_string()))?;
            Ok(Self {
                spi,
                scratch: Vec::with_capacity(8),
            })
        }
    }

    impl SpiTransport for RppalSpi {
        fn transfer(&mut self, buf: &mut [u8]) -> Result<()> {
            self.scratch.clear();
            self.scratch.extend_from_slice(buf);
            self.spi
                .transfer(buf, &self.scratch)
                .map_err(|e| HwError::Spi(e.to_string()))?;
            Ok(())
        }
    }
}
