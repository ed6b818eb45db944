//! Transport trait definitions.
//!
//! These traits are the boundary between protocol drivers and the physical
//! bus. A driver only ever needs two things from the board:
//!
//! - a full-duplex SPI transfer where the reply has exactly the length of the
//!   request ([`SpiTransport`]);
//! - an optional reset line it can drive high or low ([`ResetPin`]).
//!
//! Chip-select handling and clock configuration are the responsibility of the
//! implementation; drivers never touch them.
//!
//! All operations are blocking. An implementation must not partially apply a
//! transfer: either the whole frame is clocked out or an error is returned.

use crate::error::Result;

/// Full-duplex, byte-oriented SPI transport.
///
/// # Examples
///
/// ```
/// use crowpi_hardware::traits::SpiTransport;
/// use crowpi_hardware::mock::MockSpi;
///
/// # fn main() -> crowpi_hardware::Result<()> {
/// let (mut spi, _handle) = MockSpi::new();
/// let reply = spi.transfer(&[0x80, 0x00])?;
/// assert_eq!(reply.len(), 2);
/// # Ok(())
/// # }
/// ```
pub trait SpiTransport: Send {
    /// Clock `tx` out on MOSI and return the bytes sampled on MISO.
    ///
    /// The returned buffer always has the same length as `tx`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying bus fails. The caller must treat
    /// the frame as not delivered.
    fn transfer(&mut self, tx: &[u8]) -> Result<Vec<u8>>;
}

/// Reset line of a peripheral (active low).
pub trait ResetPin: Send {
    /// Whether the line is currently driven low (device held in reset or
    /// powered down).
    fn is_low(&mut self) -> Result<bool>;

    /// Drive the line high, releasing the device from reset.
    fn set_high(&mut self) -> Result<()>;

    /// Drive the line low, putting the device into hard power-down.
    fn set_low(&mut self) -> Result<()>;
}

impl<T: SpiTransport + ?Sized> SpiTransport for Box<T> {
    fn transfer(&mut self, tx: &[u8]) -> Result<Vec<u8>> {
        (**self).transfer(tx)
    }
}

impl<T: SpiTransport + ?Sized> SpiTransport for &mut T {
    fn transfer(&mut self, tx: &[u8]) -> Result<Vec<u8>> {
        (**self).transfer(tx)
    }
}

impl<T: ResetPin + ?Sized> ResetPin for Box<T> {
    fn is_low(&mut self) -> Result<bool> {
        (**self).is_low()
    }

    fn set_high(&mut self) -> Result<()> {
        (**self).set_high()
    }

    fn set_low(&mut self) -> Result<()> {
        (**self).set_low()
    }
}
