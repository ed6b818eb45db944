//! Transport configuration types.
//!
//! Describes how a peripheral is wired to the board. The defaults match the
//! RFID reader slot of the CrowPi: SPI channel 0 at 1 MHz with the reset line
//! on BCM 25.

use serde::{Deserialize, Serialize};

/// Default SPI channel (chip-select line) for the RFID reader.
pub const DEFAULT_SPI_CHANNEL: u8 = 0;

/// Default SPI clock in Hz.
pub const DEFAULT_SPI_BAUD_RATE: u32 = 1_000_000;

/// Default BCM pin of the reader's reset line.
pub const DEFAULT_RESET_PIN: u8 = 25;

/// SPI wiring of a peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// SPI chip-select channel (0 or 1 on the Raspberry Pi SPI0 bus).
    pub spi_channel: u8,

    /// SPI clock in Hz.
    pub baud_rate: u32,

    /// BCM pin number of the reset line, if it is wired.
    pub reset_pin: Option<u8>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            spi_channel: DEFAULT_SPI_CHANNEL,
            baud_rate: DEFAULT_SPI_BAUD_RATE,
            reset_pin: Some(DEFAULT_RESET_PIN),
        }
    }
}

impl TransportConfig {
    /// Create a configuration for the given channel and baud rate, without a
    /// reset line.
    pub fn new(spi_channel: u8, baud_rate: u32) -> Self {
        Self {
            spi_channel,
            baud_rate,
            reset_pin: None,
        }
    }

    /// Set the reset line.
    pub fn with_reset_pin(mut self, bcm: u8) -> Self {
        self.reset_pin = Some(bcm);
        self
    }

    /// Check the configuration for values the bus cannot honour.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a zero baud rate or a chip-select
    /// channel above 2.
    pub fn validate(&self) -> crate::Result<()> {
        if self.baud_rate == 0 {
            return Err(crate::HardwareError::configuration(
                "SPI baud rate must be non-zero",
            ));
        }
        if self.spi_channel > 2 {
            return Err(crate::HardwareError::configuration(format!(
                "SPI channel must be 0-2, got {}",
                self.spi_channel
            )));
        }
        Ok(())
    }
}
