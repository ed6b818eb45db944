//! Raspberry Pi transport backed by `rppal`.
//!
//! Only compiled with the `hardware-spi` feature.

use crate::traits::{ResetPin, SpiTransport};
use crate::types::TransportConfig;
use crate::{HardwareError, Result};
use ::rppal::gpio::{Gpio, OutputPin};
use ::rppal::spi::{Bus, Mode, SlaveSelect, Spi};

/// SPI0 on the Raspberry Pi header, mode 0.
#[derive(Debug)]
pub struct RppalSpi {
    spi: Spi,
}

impl RppalSpi {
    /// Open SPI0 with the channel and clock from `config`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an invalid config, or an
    /// initialization error if the spidev device cannot be opened.
    pub fn open(config: &TransportConfig) -> Result<Self> {
        config.validate()?;

        let slave = match config.spi_channel {
            0 => SlaveSelect::Ss0,
            1 => SlaveSelect::Ss1,
            _ => SlaveSelect::Ss2,
        };

        let spi = Spi::new(Bus::Spi0, slave, config.baud_rate, Mode::Mode0)
            .map_err(|e| HardwareError::initialization_failed(format!("SPI0: {e}")))?;

        tracing::debug!(
            channel = config.spi_channel,
            baud = config.baud_rate,
            "Opened SPI transport"
        );
        Ok(Self { spi })
    }
}

impl SpiTransport for RppalSpi {
    fn transfer(&mut self, tx: &[u8]) -> Result<Vec<u8>> {
        let mut rx = vec![0u8; tx.len()];
        let count = self
            .spi
            .transfer(&mut rx, tx)
            .map_err(|e| HardwareError::communication(e.to_string()))?;

        if count != tx.len() {
            return Err(HardwareError::invalid_data(format!(
                "SPI transferred {count} of {} bytes",
                tx.len()
            )));
        }
        Ok(rx)
    }
}

/// GPIO output used as the reader's reset line.
#[derive(Debug)]
pub struct RppalResetPin {
    pin: OutputPin,
}

impl RppalResetPin {
    /// Claim BCM pin `bcm` as an output, initially low (device held in reset).
    ///
    /// # Errors
    ///
    /// Returns an initialization error if the GPIO cannot be claimed.
    pub fn open(bcm: u8) -> Result<Self> {
        let mut pin = Gpio::new()
            .and_then(|gpio| gpio.get(bcm))
            .map_err(|e| HardwareError::initialization_failed(format!("GPIO {bcm}: {e}")))?
            .into_output_low();
        pin.set_reset_on_drop(false);
        Ok(Self { pin })
    }
}

impl ResetPin for RppalResetPin {
    fn is_low(&mut self) -> Result<bool> {
        Ok(self.pin.is_set_low())
    }

    fn set_high(&mut self) -> Result<()> {
        self.pin.set_high();
        Ok(())
    }

    fn set_low(&mut self) -> Result<()> {
        self.pin.set_low();
        Ok(())
    }
}
