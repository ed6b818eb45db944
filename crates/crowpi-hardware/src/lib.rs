//! Transport abstraction layer for the CrowPi component drivers.
//!
//! This crate provides the byte-level boundary that register-mapped drivers
//! (such as the MFRC522 RFID reader in `crowpi-rfid`) are written against.
//! Drivers depend on the traits here, never on a concrete bus, so the same
//! driver runs on a Raspberry Pi, against a mock bus in unit tests, or
//! against a simulated chip.
//!
//! # Design Philosophy
//!
//! - **Blocking**: every operation is one synchronous bus transaction.
//! - **All-or-nothing**: a transfer either completes or returns an error; the
//!   driver never sees a partially clocked frame.
//! - **Thread-safe**: transports are `Send` so a driver can live behind a
//!   mutex shared by several threads.
//!
//! # Transports
//!
//! ## SPI
//!
//! The [`SpiTransport`] trait is a full-duplex transfer whose reply has the
//! same length as the request:
//!
//! ```
//! use crowpi_hardware::traits::SpiTransport;
//! use crowpi_hardware::error::Result;
//!
//! fn read_version<S: SpiTransport>(spi: &mut S) -> Result<u8> {
//!     // MFRC522 VersionReg (0x37), read flag set
//!     let reply = spi.transfer(&[0x80 | (0x37 << 1), 0x00])?;
//!     Ok(reply[1])
//! }
//! ```
//!
//! ## Reset line
//!
//! The [`ResetPin`] trait drives a peripheral's active-low reset input.
//!
//! # Mock Implementations
//!
//! [`mock::MockSpi`] and [`mock::MockResetPin`] record every operation and
//! support failure injection, for testing drivers without hardware.
//!
//! # Raspberry Pi
//!
//! With the `hardware-spi` feature, `RppalSpi` and `RppalResetPin` implement
//! the traits on top of the `rppal` crate.
//!
//! [`SpiTransport`]: traits::SpiTransport
//! [`ResetPin`]: traits::ResetPin

pub mod error;
pub mod mock;
#[cfg(feature = "hardware-spi")]
pub mod raspberry;
pub mod traits;
pub mod types;

// Re-export commonly used types for convenience
pub use error::{HardwareError, Result};
pub use traits::{ResetPin, SpiTransport};
pub use types::TransportConfig;

#[cfg(feature = "hardware-spi")]
pub use raspberry::{RppalResetPin, RppalSpi};
