//! MFRC522 RFID reader and MIFARE Classic support for the CrowPi board.
//!
//! The crate is layered bottom-up:
//!
//! - [`register`]: MFRC522 register map and SPI framing
//! - [`pcd`]: chip control (reset, init, antenna, command execution)
//! - [`crc`]: CRC_A through the chip's coprocessor
//! - [`picc`]: ISO 14443-3 type A card commands (REQA, anti-collision, SELECT, HLTA)
//! - [`auth`] and [`block`]: MIFARE Classic authentication and 16-byte block I/O
//! - [`reader`]: the thread-safe [`RfidReader`] facade that tracks the
//!   selected card and the authenticated sector
//! - [`storage`]: byte and JSON value storage over the data blocks
//! - [`poller`]: background card detection on a tokio runtime
//!
//! # Example
//!
//! ```
//! use crowpi_rfid::mock::{SimulatedCard, SimulatedPcd};
//! use crowpi_rfid::{MifareKey, RfidConfig, RfidReader};
//! use std::time::Duration;
//!
//! # fn main() -> crowpi_rfid::Result<()> {
//! let (chip, handle) = SimulatedPcd::new();
//! handle.insert_card(SimulatedCard::classic_1k(&[0x04, 0xA1, 0xB2, 0xC3]));
//!
//! let reader = RfidReader::new(chip, RfidConfig::for_testing())?;
//! if let Some(card) = reader.detect_card(Duration::from_millis(50))? {
//!     println!("{} {}", card.card_type, card.uid);
//!
//!     let key = MifareKey::default_a();
//!     reader.write_block_with_key(&key, 4, &[0x01; 16])?;
//!     assert_eq!(reader.read_block_with_key(&key, 4)?, [0x01; 16]);
//! }
//! reader.release();
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod block;
pub mod card;
pub mod config;
pub mod crc;
pub mod error;
pub mod key;
pub mod mock;
pub mod pcd;
pub mod picc;
pub mod poller;
pub mod reader;
pub mod register;
pub mod storage;

pub use auth::AuthenticatedSession;
pub use block::Block;
pub use card::{Atqa, CardType, ClassicGeometry, DetectedCard, Uid, UidSize};
pub use config::{RetryPolicy, RfidConfig};
pub use error::{Result, RfidError};
pub use key::{KeySlot, MifareKey};
pub use pcd::{ChipVersion, Pcd, PcdCommand};
pub use poller::{CardEvent, CardPoller, PollerHandle};
pub use reader::{PollMode, RfidReader};

pub use crowpi_hardware::{HardwareError, ResetPin, SpiTransport, TransportConfig};

#[cfg(feature = "hardware-spi")]
pub use crowpi_hardware::{RppalResetPin, RppalSpi};

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
