//! Simulated MFRC522 and MIFARE cards for testing without hardware.
//!
//! [`SimulatedPcd`] decodes register traffic the way the chip does and
//! forwards over-the-air frames to the [`SimulatedCard`]s in its field.
//! The [`SimulatedPcdHandle`] adds and removes cards, inspects registers and
//! injects faults (corrupted checksums, NAKs, a stalled CRC coprocessor,
//! transport failures).

mod card;
mod chip;

pub use card::SimulatedCard;
pub use chip::{SIMULATED_VERSION, SimulatedPcd, SimulatedPcdHandle, crc_a};
