//! Shared fixtures for the reader integration tests.
//!
//! Every test runs against the simulated MFRC522 so the full register-level
//! path (SPI framing, FIFO, interrupts, CRC coprocessor) is exercised.

#![allow(dead_code)]

use crowpi_rfid::mock::{SimulatedCard, SimulatedPcd, SimulatedPcdHandle};
use crowpi_rfid::{DetectedCard, RfidConfig, RfidReader};
use std::sync::Once;
use std::time::Duration;

/// UID of the card used by most scenarios.
pub const UID: [u8; 4] = [0x04, 0xA1, 0xB2, 0xC3];

/// Seven-byte UID for double cascade scenarios.
pub const DOUBLE_UID: [u8; 7] = [0x04, 0x52, 0x61, 0x7A, 0x3C, 0x49, 0x80];

/// Detection window generous enough for the simulator.
pub const DETECT_TIMEOUT: Duration = Duration::from_millis(50);

static TRACING: Once = Once::new();

/// Route `tracing` output to the test harness once per binary.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    });
}

/// Reader over an empty field.
pub fn empty_reader() -> (RfidReader<SimulatedPcd>, SimulatedPcdHandle) {
    init_tracing();
    let (chip, handle) = SimulatedPcd::new();
    let reader = RfidReader::new(chip, RfidConfig::for_testing()).expect("reader init");
    (reader, handle)
}

/// Reader with `card` in the field.
pub fn reader_with(card: SimulatedCard) -> (RfidReader<SimulatedPcd>, SimulatedPcdHandle) {
    let (reader, handle) = empty_reader();
    handle.insert_card(card);
    (reader, handle)
}

/// Reader with a factory-fresh MIFARE Classic 1K carrying [`UID`].
pub fn reader_with_card() -> (RfidReader<SimulatedPcd>, SimulatedPcdHandle) {
    reader_with(SimulatedCard::classic_1k(&UID))
}

/// Detect and select the card, failing the test if none shows up.
pub fn select(reader: &RfidReader<SimulatedPcd>) -> DetectedCard {
    reader
        .detect_card(DETECT_TIMEOUT)
        .expect("detection must not fail")
        .expect("card must be detected")
}
