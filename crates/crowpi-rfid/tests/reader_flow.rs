//! End-to-end card sessions through the public reader API.
//!
//! Each scenario drives the simulated chip from detection to release:
//! 1. Detection and selection (single and double size UIDs)
//! 2. Authentication and block I/O
//! 3. Failure paths (corrupted frames, wrong keys, lost transport)

mod common;

use common::{DETECT_TIMEOUT, DOUBLE_UID, UID};
use crowpi_rfid::mock::SimulatedCard;
use crowpi_rfid::{CardType, HardwareError, MifareKey, PollMode, RfidError, UidSize};
use rstest::rstest;
use std::time::{Duration, Instant};

// ============================================================================
// Detection
// ============================================================================

#[test]
fn test_detect_and_identify_1k() {
    let (reader, _) = common::reader_with_card();

    let card = common::select(&reader);

    assert_eq!(card.uid.as_bytes(), &UID);
    assert_eq!(card.uid.to_string(), "04 A1 B2 C3");
    assert_eq!(card.card_type, CardType::MifareClassic1K);
    assert_eq!(card.sak, 0x08);
    assert_eq!(reader.current_card(), Some(card));
}

#[test]
fn test_detect_double_size_uid() {
    let (reader, _) = common::reader_with(SimulatedCard::classic_1k(&DOUBLE_UID));

    let card = common::select(&reader);

    assert_eq!(card.uid.size(), UidSize::Double);
    assert_eq!(card.uid.as_bytes(), &DOUBLE_UID);
    assert_eq!(card.card_type, CardType::MifareClassic1K);
}

#[rstest]
#[case::mini(SimulatedCard::classic_mini(&UID), CardType::MifareMini, 20)]
#[case::classic_1k(SimulatedCard::classic_1k(&UID), CardType::MifareClassic1K, 64)]
#[case::classic_4k(SimulatedCard::classic_4k(&UID), CardType::MifareClassic4K, 256)]
fn test_card_family_geometry(
    #[case] card: SimulatedCard,
    #[case] expected: CardType,
    #[case] blocks: u16,
) {
    let (reader, _) = common::reader_with(card);

    let detected = common::select(&reader);

    assert_eq!(detected.card_type, expected);
    assert_eq!(detected.geometry().unwrap().total_blocks(), blocks);
}

#[test]
fn test_no_card_times_out_without_error() {
    let (reader, _) = common::empty_reader();
    let timeout = Duration::from_millis(200);

    let started = Instant::now();
    let result = reader.detect_card(timeout).unwrap();
    let elapsed = started.elapsed();

    assert!(result.is_none());
    assert!(elapsed >= timeout, "returned after {elapsed:?}");
    assert!(elapsed < timeout * 5, "returned after {elapsed:?}");
    assert!(reader.current_card().is_none());
}

#[test]
fn test_poll_once_any_card_wakes_halted_card() {
    let (reader, _) = common::reader_with_card();
    common::select(&reader);
    reader.release();

    assert!(reader.poll_once(PollMode::NewCards).unwrap().is_none());
    let card = reader.poll_once(PollMode::AnyCard).unwrap().unwrap();
    assert_eq!(card.uid.as_bytes(), &UID);
}

#[test]
fn test_two_cards_collide() {
    let (reader, handle) = common::reader_with_card();
    handle.insert_card(SimulatedCard::classic_1k(&[0x08, 0x11, 0x22, 0x33]));

    let err = reader.detect_card(DETECT_TIMEOUT).unwrap_err();

    assert!(matches!(err, RfidError::Collision { .. }));
    assert!(err.is_retryable());
    assert!(reader.current_card().is_none());
}

// ============================================================================
// Authentication and block I/O
// ============================================================================

#[test]
fn test_write_then_read_back() {
    let (reader, handle) = common::reader_with_card();
    common::select(&reader);

    reader.authenticate(1, &MifareKey::key_a([0xFF; 6])).unwrap();
    reader.write_block(4, &[0x01; 16]).unwrap();

    assert_eq!(reader.read_block(4).unwrap(), [0x01; 16]);
    assert_eq!(handle.card_block(0, 4), Some([0x01; 16]));
}

#[test]
fn test_custom_keys() {
    let key_a = [0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5];
    let key_b = [0xB0, 0xB1, 0xB2, 0xB3, 0xB4, 0xB5];
    let card = SimulatedCard::classic_1k(&UID)
        .with_sector_keys(2, key_a, key_b)
        .with_block(9, [0x42; 16]);
    let (reader, _) = common::reader_with(card);
    common::select(&reader);

    assert_eq!(
        reader.read_block_with_key(&MifareKey::key_b(key_b), 9).unwrap(),
        [0x42; 16]
    );
}

#[test]
fn test_wrong_key_is_unauthorized() {
    let card = SimulatedCard::classic_1k(&UID).with_sector_keys(1, [0x11; 6], [0x22; 6]);
    let (reader, _) = common::reader_with(card);
    common::select(&reader);

    let err = reader
        .authenticate(1, &MifareKey::key_a([0xFF; 6]))
        .unwrap_err();
    assert!(matches!(err, RfidError::Unauthorized { .. }));
    assert_eq!(reader.authenticated_sector(), None);

    // No session: block reads are refused
    assert!(matches!(
        reader.read_block(4),
        Err(RfidError::Unauthorized { .. })
    ));

    // Card stays selected; the right key still works
    reader.authenticate(1, &MifareKey::key_a([0x11; 6])).unwrap();
    assert_eq!(reader.read_block(4).unwrap(), [0x00; 16]);
}

#[test]
fn test_block_outside_card_sends_nothing() {
    let (reader, handle) = common::reader_with_card();
    common::select(&reader);
    reader.authenticate(15, &MifareKey::default_a()).unwrap();
    let before = handle.transfer_count();

    assert!(matches!(
        reader.read_block(64),
        Err(RfidError::Protocol { .. })
    ));
    assert!(matches!(
        reader.authenticate(16, &MifareKey::default_a()),
        Err(RfidError::Protocol { .. })
    ));
    assert_eq!(handle.transfer_count(), before);
}

#[test]
fn test_block_of_other_sector_sends_nothing() {
    let (reader, handle) = common::reader_with_card();
    common::select(&reader);
    reader.authenticate(1, &MifareKey::default_a()).unwrap();
    let before = handle.transfer_count();

    assert!(matches!(
        reader.read_block(8),
        Err(RfidError::Unauthorized { .. })
    ));
    assert!(matches!(
        reader.write_block(8, &[0xAA; 16]),
        Err(RfidError::Unauthorized { .. })
    ));
    assert_eq!(handle.transfer_count(), before);
}

#[test]
fn test_4k_large_sector() {
    let (reader, _) = common::reader_with(SimulatedCard::classic_4k(&UID));
    common::select(&reader);
    let key = MifareKey::default_a();

    // Sector 39: blocks 240..=255, trailer 255
    reader.write_block_with_key(&key, 254, &[0x39; 16]).unwrap();
    assert_eq!(reader.read_block(254).unwrap(), [0x39; 16]);
    assert_eq!(reader.authenticated_sector(), Some(39));
    assert!(matches!(
        reader.write_block(255, &[0; 16]),
        Err(RfidError::Protocol { .. })
    ));
}

// ============================================================================
// Failure paths
// ============================================================================

#[test]
fn test_corrupted_sak_crc_is_a_protocol_error() {
    let (reader, handle) = common::reader_with_card();
    handle.corrupt_next_sak_crc();

    let err = reader.detect_card(DETECT_TIMEOUT).unwrap_err();

    assert!(matches!(err, RfidError::Protocol { .. }));
    assert!(reader.current_card().is_none());
}

#[test]
fn test_corrupted_read_drops_session() {
    let (reader, handle) = common::reader_with_card();
    common::select(&reader);
    reader.authenticate(1, &MifareKey::default_a()).unwrap();

    handle.corrupt_next_read_crc();
    assert!(matches!(
        reader.read_block(4),
        Err(RfidError::Protocol { .. })
    ));
    assert_eq!(reader.authenticated_sector(), None);

    // Re-authentication re-selects the card
    reader.authenticate(1, &MifareKey::default_a()).unwrap();
    assert_eq!(reader.read_block(4).unwrap(), [0x00; 16]);
}

#[test]
fn test_nak_on_write() {
    let (reader, handle) = common::reader_with_card();
    common::select(&reader);
    reader.authenticate(1, &MifareKey::default_a()).unwrap();

    handle.nak_next_write();
    let err = reader.write_block(5, &[0x77; 16]).unwrap_err();

    assert!(matches!(err, RfidError::Write { block: 5, .. }));
    assert_eq!(handle.card_block(0, 5), Some([0x00; 16]));
}

#[test]
fn test_transport_failure_surfaces() {
    let (reader, handle) = common::reader_with_card();
    handle.disconnect();

    let err = reader.detect_card(DETECT_TIMEOUT).unwrap_err();

    assert!(matches!(
        err,
        RfidError::Transport(HardwareError::Disconnected { .. })
    ));
    assert!(err.is_fatal());
}

#[test]
fn test_card_removed_mid_session() {
    let (reader, handle) = common::reader_with_card();
    common::select(&reader);
    reader.authenticate(1, &MifareKey::default_a()).unwrap();

    handle.remove_cards();

    let err = reader.read_block(4).unwrap_err();
    assert!(matches!(err, RfidError::Timeout { .. }));
    assert_eq!(reader.authenticated_sector(), None);
}

// ============================================================================
// Release
// ============================================================================

#[test]
fn test_release_is_idempotent() {
    let (reader, handle) = common::reader_with_card();
    common::select(&reader);
    reader.authenticate(1, &MifareKey::default_a()).unwrap();

    reader.release();
    assert!(!handle.crypto1_on());
    let after_first = handle.transfer_count();

    reader.release();
    assert_eq!(handle.transfer_count(), after_first);
    assert!(reader.current_card().is_none());
}

#[test]
fn test_release_survives_broken_transport() {
    let (reader, handle) = common::reader_with_card();
    common::select(&reader);

    handle.disconnect();
    reader.release();

    assert!(reader.current_card().is_none());
}
