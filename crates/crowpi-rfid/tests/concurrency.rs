//! A reader shared between threads serializes whole operations.

mod common;

use crowpi_rfid::{MifareKey, RfidError};
use std::sync::Arc;
use std::thread;

#[test]
fn test_threads_share_one_reader() {
    let (reader, handle) = common::reader_with_card();
    let reader = Arc::new(reader);
    common::select(&reader);

    // Each thread owns one sector; sector switches re-select the card
    let workers: Vec<_> = (1u8..=4)
        .map(|sector| {
            let reader = Arc::clone(&reader);
            thread::spawn(move || {
                let key = MifareKey::default_a();
                let block = sector * 4;
                for round in 0..5u8 {
                    let data = [sector ^ round; 16];
                    reader.write_block_with_key(&key, block, &data)?;
                    assert_eq!(reader.read_block_with_key(&key, block)?, data);
                }
                Ok::<_, RfidError>(())
            })
        })
        .collect();

    for worker in workers {
        worker.join().expect("worker panicked").unwrap();
    }

    for sector in 1u8..=4 {
        assert_eq!(handle.card_block(0, sector * 4), Some([sector ^ 4; 16]));
    }
}

#[test]
fn test_concurrent_detection_and_release() {
    let (reader, _) = common::reader_with_card();
    let reader = Arc::new(reader);

    let detectors: Vec<_> = (0..4)
        .map(|_| {
            let reader = Arc::clone(&reader);
            thread::spawn(move || {
                for _ in 0..10 {
                    // WUPA wakes the card even when another thread halted it
                    let card = reader.detect_any_card(common::DETECT_TIMEOUT).unwrap();
                    assert_eq!(card.map(|c| c.uid.to_hex()), Some("04A1B2C3".to_string()));
                    reader.release();
                }
            })
        })
        .collect();

    for detector in detectors {
        detector.join().expect("detector panicked");
    }
    assert!(reader.current_card().is_none());
}
