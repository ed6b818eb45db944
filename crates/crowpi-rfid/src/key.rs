//! MIFARE Classic sector keys.
//!
//! A key is supplied by the caller for each authentication and never stored
//! by the reader. Equality is constant-time and `Debug` never prints the key
//! bytes.

use serde::{Deserialize, Serialize};
use std::fmt;
use subtle::ConstantTimeEq;

/// Length of a MIFARE Classic key.
pub const KEY_LEN: usize = 6;

/// Factory default key of blank cards.
pub const DEFAULT_KEY: [u8; KEY_LEN] = [0xFF; KEY_LEN];

/// Which of the two sector keys is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeySlot {
    A,
    B,
}

impl KeySlot {
    /// PICC authentication command for this slot.
    pub fn auth_command(self) -> u8 {
        match self {
            Self::A => 0x60,
            Self::B => 0x61,
        }
    }
}

impl fmt::Display for KeySlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A => write!(f, "key A"),
            Self::B => write!(f, "key B"),
        }
    }
}

/// A six-byte sector key and the slot it belongs to.
#[derive(Clone)]
pub struct MifareKey {
    slot: KeySlot,
    bytes: [u8; KEY_LEN],
}

impl MifareKey {
    pub fn new(slot: KeySlot, bytes: [u8; KEY_LEN]) -> Self {
        Self { slot, bytes }
    }

    pub fn key_a(bytes: [u8; KEY_LEN]) -> Self {
        Self::new(KeySlot::A, bytes)
    }

    pub fn key_b(bytes: [u8; KEY_LEN]) -> Self {
        Self::new(KeySlot::B, bytes)
    }

    /// Factory default key A (`FF FF FF FF FF FF`).
    pub fn default_a() -> Self {
        Self::key_a(DEFAULT_KEY)
    }

    /// Factory default key B (`FF FF FF FF FF FF`).
    pub fn default_b() -> Self {
        Self::key_b(DEFAULT_KEY)
    }

    pub fn slot(&self) -> KeySlot {
        self.slot
    }

    pub fn bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl PartialEq for MifareKey {
    fn eq(&self, other: &Self) -> bool {
        self.slot == other.slot && bool::from(self.bytes.ct_eq(&other.bytes))
    }
}

impl Eq for MifareKey {}

impl fmt::Debug for MifareKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MifareKey")
            .field("slot", &self.slot)
            .field("bytes", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_commands() {
        assert_eq!(KeySlot::A.auth_command(), 0x60);
        assert_eq!(KeySlot::B.auth_command(), 0x61);
    }

    #[test]
    fn test_default_keys() {
        assert_eq!(MifareKey::default_a().bytes(), &[0xFF; 6]);
        assert_eq!(MifareKey::default_b().slot(), KeySlot::B);
    }

    #[test]
    fn test_equality_includes_slot() {
        let a = MifareKey::key_a([1, 2, 3, 4, 5, 6]);
        assert_eq!(a, MifareKey::key_a([1, 2, 3, 4, 5, 6]));
        assert_ne!(a, MifareKey::key_b([1, 2, 3, 4, 5, 6]));
        assert_ne!(a, MifareKey::key_a([1, 2, 3, 4, 5, 7]));
    }

    #[test]
    fn test_debug_is_redacted() {
        let key = MifareKey::key_a([0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5]);
        let debug = format!("{key:?}");
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("A0"));
        assert!(!debug.contains("160"));
    }
}
