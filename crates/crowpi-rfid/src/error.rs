//! Error taxonomy for RFID operations.
//!
//! Every chip status, protocol failure and transport failure is mapped to
//! exactly one variant of [`RfidError`] at the point where it is detected.
//! Raw chip status bytes never leave the crate.

use crate::card::CardType;
use crowpi_hardware::HardwareError;

/// Result type alias for RFID operations.
pub type Result<T> = std::result::Result<T, RfidError>;

/// Errors that can occur while talking to the reader chip or a card.
#[derive(Debug, thiserror::Error)]
pub enum RfidError {
    /// No card answered. Expected steady-state outcome of polling; returned
    /// as an error only by operations that need a selected card.
    #[error("No card present")]
    NoCardPresent,

    /// Several cards answered at once, or the anti-collision exchange was
    /// corrupted (BCC mismatch). Retry once the cards are separated.
    #[error("Collision: {reason}")]
    Collision { reason: String },

    /// A bounded polling loop exhausted its budget, or the chip's own
    /// timer expired waiting for a card reply.
    #[error("Timeout: {operation} did not complete within {polls} polls")]
    Timeout { operation: &'static str, polls: u32 },

    /// CRC mismatch, malformed frame, or an unexpected chip status. The
    /// data on the wire is corrupted; not retried automatically.
    #[error("Protocol error: {reason}")]
    Protocol { reason: String },

    /// Authentication failed, or a block operation was attempted without an
    /// authenticated session for the containing sector.
    #[error("Unauthorized: {reason}")]
    Unauthorized { reason: String },

    /// The card family does not support MIFARE Classic block I/O.
    #[error("Unsupported card: {card_type}")]
    UnsupportedCard { card_type: CardType },

    /// The card refused a write at one of the two ACK stages. The block's
    /// previous contents are presumed unchanged.
    #[error("Write to block {block} failed: {reason}")]
    Write { block: u8, reason: String },

    /// Payload does not fit into the card's data blocks.
    #[error("Data of {required} bytes exceeds card capacity of {capacity} bytes")]
    CapacityExceeded { required: usize, capacity: usize },

    /// A stored value could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The SPI/GPIO layer failed. Always fatal, never retried here.
    #[error("Transport error: {0}")]
    Transport(#[from] HardwareError),
}

impl RfidError {
    /// Create a new collision error.
    pub fn collision(reason: impl Into<String>) -> Self {
        Self::Collision {
            reason: reason.into(),
        }
    }

    /// Create a new timeout error.
    pub fn timeout(operation: &'static str, polls: u32) -> Self {
        Self::Timeout { operation, polls }
    }

    /// Create a new protocol error.
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol {
            reason: reason.into(),
        }
    }

    /// Create a new unauthorized error.
    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::Unauthorized {
            reason: reason.into(),
        }
    }

    /// Create a new write error.
    pub fn write(block: u8, reason: impl Into<String>) -> Self {
        Self::Write {
            block,
            reason: reason.into(),
        }
    }

    /// Whether a caller may reasonably retry the same operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Collision { .. } | Self::Timeout { .. })
    }

    /// Whether the error is fatal to the reader (bus failure, never retried).
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_timeout_message() {
        let error = RfidError::timeout("CRC calculation", 64);
        assert_eq!(
            error.to_string(),
            "Timeout: CRC calculation did not complete within 64 polls"
        );
    }

    #[test]
    fn test_unsupported_card_message() {
        let error = RfidError::UnsupportedCard {
            card_type: CardType::MifareUltralight,
        };
        assert_eq!(error.to_string(), "Unsupported card: MIFARE Ultralight");
    }

    #[test]
    fn test_transport_conversion() {
        let error: RfidError = HardwareError::communication("bus stalled").into();
        assert!(error.is_fatal());
        assert!(!error.is_retryable());
    }

    #[rstest]
    #[case(RfidError::collision("two cards"), true)]
    #[case(RfidError::timeout("transceive", 10), true)]
    #[case(RfidError::protocol("bad CRC"), false)]
    #[case(RfidError::unauthorized("wrong key"), false)]
    #[case(RfidError::write(4, "NAK"), false)]
    #[case(RfidError::NoCardPresent, false)]
    fn test_retryable(#[case] error: RfidError, #[case] expected: bool) {
        assert_eq!(error.is_retryable(), expected);
    }

    #[test]
    fn test_write_error_message() {
        let error = RfidError::write(8, "NAK 0x4 after command");
        assert_eq!(
            error.to_string(),
            "Write to block 8 failed: NAK 0x4 after command"
        );
    }
}
