//! Reader configuration.
//!
//! Every wait on the chip is a bounded polling loop counted in register
//! reads, not in wall-clock time. The budgets live here so tests can shrink
//! them and exercise timeout paths without real delays.
//!
//! # Examples
//!
//! ```
//! use crowpi_rfid::config::{RfidConfig, RetryPolicy};
//! use std::time::Duration;
//!
//! let config = RfidConfig::default()
//!     .with_crc_poll_budget(32)
//!     .with_retry(RetryPolicy::new(3, 20));
//!
//! assert_eq!(config.crc_poll_budget, 32);
//! assert_eq!(config.retry.backoff(), Duration::from_millis(20));
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// Defaults
// ============================================================================

/// Register reads allowed while waiting for the CRC coprocessor.
pub const DEFAULT_CRC_POLL_BUDGET: u32 = 64;

/// Register reads allowed while waiting for a transceive or MFAuthent
/// command to complete. The chip's own 25 ms timer normally fires first.
pub const DEFAULT_COMMAND_POLL_BUDGET: u32 = 2000;

/// Register reads allowed while waiting for the chip to leave power-down.
pub const DEFAULT_RESET_POLL_BUDGET: u32 = 100;

/// Pause between REQA attempts while waiting for a card.
pub const DEFAULT_DETECT_INTERVAL_MS: u64 = 10;

/// Period of the background card poller.
pub const DEFAULT_POLL_PERIOD_MS: u64 = 100;

/// Oscillator start-up time after a reset.
pub const DEFAULT_RESET_SETTLE_MS: u64 = 50;

// ============================================================================
// Retry policy
// ============================================================================

/// How often a retryable failure (collision, timeout) is retried before it
/// is surfaced to the caller.
///
/// The default is a single attempt: nothing is retried automatically.
/// Transport, protocol and authorization failures are never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Zero is treated as one.
    pub max_attempts: u32,

    /// Pause between attempts in milliseconds.
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 0,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the given attempt count and backoff.
    pub fn new(max_attempts: u32, backoff_ms: u64) -> Self {
        Self {
            max_attempts,
            backoff_ms,
        }
    }

    /// No automatic retries.
    pub fn none() -> Self {
        Self::default()
    }

    /// Attempts to make, never less than one.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Pause between attempts.
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

// ============================================================================
// Reader configuration
// ============================================================================

/// Tunables of the reader driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RfidConfig {
    /// Polls of DivIrqReg before a CRC calculation times out.
    pub crc_poll_budget: u32,

    /// Polls of ComIrqReg before a card command times out.
    pub command_poll_budget: u32,

    /// Polls of CommandReg before a reset times out.
    pub reset_poll_budget: u32,

    /// Milliseconds between REQA attempts in `detect_card`.
    pub detect_interval_ms: u64,

    /// Milliseconds between presence checks of the card poller.
    pub poll_period_ms: u64,

    /// Milliseconds to wait after a reset before polling the chip.
    pub reset_settle_ms: u64,

    /// Retry policy for collisions and timeouts.
    pub retry: RetryPolicy,
}

impl Default for RfidConfig {
    fn default() -> Self {
        Self {
            crc_poll_budget: DEFAULT_CRC_POLL_BUDGET,
            command_poll_budget: DEFAULT_COMMAND_POLL_BUDGET,
            reset_poll_budget: DEFAULT_RESET_POLL_BUDGET,
            detect_interval_ms: DEFAULT_DETECT_INTERVAL_MS,
            poll_period_ms: DEFAULT_POLL_PERIOD_MS,
            reset_settle_ms: DEFAULT_RESET_SETTLE_MS,
            retry: RetryPolicy::default(),
        }
    }
}

impl RfidConfig {
    /// Small budgets and no sleeps, for simulated chips.
    pub fn for_testing() -> Self {
        Self {
            crc_poll_budget: 8,
            command_poll_budget: 16,
            reset_poll_budget: 4,
            detect_interval_ms: 1,
            poll_period_ms: 5,
            reset_settle_ms: 0,
            retry: RetryPolicy::none(),
        }
    }

    pub fn with_crc_poll_budget(mut self, polls: u32) -> Self {
        self.crc_poll_budget = polls;
        self
    }

    pub fn with_command_poll_budget(mut self, polls: u32) -> Self {
        self.command_poll_budget = polls;
        self
    }

    pub fn with_reset_poll_budget(mut self, polls: u32) -> Self {
        self.reset_poll_budget = polls;
        self
    }

    pub fn with_detect_interval(mut self, interval: Duration) -> Self {
        self.detect_interval_ms = duration_to_ms(interval);
        self
    }

    pub fn with_poll_period(mut self, period: Duration) -> Self {
        self.poll_period_ms = duration_to_ms(period);
        self
    }

    pub fn with_reset_settle(mut self, settle: Duration) -> Self {
        self.reset_settle_ms = duration_to_ms(settle);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn detect_interval(&self) -> Duration {
        Duration::from_millis(self.detect_interval_ms)
    }

    pub fn poll_period(&self) -> Duration {
        Duration::from_millis(self.poll_period_ms)
    }

    pub fn reset_settle(&self) -> Duration {
        Duration::from_millis(self.reset_settle_ms)
    }
}

fn duration_to_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
