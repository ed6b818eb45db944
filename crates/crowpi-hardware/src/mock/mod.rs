//! Mock transport implementations for testing and development.
//!
//! This module provides in-memory transports that record every frame and can
//! be controlled programmatically without requiring physical hardware.

pub mod pin;
pub mod spi;

// Re-export commonly used types
pub use pin::{MockResetPin, MockResetPinHandle};
pub use spi::{MockSpi, MockSpiHandle};
