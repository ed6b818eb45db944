//! Mock reset line.

use crate::{HardwareError, Result, traits::ResetPin};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Debug, Default)]
struct PinState {
    high: AtomicBool,
    failing: AtomicBool,
    toggles: AtomicUsize,
}

/// Mock reset pin. Starts low, like a freshly exported GPIO configured with
/// a low initial state.
#[derive(Debug)]
pub struct MockResetPin {
    state: Arc<PinState>,
}

impl MockResetPin {
    /// Create a new mock pin (initially low) and its control handle.
    pub fn new() -> (Self, MockResetPinHandle) {
        let state = Arc::new(PinState::default());
        (
            Self {
                state: Arc::clone(&state),
            },
            MockResetPinHandle { state },
        )
    }

    fn check(&self) -> Result<()> {
        if self.state.failing.load(Ordering::SeqCst) {
            return Err(HardwareError::communication("injected GPIO failure"));
        }
        Ok(())
    }

    fn drive(&mut self, high: bool) -> Result<()> {
        self.check()?;
        if self.state.high.swap(high, Ordering::SeqCst) != high {
            self.state.toggles.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl ResetPin for MockResetPin {
    fn is_low(&mut self) -> Result<bool> {
        self.check()?;
        Ok(!self.state.high.load(Ordering::SeqCst))
    }

    fn set_high(&mut self) -> Result<()> {
        self.drive(true)
    }

    fn set_low(&mut self) -> Result<()> {
        self.drive(false)
    }
}

/// Handle for inspecting a [`MockResetPin`].
#[derive(Debug, Clone)]
pub struct MockResetPinHandle {
    state: Arc<PinState>,
}

impl MockResetPinHandle {
    /// Whether the line is currently high.
    pub fn is_high(&self) -> bool {
        self.state.high.load(Ordering::SeqCst)
    }

    /// Number of level changes so far.
    pub fn toggle_count(&self) -> usize {
        self.state.toggles.load(Ordering::SeqCst)
    }

    /// Make every further pin operation fail.
    pub fn set_failing(&self, failing: bool) {
        self.state.failing.store(failing, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_low() {
        let (mut pin, handle) = MockResetPin::new();
        assert!(pin.is_low().unwrap());
        assert!(!handle.is_high());
    }

    #[test]
    fn test_toggle_counting() {
        let (mut pin, handle) = MockResetPin::new();
        pin.set_high().unwrap();
        pin.set_high().unwrap();
        pin.set_low().unwrap();
        assert_eq!(handle.toggle_count(), 2);
        assert!(pin.is_low().unwrap());
    }

    #[test]
    fn test_failure_injection() {
        let (mut pin, handle) = MockResetPin::new();
        handle.set_failing(true);
        assert!(pin.set_high().is_err());
        assert!(pin.is_low().is_err());
        assert!(!handle.is_high());
    }
}
