//! Mock SPI transport.
//!
//! Records every transfer and answers with queued replies (or zeros), so
//! register-level drivers can be checked byte for byte.

use crate::{HardwareError, Result, traits::SpiTransport};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct SpiState {
    transfers: Vec<Vec<u8>>,
    replies: VecDeque<Vec<u8>>,
    failures_pending: usize,
    disconnected: bool,
}

/// Mock SPI bus.
///
/// Created together with a [`MockSpiHandle`] that shares its state, so a test
/// can move the transport into a driver and keep inspecting it.
///
/// # Examples
///
/// ```
/// use crowpi_hardware::mock::MockSpi;
/// use crowpi_hardware::traits::SpiTransport;
///
/// let (mut spi, handle) = MockSpi::new();
/// handle.queue_reply(vec![0x00, 0x92]);
///
/// let reply = spi.transfer(&[0xEE, 0x00]).unwrap();
/// assert_eq!(reply, vec![0x00, 0x92]);
/// assert_eq!(handle.transfers(), vec![vec![0xEE, 0x00]]);
/// ```
#[derive(Debug)]
pub struct MockSpi {
    state: Arc<Mutex<SpiState>>,
}

impl MockSpi {
    /// Create a new mock bus and its control handle.
    pub fn new() -> (Self, MockSpiHandle) {
        let state = Arc::new(Mutex::new(SpiState::default()));
        (
            Self {
                state: Arc::clone(&state),
            },
            MockSpiHandle { state },
        )
    }
}

fn lock(state: &Mutex<SpiState>) -> MutexGuard<'_, SpiState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SpiTransport for MockSpi {
    fn transfer(&mut self, tx: &[u8]) -> Result<Vec<u8>> {
        let mut state = lock(&self.state);

        if state.disconnected {
            return Err(HardwareError::disconnected("mock SPI bus"));
        }
        if state.failures_pending > 0 {
            state.failures_pending -= 1;
            return Err(HardwareError::communication("injected SPI failure"));
        }

        state.transfers.push(tx.to_vec());

        let mut reply = state.replies.pop_front().unwrap_or_default();
        reply.resize(tx.len(), 0);
        Ok(reply)
    }
}

/// Handle for controlling and inspecting a [`MockSpi`].
#[derive(Debug, Clone)]
pub struct MockSpiHandle {
    state: Arc<Mutex<SpiState>>,
}

impl MockSpiHandle {
    /// Queue the reply for the next transfer. Short replies are zero-padded,
    /// long ones truncated to the request length.
    pub fn queue_reply(&self, reply: Vec<u8>) {
        lock(&self.state).replies.push_back(reply);
    }

    /// Make the next `count` transfers fail with a communication error.
    pub fn fail_next(&self, count: usize) {
        lock(&self.state).failures_pending = count;
    }

    /// Simulate the bus disappearing (all further transfers fail).
    pub fn disconnect(&self) {
        lock(&self.state).disconnected = true;
    }

    /// All frames sent so far, in order.
    pub fn transfers(&self) -> Vec<Vec<u8>> {
        lock(&self.state).transfers.clone()
    }

    /// Number of successful transfers so far.
    pub fn transfer_count(&self) -> usize {
        lock(&self.state).transfers.len()
    }

    /// Forget recorded transfers.
    pub fn clear(&self) {
        lock(&self.state).transfers.clear();
    }
}
