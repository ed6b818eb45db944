//! Background card polling.
//!
//! [`CardPoller`] checks for cards every `poll_period` and reports what it
//! finds as [`CardEvent`]s. The chip exchange itself is blocking, so every
//! poll cycle runs on tokio's blocking pool while the async task only keeps
//! time and forwards events.
//!
//! ```text
//! ┌──────────────┐ tick ┌──────────────────────┐        ┌──────────────┐
//! │ poller task  │─────►│ spawn_blocking:       │ event  │ PollerHandle │
//! │ (interval)   │      │ REQA/WUPA → SELECT →  │───────►│  recv()      │
//! │              │◄─────│ handler → HALT        │ (mpsc) │              │
//! └──────────────┘      └──────────────────────┘        └──────────────┘
//! ```
//!
//! A failed cycle resets the chip before the next one. Unsupported cards are
//! reported and released without a reset.
//!
//! # Examples
//!
//! ```no_run
//! use crowpi_rfid::{CardEvent, CardPoller, MifareKey, RfidConfig, RfidReader};
//! use crowpi_rfid::mock::SimulatedPcd;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> crowpi_rfid::Result<()> {
//!     let (chip, _handle) = SimulatedPcd::new();
//!     let reader = Arc::new(RfidReader::new(chip, RfidConfig::default())?);
//!
//!     let mut poller = CardPoller::new(reader)
//!         .with_handler(|reader, card| {
//!             let block = reader.read_block_with_key(&MifareKey::default_a(), 4)?;
//!             println!("{}: {:02X?}", card.uid, block);
//!             Ok(())
//!         })
//!         .start();
//!
//!     while let Some(event) = poller.recv().await {
//!         if let CardEvent::Failed { error } = event {
//!             eprintln!("poll failed: {error}");
//!         }
//!     }
//!
//!     poller.shutdown().await
//! }
//! ```

use crate::card::{CardType, DetectedCard, Uid};
use crate::error::{Result, RfidError};
use crate::reader::{PollMode, RfidReader};
use crowpi_hardware::SpiTransport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Something the poller observed.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum CardEvent {
    /// A Classic card was selected and the handler finished successfully.
    Detected(DetectedCard),

    /// A card without Classic memory was selected and released.
    Unsupported { uid: Uid, card_type: CardType },

    /// Selection or the handler failed. The chip has been reset.
    Failed { error: String },
}

type CardHandler<S> = dyn Fn(&RfidReader<S>, &DetectedCard) -> Result<()> + Send + Sync;

/// Builder for a background poller.
pub struct CardPoller<S> {
    reader: Arc<RfidReader<S>>,
    mode: PollMode,
    period: Duration,
    handler: Option<Arc<CardHandler<S>>>,
}

impl<S: SpiTransport + 'static> CardPoller<S> {
    /// Poll `reader` for new cards with the configured period.
    pub fn new(reader: Arc<RfidReader<S>>) -> Self {
        let period = reader.config().poll_period();
        Self {
            reader,
            mode: PollMode::NewCards,
            period,
            handler: None,
        }
    }

    pub fn with_mode(mut self, mode: PollMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Run `handler` for every selected Classic card, before it is released.
    ///
    /// The handler runs on the blocking pool and may use any reader method.
    pub fn with_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&RfidReader<S>, &DetectedCard) -> Result<()> + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Spawn the polling task. Must be called inside a tokio runtime.
    pub fn start(self) -> PollerHandle {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(mode = ?self.mode, period = ?self.period, "card poller started");
        let task = tokio::spawn(self.run(event_tx, shutdown_rx));

        PollerHandle {
            event_rx,
            shutdown_tx,
            task,
        }
    }

    async fn run(
        self,
        events: mpsc::Sender<CardEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let mut ticker = tokio::time::interval(self.period.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }

            let reader = Arc::clone(&self.reader);
            let handler = self.handler.clone();
            let mode = self.mode;
            let cycle =
                tokio::task::spawn_blocking(move || poll_cycle(&reader, mode, handler.as_deref()))
                    .await;

            let event = match cycle {
                Ok(Some(event)) => event,
                Ok(None) => continue,
                Err(join_error) => CardEvent::Failed {
                    error: format!("poll cycle panicked: {join_error}"),
                },
            };
            if events.send(event).await.is_err() {
                debug!("event receiver dropped");
                break;
            }
        }

        info!("card poller stopped");
        Ok(())
    }
}

fn poll_cycle<S: SpiTransport>(
    reader: &RfidReader<S>,
    mode: PollMode,
    handler: Option<&CardHandler<S>>,
) -> Option<CardEvent> {
    let card = match reader.poll_once(mode) {
        Ok(Some(card)) => card,
        Ok(None) => return None,
        Err(error) => return Some(fail(reader, error)),
    };

    if !card.card_type.is_classic() {
        warn!(uid = %card.uid, card_type = %card.card_type, "unsupported card");
        reader.release();
        return Some(CardEvent::Unsupported {
            uid: card.uid,
            card_type: card.card_type,
        });
    }

    let result = handler.map_or(Ok(()), |handler| handler(reader, &card));
    reader.release();

    match result {
        Ok(()) => Some(CardEvent::Detected(card)),
        Err(error) => Some(fail(reader, error)),
    }
}

fn fail<S: SpiTransport>(reader: &RfidReader<S>, error: RfidError) -> CardEvent {
    error!(%error, "card poll failed, resetting reader");
    if let Err(reset_error) = reader.reset() {
        error!(error = %reset_error, "reader reset failed");
    }
    CardEvent::Failed {
        error: error.to_string(),
    }
}

/// Handle to a running [`CardPoller`]. Dropping it stops the poller.
pub struct PollerHandle {
    event_rx: mpsc::Receiver<CardEvent>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<Result<()>>,
}

impl PollerHandle {
    /// Next event, or `None` once the poller has stopped.
    pub async fn recv(&mut self) -> Option<CardEvent> {
        self.event_rx.recv().await
    }

    /// Stop polling and wait for the cycle in flight to finish.
    pub async fn shutdown(self) -> Result<()> {
        // Fails only if the task is already gone
        let _ = self.shutdown_tx.send(true);
        Self::classify_task_result(self.task.await)
    }

    fn classify_task_result(result: std::result::Result<Result<()>, JoinError>) -> Result<()> {
        match result {
            Ok(result) => result,
            Err(join_error) if join_error.is_cancelled() => Ok(()),
            Err(join_error) => {
                error!(error = %join_error, "card poller panicked");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RfidConfig;
    use crate::key::MifareKey;
    use crate::mock::{SimulatedCard, SimulatedPcd, SimulatedPcdHandle};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    fn reader() -> (Arc<RfidReader<SimulatedPcd>>, SimulatedPcdHandle) {
        let (chip, handle) = SimulatedPcd::new();
        let reader = RfidReader::new(chip, RfidConfig::for_testing()).unwrap();
        (Arc::new(reader), handle)
    }

    #[tokio::test]
    async fn test_detects_card_and_runs_handler() {
        let (reader, chip) = reader();
        chip.insert_card(SimulatedCard::classic_1k(&[0x04, 0xA1, 0xB2, 0xC3]));
        let reads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&reads);

        let mut poller = CardPoller::new(reader)
            .with_handler(move |reader, _card| {
                reader.read_block_with_key(&MifareKey::default_a(), 4)?;
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .start();

        let event = timeout(WAIT, poller.recv()).await.unwrap().unwrap();
        match event {
            CardEvent::Detected(card) => assert_eq!(card.uid.to_hex(), "04A1B2C3"),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(reads.load(Ordering::SeqCst), 1);

        poller.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_halted_card_is_reported_once_in_new_card_mode() {
        let (reader, chip) = reader();
        chip.insert_card(SimulatedCard::classic_1k(&[0x04, 0xA1, 0xB2, 0xC3]));

        let mut poller = CardPoller::new(reader).start();

        let first = timeout(WAIT, poller.recv()).await.unwrap().unwrap();
        assert!(matches!(first, CardEvent::Detected(_)));
        assert!(
            timeout(Duration::from_millis(100), poller.recv())
                .await
                .is_err()
        );

        poller.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_any_card_mode_sees_halted_cards_again() {
        let (reader, chip) = reader();
        chip.insert_card(SimulatedCard::classic_1k(&[0x04, 0xA1, 0xB2, 0xC3]));

        let mut poller = CardPoller::new(reader).with_mode(PollMode::AnyCard).start();

        for _ in 0..2 {
            let event = timeout(WAIT, poller.recv()).await.unwrap().unwrap();
            assert!(matches!(event, CardEvent::Detected(_)));
        }

        poller.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_unsupported_card_event() {
        let (reader, chip) = reader();
        chip.insert_card(SimulatedCard::ultralight(&[0x04, 0x10, 0x20, 0x30, 0x40, 0x50, 0x60]));

        let mut poller = CardPoller::new(reader).start();

        let event = timeout(WAIT, poller.recv()).await.unwrap().unwrap();
        assert!(matches!(
            event,
            CardEvent::Unsupported {
                card_type: CardType::MifareUltralight,
                ..
            }
        ));

        poller.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_handler_failure_resets_chip() {
        let (reader, chip) = reader();
        chip.insert_card(SimulatedCard::classic_1k(&[0x04, 0xA1, 0xB2, 0xC3]));
        let resets_before = chip.soft_reset_count();

        let mut poller = CardPoller::new(reader)
            .with_handler(|reader, _card| {
                reader.authenticate(1, &MifareKey::key_a([0, 1, 2, 3, 4, 5]))
            })
            .start();

        let event = timeout(WAIT, poller.recv()).await.unwrap().unwrap();
        assert!(matches!(event, CardEvent::Failed { ref error } if error.contains("Unauthorized")));
        assert!(chip.soft_reset_count() > resets_before);

        poller.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_dropping_handle_stops_polling() {
        let (reader, chip) = reader();
        let poller = CardPoller::new(Arc::clone(&reader)).start();
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(poller);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let count = chip.transfer_count();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(chip.transfer_count(), count);
    }
}
