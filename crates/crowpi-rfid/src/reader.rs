//! The RFID session facade.
//!
//! [`RfidReader`] owns the chip and runs the card lifecycle:
//!
//! ```text
//! detect_card ──► Selected ──authenticate(sector)──► Authenticated(sector)
//!     ▲              │  ▲                               │   │
//!     │              │  └──── auth failure (card idle) ─┘   │ read/write_block
//!     │              │                                      │
//!     └── release ◄──┴──────────────────────────────────────┘
//! ```
//!
//! The whole state machine sits behind one mutex, taken once per logical
//! operation. Two threads sharing a reader never interleave inside an
//! anti-collision, authentication or block exchange.
//!
//! Switching sectors always goes HALT, WUPA, re-SELECT, authenticate. The
//! previous [`AuthenticatedSession`] is dropped before the chip is touched.
//!
//! # Examples
//!
//! ```
//! use crowpi_rfid::{MifareKey, RfidConfig, RfidReader};
//! use crowpi_rfid::mock::{SimulatedCard, SimulatedPcd};
//! use std::time::Duration;
//!
//! # fn main() -> crowpi_rfid::Result<()> {
//! let (chip, handle) = SimulatedPcd::new();
//! handle.insert_card(SimulatedCard::classic_1k(&[0x04, 0xA1, 0xB2, 0xC3]));
//!
//! let reader = RfidReader::new(chip, RfidConfig::for_testing())?;
//! let card = reader.detect_card(Duration::from_millis(50))?.expect("card in field");
//!
//! reader.authenticate(1, &MifareKey::default_a())?;
//! reader.write_block(4, &[0x01; 16])?;
//! assert_eq!(reader.read_block(4)?, [0x01; 16]);
//!
//! reader.release();
//! assert_eq!(card.uid.to_hex(), "04A1B2C3");
//! # Ok(())
//! # }
//! ```

use crate::auth::AuthenticatedSession;
use crate::block::Block;
use crate::card::{ClassicGeometry, DetectedCard};
use crate::config::RfidConfig;
use crate::error::{Result, RfidError};
use crate::key::MifareKey;
use crate::pcd::{ChipVersion, Pcd, pause};
use crowpi_hardware::{ResetPin, SpiTransport};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Which cards a presence check wakes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PollMode {
    /// REQA: only cards that have not been halted.
    #[default]
    NewCards,
    /// WUPA: halted cards too.
    AnyCard,
}

/// Card lifecycle as seen by the reader.
#[derive(Debug)]
pub(crate) enum Phase {
    Idle,
    /// Card selected. `fresh` is false once the card may have dropped back to
    /// IDLE (failed authentication, ended session) and needs a re-SELECT.
    Selected {
        card: DetectedCard,
        fresh: bool,
    },
    Authenticated {
        card: DetectedCard,
        session: AuthenticatedSession,
    },
}

impl Phase {
    fn card(&self) -> Option<&DetectedCard> {
        match self {
            Self::Idle => None,
            Self::Selected { card, .. } | Self::Authenticated { card, .. } => Some(card),
        }
    }
}

fn session_for(phase: &Phase, block: u8) -> Result<&AuthenticatedSession> {
    match phase {
        Phase::Authenticated { session, .. } if session.covers(block) => Ok(session),
        Phase::Authenticated { session, .. } => Err(RfidError::unauthorized(format!(
            "block {block} is outside authenticated sector {}",
            session.sector()
        ))),
        _ => Err(RfidError::unauthorized(format!(
            "no authenticated session for block {block}"
        ))),
    }
}

pub(crate) struct ReaderInner<S> {
    pub(crate) pcd: Pcd<S>,
    pub(crate) phase: Phase,
}

impl<S: SpiTransport> ReaderInner<S> {
    fn config(&self) -> &RfidConfig {
        self.pcd.config()
    }

    /// HALT the current card and switch Crypto1 off. Failures are logged.
    pub(crate) fn release_card(&mut self) {
        let phase = std::mem::replace(&mut self.phase, Phase::Idle);
        let Some(card) = phase.card() else {
            return;
        };

        if let Err(error) = self.pcd.halt_a() {
            warn!(uid = %card.uid, %error, "HALT failed while releasing card");
        }
        if let Err(error) = self.pcd.stop_crypto1() {
            warn!(uid = %card.uid, %error, "could not switch Crypto1 off");
        }
        debug!(uid = %card.uid, "card released");
    }

    fn try_select(&mut self, mode: PollMode) -> Result<Option<DetectedCard>> {
        let presence = match mode {
            PollMode::NewCards => self.pcd.request_a()?,
            PollMode::AnyCard => self.pcd.wakeup_a()?,
        };
        if !presence.is_present() {
            return Ok(None);
        }

        let selection = match self.pcd.select_card() {
            Ok(selection) => selection,
            // The card left the field mid-exchange
            Err(RfidError::NoCardPresent) => return Ok(None),
            Err(error) => return Err(error),
        };

        let card = DetectedCard::new(selection.uid, selection.sak, presence.atqa());
        info!(uid = %card.uid, card_type = %card.card_type, "card detected");
        self.phase = Phase::Selected {
            card: card.clone(),
            fresh: true,
        };
        Ok(Some(card))
    }

    /// One presence check plus selection, retried per the retry policy.
    ///
    /// A retry that finds no card returns the error that triggered it.
    pub(crate) fn poll_once(&mut self, mode: PollMode) -> Result<Option<DetectedCard>> {
        self.release_card();

        let retry = self.config().retry;
        let mut attempt = 1;
        let mut last_error: Option<RfidError> = None;
        loop {
            if last_error.is_some() {
                self.reidle()?;
            }
            match self.try_select(mode) {
                Ok(None) => return last_error.map_or(Ok(None), Err),
                Err(error) if error.is_retryable() && attempt < retry.attempts() => {
                    debug!(attempt, %error, "selection failed, retrying");
                    attempt += 1;
                    last_error = Some(error);
                    pause(retry.backoff());
                }
                result => return result,
            }
        }
    }

    /// Send READY cards left by a failed anti-collision back to IDLE. They
    /// ignore REQA until then; HLTA is invalid in READY and resets them.
    fn reidle(&mut self) -> Result<()> {
        match self.pcd.halt_a() {
            Err(error) if error.is_fatal() => Err(error),
            Err(error) => {
                debug!(%error, "HALT before retry failed");
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    /// Bring a previously selected card back to ACTIVE.
    fn reselect(&mut self, card: &DetectedCard) -> Result<()> {
        self.phase = Phase::Idle;

        if let Err(error) = self.pcd.halt_a() {
            debug!(%error, "HALT before re-select failed");
        }
        self.pcd.stop_crypto1()?;

        if !self.pcd.wakeup_a()?.is_present() {
            info!(uid = %card.uid, "card left the field");
            return Err(RfidError::NoCardPresent);
        }
        let selection = self.pcd.select_card()?;
        if selection.uid != card.uid {
            warn!(expected = %card.uid, found = %selection.uid, "different card in field");
            if let Err(error) = self.pcd.halt_a() {
                debug!(%error, "HALT of foreign card failed");
            }
            return Err(RfidError::NoCardPresent);
        }

        self.phase = Phase::Selected {
            card: card.clone(),
            fresh: true,
        };
        Ok(())
    }

    pub(crate) fn current_card(&self) -> Option<&DetectedCard> {
        self.phase.card()
    }

    pub(crate) fn geometry(&self) -> Result<ClassicGeometry> {
        self.phase
            .card()
            .ok_or(RfidError::NoCardPresent)?
            .geometry()
    }

    /// Authenticate `sector`, re-selecting the card first unless it is
    /// freshly selected.
    pub(crate) fn authenticate(&mut self, sector: u8, key: &MifareKey) -> Result<()> {
        let card = self
            .phase
            .card()
            .cloned()
            .ok_or(RfidError::NoCardPresent)?;
        let geometry = card.geometry()?;
        if !geometry.contains_sector(sector) {
            return Err(RfidError::protocol(format!(
                "sector {sector} outside {} with {} sectors",
                card.card_type,
                geometry.sector_count()
            )));
        }

        let fresh = matches!(self.phase, Phase::Selected { fresh: true, .. });
        // Any previous session ends here, before the chip is touched
        self.phase = Phase::Selected {
            card: card.clone(),
            fresh: false,
        };
        if !fresh {
            self.reselect(&card)?;
        }

        match self.pcd.authenticate(&card.uid, geometry, sector, key) {
            Ok(session) => {
                self.phase = Phase::Authenticated { card, session };
                Ok(())
            }
            Err(error) => {
                self.phase = if error.is_fatal() {
                    Phase::Idle
                } else {
                    Phase::Selected { card, fresh: false }
                };
                Err(error)
            }
        }
    }

    /// Range checks shared by block reads and writes. No chip I/O.
    fn check_block(&self, block: u8) -> Result<ClassicGeometry> {
        let card = self.phase.card().ok_or_else(|| {
            RfidError::unauthorized(format!("no authenticated session for block {block}"))
        })?;
        let geometry = card.geometry()?;
        if !geometry.contains_block(block) {
            return Err(RfidError::protocol(format!(
                "block {block} outside [0, {})",
                geometry.total_blocks()
            )));
        }
        Ok(geometry)
    }

    /// Drop the session after a failed block exchange.
    fn end_session(&mut self, error: &RfidError) {
        let phase = std::mem::replace(&mut self.phase, Phase::Idle);
        if !error.is_fatal()
            && let Phase::Authenticated { card, .. } | Phase::Selected { card, .. } = phase
        {
            self.phase = Phase::Selected { card, fresh: false };
        }
    }

    pub(crate) fn read_block(&mut self, block: u8) -> Result<Block> {
        self.check_block(block)?;
        let session = session_for(&self.phase, block)?;

        let result = self.pcd.read_block(session, block);
        if let Err(error) = &result {
            self.end_session(error);
        }
        result
    }

    pub(crate) fn write_block(&mut self, block: u8, data: &Block) -> Result<()> {
        let geometry = self.check_block(block)?;
        if block == 0 {
            return Err(RfidError::protocol("block 0 holds read-only manufacturer data"));
        }
        if geometry.is_trailer(block) {
            return Err(RfidError::protocol(format!(
                "block {block} is the trailer of sector {}",
                geometry.sector_of(block)
            )));
        }
        let session = session_for(&self.phase, block)?;

        let result = self.pcd.write_block(session, block, data);
        if let Err(error) = &result {
            self.end_session(error);
        }
        result
    }
}

/// MFRC522 reader with MIFARE Classic support.
///
/// All methods take `&self` and serialize on an internal mutex, so a reader
/// can be shared through an `Arc`.
pub struct RfidReader<S> {
    inner: Mutex<ReaderInner<S>>,
}

impl<S: SpiTransport> RfidReader<S> {
    /// Initialise the chip behind `spi` and return a ready reader.
    ///
    /// # Errors
    ///
    /// Fails if the transport fails or the chip does not leave power-down.
    pub fn new(spi: S, config: RfidConfig) -> Result<Self> {
        Self::from_pcd(Pcd::new(spi, config))
    }

    /// Like [`RfidReader::new`], using a reset line for hard resets.
    pub fn with_reset_pin(spi: S, pin: impl ResetPin + 'static, config: RfidConfig) -> Result<Self> {
        Self::from_pcd(Pcd::new(spi, config).with_reset_pin(Box::new(pin)))
    }

    fn from_pcd(mut pcd: Pcd<S>) -> Result<Self> {
        pcd.init()?;
        pcd.version()?;
        Ok(Self {
            inner: Mutex::new(ReaderInner {
                pcd,
                phase: Phase::Idle,
            }),
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ReaderInner<S>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> RfidConfig {
        self.lock().config().clone()
    }

    /// Reset and re-initialise the chip. Any selected card is forgotten.
    pub fn reset(&self) -> Result<()> {
        let mut inner = self.lock();
        inner.phase = Phase::Idle;
        inner.pcd.init()
    }

    pub fn version(&self) -> Result<ChipVersion> {
        self.lock().pcd.version()
    }

    /// Switch the RF field. Turning it off powers down every card.
    pub fn set_antenna(&self, on: bool) -> Result<()> {
        let mut inner = self.lock();
        if !on {
            inner.phase = Phase::Idle;
        }
        inner.pcd.set_antenna(on)
    }

    /// Whether a card that has not been halted is in the field (REQA).
    /// A collision counts as present. Any selected card is released first.
    pub fn is_new_card_present(&self) -> Result<bool> {
        let mut inner = self.lock();
        inner.release_card();
        Ok(inner.pcd.request_a()?.is_present())
    }

    /// Whether any card, halted or not, is in the field (WUPA).
    pub fn is_any_card_present(&self) -> Result<bool> {
        let mut inner = self.lock();
        inner.release_card();
        Ok(inner.pcd.wakeup_a()?.is_present())
    }

    /// Wait up to `timeout` for a new card and select it.
    ///
    /// Returns `Ok(None)` when no card showed up; that is not an error.
    /// REQA is re-issued every `detect_interval`; the timeout is checked
    /// between attempts, never in the middle of an exchange.
    pub fn detect_card(&self, timeout: Duration) -> Result<Option<DetectedCard>> {
        self.detect(timeout, PollMode::NewCards)
    }

    /// Like [`RfidReader::detect_card`] but also wakes halted cards.
    pub fn detect_any_card(&self, timeout: Duration) -> Result<Option<DetectedCard>> {
        self.detect(timeout, PollMode::AnyCard)
    }

    fn detect(&self, timeout: Duration, mode: PollMode) -> Result<Option<DetectedCard>> {
        let started = Instant::now();
        let interval = self.lock().config().detect_interval();

        loop {
            if let Some(card) = self.poll_once(mode)? {
                return Ok(Some(card));
            }
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                debug!(?timeout, "no card detected");
                return Ok(None);
            }
            pause(interval.min(timeout - elapsed));
        }
    }

    /// Single presence check and selection, without waiting.
    pub fn poll_once(&self, mode: PollMode) -> Result<Option<DetectedCard>> {
        self.lock().poll_once(mode)
    }

    /// The selected card, if any.
    pub fn current_card(&self) -> Option<DetectedCard> {
        self.lock().current_card().cloned()
    }

    /// Sector of the armed session, if any.
    pub fn authenticated_sector(&self) -> Option<u8> {
        match &self.lock().phase {
            Phase::Authenticated { session, .. } => Some(session.sector()),
            _ => None,
        }
    }

    /// Authenticate `sector` of the selected card with `key`.
    ///
    /// # Errors
    ///
    /// - `NoCardPresent` when no card is selected or it left the field
    /// - `UnsupportedCard` for cards without Classic memory
    /// - `Protocol` for a sector outside the card
    /// - `Unauthorized` when the card rejects the key
    pub fn authenticate(&self, sector: u8, key: &MifareKey) -> Result<()> {
        self.lock().authenticate(sector, key)
    }

    /// Read a block of the authenticated sector.
    pub fn read_block(&self, block: u8) -> Result<Block> {
        self.lock().read_block(block)
    }

    /// Write a data block of the authenticated sector. Block 0 and sector
    /// trailers are refused.
    pub fn write_block(&self, block: u8, data: &Block) -> Result<()> {
        self.lock().write_block(block, data)
    }

    /// Authenticate the block's sector with `key`, then read it.
    pub fn read_block_with_key(&self, key: &MifareKey, block: u8) -> Result<Block> {
        let mut inner = self.lock();
        let geometry = inner.check_block(block)?;
        inner.authenticate(geometry.sector_of(block), key)?;
        inner.read_block(block)
    }

    /// Authenticate the block's sector with `key`, then write it.
    pub fn write_block_with_key(&self, key: &MifareKey, block: u8, data: &Block) -> Result<()> {
        let mut inner = self.lock();
        let geometry = inner.check_block(block)?;
        inner.authenticate(geometry.sector_of(block), key)?;
        inner.write_block(block, data)
    }

    /// Authenticate `sector` and read all of its blocks, trailer included.
    pub fn read_sector(&self, key: &MifareKey, sector: u8) -> Result<Vec<Block>> {
        let mut inner = self.lock();
        inner.authenticate(sector, key)?;
        let geometry = inner.geometry()?;

        let first = geometry.first_block(sector);
        let last = geometry.trailer_block(sector);
        (first..=last).map(|block| inner.read_block(block)).collect()
    }

    /// HALT the selected card and switch Crypto1 off.
    ///
    /// Idempotent and infallible: failures are logged, and with no card
    /// selected nothing is sent to the chip.
    pub fn release(&self) {
        self.lock().release_card();
    }

    /// Give back the transport.
    pub fn into_transport(self) -> S {
        self.inner
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .pcd
            .into_transport()
    }
}

impl<S> std::fmt::Debug for RfidReader<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RfidReader").finish_non_exhaustive()
    }
}
