//! Simulated ISO 14443-A / MIFARE Classic card.
//!
//! The card follows the PICC state machine (IDLE, READY per cascade level,
//! ACTIVE, HALT) and stores Classic memory with keys in the sector trailers.
//! Crypto1 is not modelled: after a successful authentication the card
//! simply accepts plain READ/WRITE frames for that sector.

use super::crc_a;
use crate::card::{BLOCK_SIZE, CardType, ClassicGeometry, Uid, bcc};
use crate::key::{DEFAULT_KEY, KEY_LEN};
use crate::picc::{CascadeLevel, SAK_CASCADE_BIT, command};

/// Access bits and GPB of a factory-fresh trailer.
pub const DEFAULT_ACCESS_BITS: [u8; 4] = [0xFF, 0x07, 0x80, 0x69];

const ACK: u8 = 0x0A;
const NAK: u8 = 0x04;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CardState {
    Idle,
    Halt,
    Ready { level: usize },
    Active,
    Authenticated { sector: u8 },
    WritePending { sector: u8, block: u8 },
}

/// Frame sent back by a card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Response {
    pub data: Vec<u8>,
    pub valid_bits: u8,
}

impl Response {
    fn bytes(data: Vec<u8>) -> Self {
        Self {
            data,
            valid_bits: 0,
        }
    }

    fn nibble(value: u8) -> Self {
        Self {
            data: vec![value],
            valid_bits: 4,
        }
    }

    fn with_crc(mut data: Vec<u8>) -> Self {
        let crc = crc_a(&data);
        data.extend_from_slice(&crc);
        Self::bytes(data)
    }
}

/// A card that can be placed in the field of a [`SimulatedPcd`](super::SimulatedPcd).
#[derive(Debug, Clone)]
pub struct SimulatedCard {
    uid: Uid,
    sak: u8,
    atqa: [u8; 2],
    geometry: Option<ClassicGeometry>,
    memory: Vec<[u8; BLOCK_SIZE]>,
    state: CardState,
    /// Whether the card came out of HALT; errors then return it to HALT.
    woken_from_halt: bool,
}

impl SimulatedCard {
    /// A card with the given UID and final SAK.
    ///
    /// # Panics
    ///
    /// Panics unless `uid` has 4, 7 or 10 bytes.
    pub fn new(uid: &[u8], sak: u8) -> Self {
        let uid = match Uid::new(uid) {
            Ok(uid) => uid,
            Err(error) => panic!("invalid simulated UID: {error}"),
        };
        let card_type = CardType::from_sak(sak);
        let geometry = card_type.classic_geometry();

        let size_bits = match uid.size().cascade_levels() {
            1 => 0x00,
            2 => 0x40,
            _ => 0x80,
        };
        let family_bits = match card_type {
            CardType::MifareClassic4K => 0x02,
            _ => 0x04,
        };

        let mut card = Self {
            uid,
            sak,
            atqa: [size_bits | family_bits, 0x00],
            geometry,
            memory: Vec::new(),
            state: CardState::Idle,
            woken_from_halt: false,
        };
        card.format();
        card
    }

    pub fn classic_mini(uid: &[u8]) -> Self {
        Self::new(uid, 0x09)
    }

    pub fn classic_1k(uid: &[u8]) -> Self {
        Self::new(uid, 0x08)
    }

    pub fn classic_4k(uid: &[u8]) -> Self {
        Self::new(uid, 0x18)
    }

    pub fn ultralight(uid: &[u8]) -> Self {
        Self::new(uid, 0x00)
    }

    /// Replace both keys of `sector`, keeping the default access bits.
    pub fn with_sector_keys(mut self, sector: u8, key_a: [u8; KEY_LEN], key_b: [u8; KEY_LEN]) -> Self {
        if let Some(geometry) = self.geometry
            && geometry.contains_sector(sector)
        {
            let trailer = usize::from(geometry.trailer_block(sector));
            self.memory[trailer] = trailer_block(key_a, key_b);
        }
        self
    }

    /// Preload a block.
    pub fn with_block(mut self, block: u8, data: [u8; BLOCK_SIZE]) -> Self {
        if let Some(slot) = self.memory.get_mut(usize::from(block)) {
            *slot = data;
        }
        self
    }

    pub fn uid(&self) -> &Uid {
        &self.uid
    }

    pub fn block(&self, block: u8) -> Option<[u8; BLOCK_SIZE]> {
        self.memory.get(usize::from(block)).copied()
    }

    fn format(&mut self) {
        let Some(geometry) = self.geometry else {
            return;
        };
        self.memory = vec![[0u8; BLOCK_SIZE]; usize::from(geometry.total_blocks())];

        let mut manufacturer = [0u8; BLOCK_SIZE];
        let uid = self.uid.as_bytes();
        manufacturer[..uid.len()].copy_from_slice(uid);
        if let Some(check) = self.uid.bcc() {
            manufacturer[4] = check;
        }
        manufacturer[uid.len() + 1] = self.sak;
        manufacturer[uid.len() + 2] = self.atqa[0];
        manufacturer[uid.len() + 3] = self.atqa[1];
        self.memory[0] = manufacturer;

        for sector in 0..geometry.sector_count() {
            let trailer = usize::from(geometry.trailer_block(sector));
            self.memory[trailer] = trailer_block(DEFAULT_KEY, DEFAULT_KEY);
        }
    }

    /// The RF field went away.
    pub(crate) fn power_off(&mut self) {
        self.state = CardState::Idle;
        self.woken_from_halt = false;
    }

    /// Drop back after an unexpected frame or a NAK.
    pub(crate) fn fall_back(&mut self) {
        self.state = if self.woken_from_halt {
            CardState::Halt
        } else {
            CardState::Idle
        };
    }

    /// Answer a frame, or stay silent.
    pub(crate) fn respond(&mut self, frame: &[u8], tx_last_bits: u8) -> Option<Response> {
        if frame.len() == 1 && tx_last_bits == 7 {
            return self.respond_short(frame[0]);
        }

        match self.state {
            CardState::Idle | CardState::Halt => None,
            CardState::Ready { level } => self.respond_ready(level, frame),
            CardState::Active => self.respond_active(None, frame),
            CardState::Authenticated { sector } => self.respond_active(Some(sector), frame),
            CardState::WritePending { sector, block } => self.respond_write_data(sector, block, frame),
        }
    }

    fn respond_short(&mut self, cmd: u8) -> Option<Response> {
        let wakes = match (cmd, self.state) {
            (command::REQA, CardState::Idle) => true,
            (command::WUPA, CardState::Idle | CardState::Halt) => true,
            (command::REQA | command::WUPA, _) => false,
            _ => return None,
        };

        if wakes {
            self.woken_from_halt = self.state == CardState::Halt;
            self.state = CardState::Ready { level: 0 };
            Some(Response::bytes(self.atqa.to_vec()))
        } else {
            if self.state != CardState::Halt {
                self.fall_back();
            }
            None
        }
    }

    fn respond_ready(&mut self, level: usize, frame: &[u8]) -> Option<Response> {
        let fragments = self.uid.cascade_fragments();
        let fragment = fragments[level];
        let frame_level = frame
            .first()
            .and_then(|code| CascadeLevel::from_select_code(*code))
            .map(|level| usize::from(level.number()) - 1);

        if frame_level != Some(level) {
            self.fall_back();
            return None;
        }

        match frame {
            [_, command::NVB_ANTICOLL] => {
                let mut data = fragment.to_vec();
                data.push(bcc(&fragment));
                Some(Response::bytes(data))
            }
            [_, command::NVB_SELECT, rest @ ..] if rest.len() == 7 && crc_ok(frame) => {
                if rest[..4] != fragment || rest[4] != bcc(&fragment) {
                    self.fall_back();
                    return None;
                }
                let sak = if level + 1 == fragments.len() {
                    self.state = CardState::Active;
                    self.sak
                } else {
                    self.state = CardState::Ready { level: level + 1 };
                    SAK_CASCADE_BIT
                };
                Some(Response::with_crc(vec![sak]))
            }
            _ => {
                self.fall_back();
                None
            }
        }
    }

    fn respond_active(&mut self, sector: Option<u8>, frame: &[u8]) -> Option<Response> {
        if !crc_ok(frame) || frame.len() != 4 {
            return None;
        }
        let (cmd, arg) = (frame[0], frame[1]);

        if cmd == command::HLTA && arg == 0x00 {
            self.state = CardState::Halt;
            self.woken_from_halt = false;
            return None;
        }

        let Some(geometry) = self.geometry else {
            self.fall_back();
            return None;
        };
        let block = arg;
        let allowed = sector.is_some_and(|sector| {
            geometry.contains_block(block) && geometry.sector_of(block) == sector
        });

        match cmd {
            command::MF_READ if allowed => {
                let mut data = self.memory[usize::from(block)];
                if geometry.is_trailer(block) {
                    data[..KEY_LEN].fill(0);
                }
                Some(Response::with_crc(data.to_vec()))
            }
            command::MF_WRITE if allowed && block != 0 => {
                if let Some(sector) = sector {
                    self.state = CardState::WritePending { sector, block };
                }
                Some(Response::nibble(ACK))
            }
            command::MF_READ | command::MF_WRITE => {
                self.fall_back();
                Some(Response::nibble(NAK))
            }
            _ => {
                self.fall_back();
                None
            }
        }
    }

    fn respond_write_data(&mut self, sector: u8, block: u8, frame: &[u8]) -> Option<Response> {
        if frame.len() != BLOCK_SIZE + 2 || !crc_ok(frame) {
            self.fall_back();
            return Some(Response::nibble(NAK));
        }
        self.memory[usize::from(block)].copy_from_slice(&frame[..BLOCK_SIZE]);
        self.state = CardState::Authenticated { sector };
        Some(Response::nibble(ACK))
    }

    /// MFAuthent exchange. Returns whether the key was accepted.
    pub(crate) fn authenticate(&mut self, frame: &[u8]) -> bool {
        if !matches!(
            self.state,
            CardState::Active | CardState::Authenticated { .. }
        ) {
            return false;
        }
        let Some(geometry) = self.geometry else {
            return false;
        };
        let [cmd, block, rest @ ..] = frame else {
            return false;
        };
        if rest.len() != KEY_LEN + 4 || !geometry.contains_block(*block) {
            self.fall_back();
            return false;
        }

        let (key, uid_tail) = rest.split_at(KEY_LEN);
        let sector = geometry.sector_of(*block);
        let trailer = self.memory[usize::from(geometry.trailer_block(sector))];
        let expected = match *cmd {
            0x60 => &trailer[..KEY_LEN],
            0x61 => &trailer[BLOCK_SIZE - KEY_LEN..],
            _ => {
                self.fall_back();
                return false;
            }
        };

        if key == expected && uid_tail == self.uid.auth_bytes() {
            self.state = CardState::Authenticated { sector };
            true
        } else {
            self.fall_back();
            false
        }
    }

    /// Whether the card is selected (ACTIVE or authenticated).
    pub(crate) fn is_selected(&self) -> bool {
        matches!(
            self.state,
            CardState::Active | CardState::Authenticated { .. } | CardState::WritePending { .. }
        )
    }
}

fn trailer_block(key_a: [u8; KEY_LEN], key_b: [u8; KEY_LEN]) -> [u8; BLOCK_SIZE] {
    let mut trailer = [0u8; BLOCK_SIZE];
    trailer[..KEY_LEN].copy_from_slice(&key_a);
    trailer[KEY_LEN..KEY_LEN + 4].copy_from_slice(&DEFAULT_ACCESS_BITS);
    trailer[KEY_LEN + 4..].copy_from_slice(&key_b);
    trailer
}

fn crc_ok(frame: &[u8]) -> bool {
    match frame.len().checked_sub(2) {
        Some(split) if split > 0 => crc_a(&frame[..split]) == [frame[split], frame[split + 1]],
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_crc(data: &[u8]) -> Vec<u8> {
        let mut frame = data.to_vec();
        frame.extend_from_slice(&crc_a(data));
        frame
    }

    fn select(card: &mut SimulatedCard) {
        card.respond(&[command::REQA], 7).unwrap();
        let reply = card.respond(&[0x93, 0x20], 0).unwrap();
        let mut frame = vec![0x93, 0x70];
        frame.extend_from_slice(&reply.data);
        let frame = with_crc(&frame);
        card.respond(&frame, 0).unwrap();
    }

    #[test]
    fn test_manufacturer_block() {
        let card = SimulatedCard::classic_1k(&[0x04, 0xA1, 0xB2, 0xC3]);
        let block = card.block(0).unwrap();
        assert_eq!(&block[..4], &[0x04, 0xA1, 0xB2, 0xC3]);
        assert_eq!(block[4], 0x04 ^ 0xA1 ^ 0xB2 ^ 0xC3);
        assert_eq!(block[5], 0x08);
    }

    #[test]
    fn test_halted_card_ignores_reqa() {
        let mut card = SimulatedCard::classic_1k(&[1, 2, 3, 4]);
        select(&mut card);
        assert!(card.is_selected());

        assert!(card.respond(&with_crc(&[0x50, 0x00]), 0).is_none());
        assert!(card.respond(&[command::REQA], 7).is_none());
        assert!(card.respond(&[command::WUPA], 7).is_some());
    }

    #[test]
    fn test_unauthenticated_read_is_nak() {
        let mut card = SimulatedCard::classic_1k(&[1, 2, 3, 4]);
        select(&mut card);

        let reply = card.respond(&with_crc(&[0x30, 0x04]), 0).unwrap();
        assert_eq!(reply, Response::nibble(NAK));
        assert!(!card.is_selected());
    }

    #[test]
    fn test_authenticate_and_write() {
        let mut card = SimulatedCard::classic_1k(&[1, 2, 3, 4]);
        select(&mut card);

        let mut auth = vec![0x60, 0x07];
        auth.extend_from_slice(&DEFAULT_KEY);
        auth.extend_from_slice(&[1, 2, 3, 4]);
        assert!(card.authenticate(&auth));

        assert_eq!(card.respond(&with_crc(&[0xA0, 0x05]), 0), Some(Response::nibble(ACK)));
        assert_eq!(card.respond(&with_crc(&[0x42; 16]), 0), Some(Response::nibble(ACK)));
        assert_eq!(card.block(5), Some([0x42; 16]));
    }

    #[test]
    fn test_frames_with_bad_crc_are_ignored() {
        let mut card = SimulatedCard::classic_1k(&[1, 2, 3, 4]);
        select(&mut card);
        assert!(card.respond(&[0x50, 0x00, 0x00, 0x00], 0).is_none());
        assert!(card.is_selected());
    }
}
