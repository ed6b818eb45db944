//! ISO 14443-A card commands: REQA/WUPA, anti-collision, SELECT, HALT.
//!
//! ```text
//! Idle --REQA/WUPA--> Ready --ANTICOLL--> Ready(UID) --SELECT--> Active --HLTA--> Halt
//!  ^                                                                               |
//!  +--------------------------------- WUPA ----------------------------------------+
//! ```
//!
//! Anti-collision is single-shot per cascade level: if two cards answer, the
//! collision is reported and the caller retries once the cards are apart.

use crate::card::{Atqa, CASCADE_TAG, Uid, bcc};
use crate::error::{Result, RfidError};
use crate::pcd::{ChipStatus, Pcd, PcdCommand};
use crate::register::{Register, coll, com_irq};
use crowpi_hardware::SpiTransport;
use tracing::{debug, trace};

/// PICC command bytes.
pub mod command {
    pub const REQA: u8 = 0x26;
    pub const WUPA: u8 = 0x52;
    pub const HLTA: u8 = 0x50;
    pub const SEL_CL1: u8 = 0x93;
    pub const SEL_CL2: u8 = 0x95;
    pub const SEL_CL3: u8 = 0x97;
    /// NVB of an anti-collision frame with no UID bits.
    pub const NVB_ANTICOLL: u8 = 0x20;
    /// NVB of a full SELECT frame (7 bytes).
    pub const NVB_SELECT: u8 = 0x70;
    pub const MF_READ: u8 = 0x30;
    pub const MF_WRITE: u8 = 0xA0;
}

/// SAK bit announcing that the UID continues at the next cascade level.
pub const SAK_CASCADE_BIT: u8 = 0x04;

/// Completion bits of a Transceive.
pub(crate) const TRANSCEIVE_IRQ: u8 = com_irq::RX | com_irq::IDLE;

/// Cascade level of an anti-collision/SELECT exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeLevel {
    One,
    Two,
    Three,
}

impl CascadeLevel {
    pub const ALL: [CascadeLevel; 3] = [Self::One, Self::Two, Self::Three];

    /// SEL byte of this level.
    pub fn select_code(self) -> u8 {
        match self {
            Self::One => command::SEL_CL1,
            Self::Two => command::SEL_CL2,
            Self::Three => command::SEL_CL3,
        }
    }

    pub fn from_select_code(code: u8) -> Option<Self> {
        match code {
            command::SEL_CL1 => Some(Self::One),
            command::SEL_CL2 => Some(Self::Two),
            command::SEL_CL3 => Some(Self::Three),
            _ => None,
        }
    }

    pub fn number(self) -> u8 {
        match self {
            Self::One => 1,
            Self::Two => 2,
            Self::Three => 3,
        }
    }
}

/// Result of a REQA/WUPA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// Nobody answered before the chip's timer fired.
    Absent,
    /// One card (or several with identical ATQA) answered.
    Present(Atqa),
    /// Several cards answered with different ATQA bits.
    Collided,
}

impl Presence {
    pub fn is_present(&self) -> bool {
        !matches!(self, Self::Absent)
    }

    pub fn atqa(&self) -> Option<Atqa> {
        match self {
            Self::Present(atqa) => Some(*atqa),
            _ => None,
        }
    }
}

/// UID and final SAK of a selected card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub uid: Uid,
    pub sak: u8,
}

impl<S: SpiTransport> Pcd<S> {
    /// Send REQA. Only cards in IDLE state answer.
    pub fn request_a(&mut self) -> Result<Presence> {
        self.short_frame(command::REQA)
    }

    /// Send WUPA. Cards in IDLE and HALT state answer.
    pub fn wakeup_a(&mut self) -> Result<Presence> {
        self.short_frame(command::WUPA)
    }

    fn short_frame(&mut self, cmd: u8) -> Result<Presence> {
        self.reset_transmission()?;
        self.regs
            .clear_bit_mask(Register::Coll, coll::VALUES_AFTER_COLL)?;
        let reply = self.communicate(PcdCommand::Transceive, TRANSCEIVE_IRQ, &[cmd], 7)?;

        match reply.status {
            ChipStatus::NoResponse => Ok(Presence::Absent),
            ChipStatus::Collision => Ok(Presence::Collided),
            ChipStatus::Ok if reply.data.len() == 2 && reply.valid_bits == 0 => {
                Ok(Presence::Present(Atqa([reply.data[0], reply.data[1]])))
            }
            ChipStatus::Ok => Err(RfidError::protocol(format!(
                "malformed ATQA ({} bytes, {} valid bits)",
                reply.data.len(),
                reply.valid_bits
            ))),
            status => Err(status.into_error("REQA/WUPA", reply.polls)),
        }
    }

    /// Run one anti-collision round and return the 4-byte UID fragment.
    ///
    /// A bit collision or a BCC mismatch is reported as a collision.
    pub fn anticollision(&mut self, level: CascadeLevel) -> Result<[u8; 4]> {
        self.regs
            .clear_bit_mask(Register::Coll, coll::VALUES_AFTER_COLL)?;
        let frame = [level.select_code(), command::NVB_ANTICOLL];
        let reply = self.communicate(PcdCommand::Transceive, TRANSCEIVE_IRQ, &frame, 0)?;

        match reply.status {
            ChipStatus::Ok => {}
            ChipStatus::NoResponse => return Err(RfidError::NoCardPresent),
            status => return Err(status.into_error("anti-collision", reply.polls)),
        }

        if reply.data.len() != 5 || reply.valid_bits != 0 {
            return Err(RfidError::protocol(format!(
                "anti-collision reply of {} bytes at cascade level {}",
                reply.data.len(),
                level.number()
            )));
        }

        let fragment = [reply.data[0], reply.data[1], reply.data[2], reply.data[3]];
        if bcc(&fragment) != reply.data[4] {
            return Err(RfidError::collision(format!(
                "BCC mismatch at cascade level {}",
                level.number()
            )));
        }

        trace!(level = level.number(), "anti-collision fragment received");
        Ok(fragment)
    }

    /// SELECT a UID fragment and return the SAK, after checking its CRC.
    pub fn select(&mut self, level: CascadeLevel, fragment: [u8; 4]) -> Result<u8> {
        let mut frame = Vec::with_capacity(9);
        frame.extend_from_slice(&[level.select_code(), command::NVB_SELECT]);
        frame.extend_from_slice(&fragment);
        frame.push(bcc(&fragment));
        self.append_crc(&mut frame)?;

        let reply = self.communicate(PcdCommand::Transceive, TRANSCEIVE_IRQ, &frame, 0)?;
        match reply.status {
            ChipStatus::Ok => {}
            ChipStatus::NoResponse => return Err(RfidError::NoCardPresent),
            status => return Err(status.into_error("SELECT", reply.polls)),
        }

        if reply.data.len() != 3 || reply.valid_bits != 0 {
            return Err(RfidError::protocol(format!(
                "malformed SAK ({} bytes)",
                reply.data.len()
            )));
        }
        if !self.verify_crc(&reply.data)? {
            return Err(RfidError::protocol("SAK CRC_A mismatch"));
        }

        Ok(reply.data[0])
    }

    /// Walk the cascade levels until a SAK without the cascade bit arrives.
    pub fn select_card(&mut self) -> Result<Selection> {
        let mut uid = Vec::with_capacity(10);

        for level in CascadeLevel::ALL {
            let fragment = self.anticollision(level)?;
            let sak = self.select(level, fragment)?;

            if sak & SAK_CASCADE_BIT == 0 {
                uid.extend_from_slice(&fragment);
                let uid = Uid::new(&uid)?;
                debug!(%uid, sak = format_args!("{sak:#04x}"), "card selected");
                return Ok(Selection { uid, sak });
            }

            if fragment[0] != CASCADE_TAG {
                return Err(RfidError::protocol(format!(
                    "cascade bit set without cascade tag at level {}",
                    level.number()
                )));
            }
            trace!(level = level.number(), "UID continues at next cascade level");
            uid.extend_from_slice(&fragment[1..]);
        }

        Err(RfidError::protocol("UID longer than three cascade levels"))
    }

    /// Send HLTA. A card acknowledges HALT by staying silent.
    pub fn halt_a(&mut self) -> Result<()> {
        let mut frame = vec![command::HLTA, 0x00];
        self.append_crc(&mut frame)?;

        let reply = self.communicate(PcdCommand::Transceive, TRANSCEIVE_IRQ, &frame, 0)?;
        match reply.status {
            ChipStatus::NoResponse => Ok(()),
            ChipStatus::Ok => Err(RfidError::protocol("card answered HALT")),
            status => Err(status.into_error("HALT", reply.polls)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RfidConfig;
    use crate::mock::{SimulatedCard, SimulatedPcd, SimulatedPcdHandle};

    fn reader() -> (Pcd<SimulatedPcd>, SimulatedPcdHandle) {
        let (chip, handle) = SimulatedPcd::new();
        let mut pcd = Pcd::new(chip, RfidConfig::for_testing());
        pcd.init().unwrap();
        (pcd, handle)
    }

    #[test]
    fn test_request_without_card() {
        let (mut pcd, _) = reader();
        assert_eq!(pcd.request_a().unwrap(), Presence::Absent);
    }

    #[test]
    fn test_request_with_card() {
        let (mut pcd, handle) = reader();
        handle.insert_card(SimulatedCard::classic_1k(&[0x04, 0xA1, 0xB2, 0xC3]));

        let presence = pcd.request_a().unwrap();
        assert_eq!(presence, Presence::Present(Atqa([0x04, 0x00])));
    }

    #[test]
    fn test_request_restores_transmission_settings() {
        let (mut pcd, handle) = reader();
        handle.insert_card(SimulatedCard::classic_1k(&[0x04, 0xA1, 0xB2, 0xC3]));
        pcd.registers().write_register(Register::TxMode, 0x80).unwrap();
        pcd.registers().write_register(Register::RxMode, 0x80).unwrap();
        pcd.registers().write_register(Register::ModWidth, 0x10).unwrap();

        assert!(pcd.request_a().unwrap().is_present());

        assert_eq!(handle.register(Register::TxMode), 0x00);
        assert_eq!(handle.register(Register::RxMode), 0x00);
        assert_eq!(handle.register(Register::ModWidth), 0x26);
    }

    #[test]
    fn test_two_cards_collide_on_request() {
        let (mut pcd, handle) = reader();
        handle.insert_card(SimulatedCard::classic_1k(&[0x04, 0xA1, 0xB2, 0xC3]));
        handle.insert_card(SimulatedCard::classic_4k(&[0x44, 0x00, 0x11, 0x22, 0x33, 0x44, 0x55]));

        assert_eq!(pcd.request_a().unwrap(), Presence::Collided);
    }

    #[test]
    fn test_select_single_size_uid() {
        let (mut pcd, handle) = reader();
        handle.insert_card(SimulatedCard::classic_1k(&[0x04, 0xA1, 0xB2, 0xC3]));

        pcd.request_a().unwrap();
        let selection = pcd.select_card().unwrap();

        assert_eq!(selection.uid.as_bytes(), &[0x04, 0xA1, 0xB2, 0xC3]);
        assert_eq!(selection.sak, 0x08);
    }

    #[test]
    fn test_select_double_size_uid_drops_cascade_tag() {
        let (mut pcd, handle) = reader();
        let uid = [0x04, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66];
        handle.insert_card(SimulatedCard::classic_1k(&uid));

        pcd.request_a().unwrap();
        let selection = pcd.select_card().unwrap();

        assert_eq!(selection.uid.as_bytes(), &uid);
        assert_eq!(selection.sak, 0x08);
    }

    #[test]
    fn test_select_triple_size_uid() {
        let (mut pcd, handle) = reader();
        let uid = [0x04, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09];
        handle.insert_card(SimulatedCard::ultralight(&uid));

        pcd.request_a().unwrap();
        let selection = pcd.select_card().unwrap();

        assert_eq!(selection.uid.as_bytes(), &uid);
        assert_eq!(selection.sak, 0x00);
    }

    #[test]
    fn test_bit_collision_is_reported() {
        let (mut pcd, handle) = reader();
        handle.insert_card(SimulatedCard::classic_1k(&[0x04, 0xA1, 0xB2, 0xC3]));
        handle.insert_card(SimulatedCard::classic_1k(&[0x05, 0xA1, 0xB2, 0xC3]));

        pcd.request_a().unwrap();
        assert!(matches!(
            pcd.anticollision(CascadeLevel::One),
            Err(RfidError::Collision { .. })
        ));
    }

    #[test]
    fn test_bcc_mismatch_is_a_collision() {
        let (mut pcd, handle) = reader();
        handle.insert_card(SimulatedCard::classic_1k(&[0x04, 0xA1, 0xB2, 0xC3]));
        handle.corrupt_next_bcc();

        pcd.request_a().unwrap();
        let err = pcd.anticollision(CascadeLevel::One).unwrap_err();
        assert!(matches!(err, RfidError::Collision { ref reason } if reason.contains("BCC")));
    }

    #[test]
    fn test_corrupted_sak_crc_is_a_protocol_error() {
        let (mut pcd, handle) = reader();
        handle.insert_card(SimulatedCard::classic_1k(&[0x04, 0xA1, 0xB2, 0xC3]));
        handle.corrupt_next_sak_crc();

        pcd.request_a().unwrap();
        let err = pcd.select_card().unwrap_err();
        assert!(matches!(err, RfidError::Protocol { ref reason } if reason.contains("SAK")));
    }

    #[test]
    fn test_halt_is_silent() {
        let (mut pcd, handle) = reader();
        handle.insert_card(SimulatedCard::classic_1k(&[0x04, 0xA1, 0xB2, 0xC3]));

        pcd.request_a().unwrap();
        pcd.select_card().unwrap();
        pcd.halt_a().unwrap();

        // Halted cards ignore REQA but answer WUPA
        assert_eq!(pcd.request_a().unwrap(), Presence::Absent);
        assert!(pcd.wakeup_a().unwrap().is_present());
    }

    #[test]
    fn test_halt_without_card_succeeds() {
        let (mut pcd, _) = reader();
        pcd.halt_a().unwrap();
        pcd.halt_a().unwrap();
    }

    #[test]
    fn test_cascade_level_codes() {
        for level in CascadeLevel::ALL {
            assert_eq!(CascadeLevel::from_select_code(level.select_code()), Some(level));
        }
        assert_eq!(CascadeLevel::from_select_code(0x26), None);
    }
}
