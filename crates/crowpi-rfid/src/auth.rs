//! MIFARE Classic authentication.
//!
//! MFAuthent hands the key and UID to the chip's Crypto1 unit. Once the card
//! accepts the key, Status2Reg reports Crypto1 on and every later FIFO
//! exchange is encrypted by the chip. There is one cipher engine per chip,
//! so a session always belongs to exactly one card and one sector.

use crate::card::{ClassicGeometry, Uid};
use crate::error::{Result, RfidError};
use crate::key::{KeySlot, MifareKey};
use crate::pcd::{ChipStatus, Pcd, PcdCommand};
use crate::register::com_irq;
use crowpi_hardware::SpiTransport;
use tracing::{debug, warn};

/// Proof that the chip holds an armed Crypto1 session for one sector.
///
/// Only created by a successful authentication and not `Clone`: the reader
/// drops it on HALT, re-SELECT or a sector switch, so a stale session cannot
/// be presented again.
#[derive(Debug, PartialEq, Eq)]
pub struct AuthenticatedSession {
    uid: Uid,
    sector: u8,
    slot: KeySlot,
    geometry: ClassicGeometry,
}

impl AuthenticatedSession {
    pub fn uid(&self) -> &Uid {
        &self.uid
    }

    pub fn sector(&self) -> u8 {
        self.sector
    }

    pub fn slot(&self) -> KeySlot {
        self.slot
    }

    pub fn geometry(&self) -> ClassicGeometry {
        self.geometry
    }

    /// Whether `block` lies in the authenticated sector.
    pub fn covers(&self, block: u8) -> bool {
        self.geometry.contains_block(block) && self.geometry.sector_of(block) == self.sector
    }
}

impl<S: SpiTransport> Pcd<S> {
    /// Authenticate `sector` of the selected card.
    ///
    /// The card must be freshly selected. On failure the Crypto1 unit is
    /// switched off and no session exists.
    pub(crate) fn authenticate(
        &mut self,
        uid: &Uid,
        geometry: ClassicGeometry,
        sector: u8,
        key: &MifareKey,
    ) -> Result<AuthenticatedSession> {
        if !geometry.contains_sector(sector) {
            return Err(RfidError::protocol(format!(
                "sector {sector} outside card with {} sectors",
                geometry.sector_count()
            )));
        }

        let block = geometry.trailer_block(sector);
        let mut frame = Vec::with_capacity(12);
        frame.push(key.slot().auth_command());
        frame.push(block);
        frame.extend_from_slice(key.bytes());
        frame.extend_from_slice(&uid.auth_bytes());

        let reply = self.communicate(PcdCommand::MfAuthent, com_irq::IDLE, &frame, 0)?;
        let armed = match reply.status {
            ChipStatus::Ok => self.crypto1_active()?,
            ChipStatus::NoResponse => false,
            status => {
                debug!(%status, "authentication exchange failed");
                false
            }
        };

        if !armed {
            self.stop_crypto1()?;
            warn!(%uid, sector, slot = %key.slot(), "authentication rejected");
            return Err(RfidError::unauthorized(format!(
                "{} rejected for sector {sector}",
                key.slot()
            )));
        }

        debug!(%uid, sector, slot = %key.slot(), "sector authenticated");
        Ok(AuthenticatedSession {
            uid: *uid,
            sector,
            slot: key.slot(),
            geometry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RfidConfig;
    use crate::mock::{SimulatedCard, SimulatedPcd, SimulatedPcdHandle};

    const UID: [u8; 4] = [0x04, 0xA1, 0xB2, 0xC3];

    fn selected() -> (Pcd<SimulatedPcd>, SimulatedPcdHandle, Uid) {
        let (chip, handle) = SimulatedPcd::new();
        handle.insert_card(SimulatedCard::classic_1k(&UID));
        let mut pcd = Pcd::new(chip, RfidConfig::for_testing());
        pcd.init().unwrap();
        pcd.request_a().unwrap();
        let uid = pcd.select_card().unwrap().uid;
        (pcd, handle, uid)
    }

    #[test]
    fn test_default_key_arms_crypto1() {
        let (mut pcd, _, uid) = selected();

        let session = pcd
            .authenticate(&uid, ClassicGeometry::CLASSIC_1K, 1, &MifareKey::default_a())
            .unwrap();

        assert_eq!(session.sector(), 1);
        assert_eq!(session.slot(), KeySlot::A);
        assert!(session.covers(4));
        assert!(session.covers(7));
        assert!(!session.covers(8));
        assert!(pcd.crypto1_active().unwrap());
    }

    #[test]
    fn test_wrong_key_is_unauthorized() {
        let (mut pcd, _, uid) = selected();

        let err = pcd
            .authenticate(
                &uid,
                ClassicGeometry::CLASSIC_1K,
                1,
                &MifareKey::key_a([1, 2, 3, 4, 5, 6]),
            )
            .unwrap_err();

        assert!(matches!(err, RfidError::Unauthorized { .. }));
        assert!(!pcd.crypto1_active().unwrap());
    }

    #[test]
    fn test_custom_key_b() {
        let (chip, handle) = SimulatedPcd::new();
        let key_b = [0xB0, 0xB1, 0xB2, 0xB3, 0xB4, 0xB5];
        handle.insert_card(SimulatedCard::classic_1k(&UID).with_sector_keys(2, [0xFF; 6], key_b));
        let mut pcd = Pcd::new(chip, RfidConfig::for_testing());
        pcd.init().unwrap();
        pcd.request_a().unwrap();
        let uid = pcd.select_card().unwrap().uid;

        let session = pcd
            .authenticate(&uid, ClassicGeometry::CLASSIC_1K, 2, &MifareKey::key_b(key_b))
            .unwrap();
        assert_eq!(session.slot(), KeySlot::B);
    }

    #[test]
    fn test_sector_out_of_range() {
        let (mut pcd, handle, uid) = selected();
        let before = handle.transfer_count();

        let err = pcd
            .authenticate(&uid, ClassicGeometry::CLASSIC_1K, 16, &MifareKey::default_a())
            .unwrap_err();

        assert!(matches!(err, RfidError::Protocol { .. }));
        assert_eq!(handle.transfer_count(), before);
    }
}
