//! Authenticated 16-byte block I/O.
//!
//! Both operations take the [`AuthenticatedSession`] for the block's sector.
//! A session for another sector is refused before the chip is touched.

use crate::auth::AuthenticatedSession;
use crate::card::BLOCK_SIZE;
use crate::error::{Result, RfidError};
use crate::pcd::{ChipStatus, Pcd, PcdCommand, Reply};
use crate::picc::{TRANSCEIVE_IRQ, command};
use crowpi_hardware::SpiTransport;
use tracing::trace;

/// One block of card memory.
pub type Block = [u8; BLOCK_SIZE];

/// 4-bit MIFARE acknowledge.
pub const MF_ACK: u8 = 0x0A;

fn check_session(session: &AuthenticatedSession, block: u8) -> Result<()> {
    if session.covers(block) {
        Ok(())
    } else {
        Err(RfidError::unauthorized(format!(
            "block {block} is outside authenticated sector {}",
            session.sector()
        )))
    }
}

/// Whether a reply is a 4-bit NAK (any nibble other than ACK).
fn is_nak(reply: &Reply) -> bool {
    reply.data.len() == 1 && reply.valid_bits == 4 && reply.data[0] & 0x0F != MF_ACK
}

impl<S: SpiTransport> Pcd<S> {
    /// Read one block and verify its CRC_A.
    pub(crate) fn read_block(&mut self, session: &AuthenticatedSession, block: u8) -> Result<Block> {
        check_session(session, block)?;

        let mut frame = vec![command::MF_READ, block];
        self.append_crc(&mut frame)?;
        let reply = self
            .communicate(PcdCommand::Transceive, TRANSCEIVE_IRQ, &frame, 0)?
            .ok_or_error("READ")?;

        if is_nak(&reply) {
            return Err(RfidError::unauthorized(format!(
                "card refused READ of block {block} (NAK 0x{:X})",
                reply.data[0] & 0x0F
            )));
        }
        if reply.data.len() != BLOCK_SIZE + 2 || reply.valid_bits != 0 {
            return Err(RfidError::protocol(format!(
                "READ of block {block} returned {} bytes",
                reply.data.len()
            )));
        }
        if !self.verify_crc(&reply.data)? {
            return Err(RfidError::protocol(format!(
                "CRC_A mismatch reading block {block}"
            )));
        }

        let mut data = [0u8; BLOCK_SIZE];
        data.copy_from_slice(&reply.data[..BLOCK_SIZE]);
        trace!(block, "block read");
        Ok(data)
    }

    /// Write one block: command frame, ACK, payload frame, ACK.
    pub(crate) fn write_block(
        &mut self,
        session: &AuthenticatedSession,
        block: u8,
        data: &Block,
    ) -> Result<()> {
        check_session(session, block)?;

        let mut frame = vec![command::MF_WRITE, block];
        self.append_crc(&mut frame)?;
        self.transceive_acked(block, &frame, "command")?;

        let mut frame = data.to_vec();
        self.append_crc(&mut frame)?;
        self.transceive_acked(block, &frame, "data")?;

        trace!(block, "block written");
        Ok(())
    }

    fn transceive_acked(&mut self, block: u8, frame: &[u8], stage: &str) -> Result<()> {
        let reply = self.communicate(PcdCommand::Transceive, TRANSCEIVE_IRQ, frame, 0)?;

        match reply.status {
            ChipStatus::Ok => {}
            ChipStatus::NoResponse => {
                return Err(RfidError::write(block, format!("no ACK after {stage}")));
            }
            status => {
                return Err(RfidError::write(block, format!("{status} after {stage}")));
            }
        }

        if reply.data.len() != 1 || reply.valid_bits != 4 {
            return Err(RfidError::write(
                block,
                format!("malformed ACK after {stage} ({} bytes)", reply.data.len()),
            ));
        }
        let nibble = reply.data[0] & 0x0F;
        if nibble != MF_ACK {
            return Err(RfidError::write(
                block,
                format!("NAK 0x{nibble:X} after {stage}"),
            ));
        }
        Ok(())
    }
}
