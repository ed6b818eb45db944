//! Byte and value storage across the data blocks of a Classic card.
//!
//! The data area is every block outside sector 0 that is not a sector
//! trailer, in block order. Values are stored as JSON behind a two-byte
//! big-endian length:
//!
//! ```text
//! block 4: [len_hi len_lo json...]
//! block 5: [json...]
//! ...
//! ```
//!
//! Each operation holds the reader lock from the first authentication to the
//! last block. It authenticates every sector it touches with the caller's
//! key, once per sector, and never rides on a session armed before the call.

use crate::block::Block;
use crate::card::BLOCK_SIZE;
use crate::error::{Result, RfidError};
use crate::key::MifareKey;
use crate::reader::{ReaderInner, RfidReader};
use crowpi_hardware::SpiTransport;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

/// Length prefix in front of a stored value.
pub const VALUE_HEADER_LEN: usize = 2;

impl<S: SpiTransport> ReaderInner<S> {
    /// Authenticate `sector` unless this call already did.
    fn authenticate_once(
        &mut self,
        armed: &mut Option<u8>,
        sector: u8,
        key: &MifareKey,
    ) -> Result<()> {
        if *armed != Some(sector) {
            self.authenticate(sector, key)?;
            *armed = Some(sector);
        }
        Ok(())
    }

    /// Read the first `count` data blocks.
    fn read_data_blocks(&mut self, key: &MifareKey, count: usize) -> Result<Vec<u8>> {
        let geometry = self.geometry()?;
        let mut bytes = Vec::with_capacity(count * BLOCK_SIZE);
        let mut armed = None;

        for block in geometry.data_blocks().take(count) {
            self.authenticate_once(&mut armed, geometry.sector_of(block), key)?;
            bytes.extend_from_slice(&self.read_block(block)?);
        }
        Ok(bytes)
    }

    fn write_data(&mut self, key: &MifareKey, data: &[u8]) -> Result<()> {
        let geometry = self.geometry()?;
        let capacity = geometry.data_capacity();
        if data.len() > capacity {
            return Err(RfidError::CapacityExceeded {
                required: data.len(),
                capacity,
            });
        }

        let mut armed = None;
        for (block, chunk) in geometry.data_blocks().zip(data.chunks(BLOCK_SIZE)) {
            let mut buffer: Block = [0u8; BLOCK_SIZE];
            buffer[..chunk.len()].copy_from_slice(chunk);
            self.authenticate_once(&mut armed, geometry.sector_of(block), key)?;
            self.write_block(block, &buffer)?;
        }
        debug!(bytes = data.len(), "data written to card");
        Ok(())
    }
}

fn blocks_for(len: usize) -> usize {
    len.div_ceil(BLOCK_SIZE)
}

impl<S: SpiTransport> RfidReader<S> {
    /// Bytes available in the data blocks of the selected card.
    ///
    /// # Errors
    ///
    /// `NoCardPresent` without a selected card, `UnsupportedCard` for cards
    /// without Classic memory.
    pub fn capacity(&self) -> Result<usize> {
        Ok(self.lock().geometry()?.data_capacity())
    }

    /// Read the whole data area.
    pub fn read_bytes(&self, key: &MifareKey) -> Result<Vec<u8>> {
        let mut inner = self.lock();
        let blocks = inner.geometry()?.data_blocks().count();
        inner.read_data_blocks(key, blocks)
    }

    /// Write `data` from the start of the data area. The last block is
    /// zero-padded; blocks after it are left untouched.
    ///
    /// # Errors
    ///
    /// `CapacityExceeded` if `data` does not fit. Nothing is written then.
    pub fn write_bytes(&self, key: &MifareKey, data: &[u8]) -> Result<()> {
        self.lock().write_data(key, data)
    }

    /// Store `value` as length-prefixed JSON.
    pub fn write_value<T: Serialize>(&self, key: &MifareKey, value: &T) -> Result<()> {
        let json = serde_json::to_vec(value)?;
        let mut inner = self.lock();
        let capacity = inner.geometry()?.data_capacity();

        let required = json.len() + VALUE_HEADER_LEN;
        let len = u16::try_from(json.len())
            .ok()
            .filter(|_| required <= capacity)
            .ok_or(RfidError::CapacityExceeded { required, capacity })?;

        let mut payload = Vec::with_capacity(required);
        payload.extend_from_slice(&len.to_be_bytes());
        payload.extend_from_slice(&json);
        inner.write_data(key, &payload)
    }

    /// Load a value stored by [`RfidReader::write_value`].
    ///
    /// Only the blocks covered by the stored length are read.
    pub fn read_value<T: DeserializeOwned>(&self, key: &MifareKey) -> Result<T> {
        let mut inner = self.lock();
        let capacity = inner.geometry()?.data_capacity();

        let head = inner.read_data_blocks(key, 1)?;
        let len = usize::from(u16::from_be_bytes([head[0], head[1]]));
        if len + VALUE_HEADER_LEN > capacity {
            return Err(RfidError::protocol(format!(
                "stored value length {len} exceeds card capacity {capacity}"
            )));
        }

        let total = len + VALUE_HEADER_LEN;
        let bytes = if total <= BLOCK_SIZE {
            head
        } else {
            inner.read_data_blocks(key, blocks_for(total))?
        };

        Ok(serde_json::from_slice(&bytes[VALUE_HEADER_LEN..total])?)
    }
}
