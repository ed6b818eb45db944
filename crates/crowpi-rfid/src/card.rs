//! Card identity and classification.
//!
//! [`Uid`], [`Atqa`] and [`CardType`] are plain values produced by the
//! anti-collision and SELECT exchanges. They carry no reference to the
//! reader and can be copied freely.
//!
//! MIFARE Classic memory layout:
//!
//! ```text
//! Mini:  5 sectors x 4 blocks                     (blocks 0..20)
//! 1K:   16 sectors x 4 blocks                     (blocks 0..64)
//! 4K:   32 sectors x 4 blocks + 8 sectors x 16    (blocks 0..256)
//! ```
//!
//! Block 0 holds manufacturer data. The last block of each sector is the
//! trailer with key A, the access bits and key B.

use crate::error::{Result, RfidError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Size of a MIFARE Classic block in bytes.
pub const BLOCK_SIZE: usize = 16;

/// Cascade tag: first byte of a UID fragment that continues at the next
/// cascade level.
pub const CASCADE_TAG: u8 = 0x88;

/// Block check character of a 4-byte UID fragment.
pub fn bcc(fragment: &[u8; 4]) -> u8 {
    fragment.iter().fold(0, |acc, byte| acc ^ byte)
}

// ============================================================================
// UID
// ============================================================================

/// UID length class (ISO 14443-3 cascade levels).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UidSize {
    /// 4 bytes, one cascade level.
    Single,
    /// 7 bytes, two cascade levels.
    Double,
    /// 10 bytes, three cascade levels.
    Triple,
}

impl UidSize {
    pub fn byte_len(self) -> usize {
        match self {
            Self::Single => 4,
            Self::Double => 7,
            Self::Triple => 10,
        }
    }

    pub fn cascade_levels(self) -> u8 {
        match self {
            Self::Single => 1,
            Self::Double => 2,
            Self::Triple => 3,
        }
    }

    fn from_len(len: usize) -> Option<Self> {
        match len {
            4 => Some(Self::Single),
            7 => Some(Self::Double),
            10 => Some(Self::Triple),
            _ => None,
        }
    }
}

/// Card UID of 4, 7 or 10 bytes, cascade tags removed.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Uid {
    bytes: [u8; 10],
    size: UidSize,
}

impl Uid {
    /// Build a UID from its bytes.
    ///
    /// # Errors
    ///
    /// Returns a protocol error unless `bytes` has 4, 7 or 10 bytes.
    pub fn new(bytes: &[u8]) -> Result<Self> {
        let size = UidSize::from_len(bytes.len()).ok_or_else(|| {
            RfidError::protocol(format!("UID of {} bytes (expected 4, 7 or 10)", bytes.len()))
        })?;
        let mut buf = [0u8; 10];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(Self { bytes: buf, size })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.size.byte_len()]
    }

    pub fn size(&self) -> UidSize {
        self.size
    }

    /// BCC of a single-size UID.
    pub fn bcc(&self) -> Option<u8> {
        match self.size {
            UidSize::Single => Some(bcc(&[self.bytes[0], self.bytes[1], self.bytes[2], self.bytes[3]])),
            _ => None,
        }
    }

    /// The four bytes fed to MFAuthent: the last four bytes of the UID.
    pub fn auth_bytes(&self) -> [u8; 4] {
        let uid = self.as_bytes();
        let tail = &uid[uid.len() - 4..];
        [tail[0], tail[1], tail[2], tail[3]]
    }

    /// Fragments sent at each cascade level, with cascade tags inserted.
    pub fn cascade_fragments(&self) -> Vec<[u8; 4]> {
        let uid = self.as_bytes();
        match self.size {
            UidSize::Single => vec![[uid[0], uid[1], uid[2], uid[3]]],
            UidSize::Double => vec![
                [CASCADE_TAG, uid[0], uid[1], uid[2]],
                [uid[3], uid[4], uid[5], uid[6]],
            ],
            UidSize::Triple => vec![
                [CASCADE_TAG, uid[0], uid[1], uid[2]],
                [CASCADE_TAG, uid[3], uid[4], uid[5]],
                [uid[6], uid[7], uid[8], uid[9]],
            ],
        }
    }

    /// Upper-case hex without separators.
    pub fn to_hex(&self) -> String {
        self.as_bytes().iter().map(|b| format!("{b:02X}")).collect()
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for byte in self.as_bytes() {
            if !first {
                f.write_str(" ")?;
            }
            write!(f, "{byte:02X}")?;
            first = false;
        }
        Ok(())
    }
}

impl fmt::Debug for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uid({})", self.to_hex())
    }
}

impl TryFrom<&[u8]> for Uid {
    type Error = RfidError;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        Self::new(bytes)
    }
}

/// Answer to REQA/WUPA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Atqa(pub [u8; 2]);

impl Atqa {
    /// UID size announced in bits 7-6 of the first byte.
    pub fn uid_size(&self) -> Option<UidSize> {
        match (self.0[0] >> 6) & 0x03 {
            0 => Some(UidSize::Single),
            1 => Some(UidSize::Double),
            2 => Some(UidSize::Triple),
            _ => None,
        }
    }
}

// ============================================================================
// Card type
// ============================================================================

/// Card family, derived from SAK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CardType {
    MifareMini,
    MifareClassic1K,
    MifareClassic4K,
    MifareUltralight,
    MifarePlus2K,
    MifarePlus4K,
    Tnp3xxx,
    Iso14443_4,
    Iso18092,
    /// SAK that matches no known family.
    Unsupported(u8),
}

impl CardType {
    /// Classify a final SAK (bit 8 is RFU and ignored).
    pub fn from_sak(sak: u8) -> Self {
        match sak & 0x7F {
            0x09 => Self::MifareMini,
            0x08 => Self::MifareClassic1K,
            0x18 => Self::MifareClassic4K,
            0x00 => Self::MifareUltralight,
            0x10 => Self::MifarePlus2K,
            0x11 => Self::MifarePlus4K,
            0x01 => Self::Tnp3xxx,
            0x20 => Self::Iso14443_4,
            0x40 => Self::Iso18092,
            other => Self::Unsupported(other),
        }
    }

    /// Memory layout, for families that support Classic block I/O.
    pub fn classic_geometry(&self) -> Option<ClassicGeometry> {
        match self {
            Self::MifareMini => Some(ClassicGeometry::MINI),
            Self::MifareClassic1K => Some(ClassicGeometry::CLASSIC_1K),
            Self::MifareClassic4K => Some(ClassicGeometry::CLASSIC_4K),
            _ => None,
        }
    }

    pub fn is_classic(&self) -> bool {
        self.classic_geometry().is_some()
    }
}

impl fmt::Display for CardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MifareMini => write!(f, "MIFARE Mini"),
            Self::MifareClassic1K => write!(f, "MIFARE Classic 1K"),
            Self::MifareClassic4K => write!(f, "MIFARE Classic 4K"),
            Self::MifareUltralight => write!(f, "MIFARE Ultralight"),
            Self::MifarePlus2K => write!(f, "MIFARE Plus 2K"),
            Self::MifarePlus4K => write!(f, "MIFARE Plus 4K"),
            Self::Tnp3xxx => write!(f, "MIFARE TNP3XXX"),
            Self::Iso14443_4 => write!(f, "ISO/IEC 14443-4"),
            Self::Iso18092 => write!(f, "ISO/IEC 18092 (NFC)"),
            Self::Unsupported(sak) => write!(f, "unsupported (SAK 0x{sak:02X})"),
        }
    }
}

// ============================================================================
// Classic geometry
// ============================================================================

const SMALL_SECTOR_BLOCKS: u16 = 4;
const LARGE_SECTOR_BLOCKS: u16 = 16;
const SMALL_SECTOR_COUNT: u16 = 32;

/// Sector and block layout of a MIFARE Classic card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassicGeometry {
    sectors: u8,
}

impl ClassicGeometry {
    pub const MINI: Self = Self { sectors: 5 };
    pub const CLASSIC_1K: Self = Self { sectors: 16 };
    pub const CLASSIC_4K: Self = Self { sectors: 40 };

    pub fn sector_count(&self) -> u8 {
        self.sectors
    }

    pub fn total_blocks(&self) -> u16 {
        let sectors = u16::from(self.sectors);
        let small = sectors.min(SMALL_SECTOR_COUNT);
        let large = sectors - small;
        small * SMALL_SECTOR_BLOCKS + large * LARGE_SECTOR_BLOCKS
    }

    pub fn contains_block(&self, block: u8) -> bool {
        u16::from(block) < self.total_blocks()
    }

    pub fn contains_sector(&self, sector: u8) -> bool {
        sector < self.sectors
    }

    /// Sector holding `block`. Only meaningful for contained blocks.
    pub fn sector_of(&self, block: u8) -> u8 {
        let block = u16::from(block);
        let small_blocks = SMALL_SECTOR_COUNT * SMALL_SECTOR_BLOCKS;
        let sector = if block < small_blocks {
            block / SMALL_SECTOR_BLOCKS
        } else {
            SMALL_SECTOR_COUNT + (block - small_blocks) / LARGE_SECTOR_BLOCKS
        };
        sector as u8
    }

    pub fn blocks_in_sector(&self, sector: u8) -> u8 {
        if u16::from(sector) < SMALL_SECTOR_COUNT {
            SMALL_SECTOR_BLOCKS as u8
        } else {
            LARGE_SECTOR_BLOCKS as u8
        }
    }

    pub fn first_block(&self, sector: u8) -> u8 {
        let sector = u16::from(sector);
        let first = if sector < SMALL_SECTOR_COUNT {
            sector * SMALL_SECTOR_BLOCKS
        } else {
            SMALL_SECTOR_COUNT * SMALL_SECTOR_BLOCKS
                + (sector - SMALL_SECTOR_COUNT) * LARGE_SECTOR_BLOCKS
        };
        first as u8
    }

    pub fn trailer_block(&self, sector: u8) -> u8 {
        let last = u16::from(self.first_block(sector)) + u16::from(self.blocks_in_sector(sector)) - 1;
        last as u8
    }

    pub fn is_trailer(&self, block: u8) -> bool {
        self.contains_block(block) && self.trailer_block(self.sector_of(block)) == block
    }

    /// Blocks available for application data: everything except sector 0
    /// and the sector trailers.
    pub fn data_blocks(&self) -> impl Iterator<Item = u8> + '_ {
        (1..self.sectors).flat_map(move |sector| {
            let first = self.first_block(sector);
            let trailer = self.trailer_block(sector);
            first..trailer
        })
    }

    /// Bytes available in the data blocks.
    pub fn data_capacity(&self) -> usize {
        self.data_blocks().count() * BLOCK_SIZE
    }
}

// ============================================================================
// Detected card
// ============================================================================

/// A card that completed anti-collision and SELECT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedCard {
    pub uid: Uid,
    pub card_type: CardType,
    pub sak: u8,
    pub atqa: Option<Atqa>,
    pub detected_at: DateTime<Utc>,
}

impl DetectedCard {
    pub fn new(uid: Uid, sak: u8, atqa: Option<Atqa>) -> Self {
        Self {
            uid,
            card_type: CardType::from_sak(sak),
            sak,
            atqa,
            detected_at: Utc::now(),
        }
    }

    /// Classic layout, or `UnsupportedCard` for other families.
    pub fn geometry(&self) -> Result<ClassicGeometry> {
        self.card_type
            .classic_geometry()
            .ok_or(RfidError::UnsupportedCard {
                card_type: self.card_type,
            })
    }
}
