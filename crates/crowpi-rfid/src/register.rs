//! MFRC522 register map and register-level access.
//!
//! Each register access is exactly one SPI transfer. The address byte on the
//! wire is `(addr << 1) & 0x7E`, with bit 7 set for reads; the chip answers a
//! read on the byte clocked out after the address.
//!
//! ```text
//! write:  [0 a5 a4 a3 a2 a1 a0 0] [value]
//! read:   [1 a5 a4 a3 a2 a1 a0 0] [0x00]   -> reply[1] = value
//! ```
//!
//! The FIFO is read by repeating the read address once per byte, which
//! keeps a multi-byte read inside a single transfer.

use crate::error::Result;
use crowpi_hardware::{HardwareError, SpiTransport};
use tracing::trace;

// ============================================================================
// Register addresses
// ============================================================================

/// MFRC522 registers used by the driver (datasheet section 9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Register {
    Command = 0x01,
    ComIEn = 0x02,
    DivIEn = 0x03,
    ComIrq = 0x04,
    DivIrq = 0x05,
    Error = 0x06,
    Status1 = 0x07,
    Status2 = 0x08,
    FifoData = 0x09,
    FifoLevel = 0x0A,
    WaterLevel = 0x0B,
    Control = 0x0C,
    BitFraming = 0x0D,
    Coll = 0x0E,
    Mode = 0x11,
    TxMode = 0x12,
    RxMode = 0x13,
    TxControl = 0x14,
    TxAsk = 0x15,
    CrcResultMsb = 0x21,
    CrcResultLsb = 0x22,
    ModWidth = 0x24,
    RfCfg = 0x26,
    TMode = 0x2A,
    TPrescaler = 0x2B,
    TReloadHigh = 0x2C,
    TReloadLow = 0x2D,
    Version = 0x37,
}

impl Register {
    const ALL: [Register; 28] = [
        Register::Command,
        Register::ComIEn,
        Register::DivIEn,
        Register::ComIrq,
        Register::DivIrq,
        Register::Error,
        Register::Status1,
        Register::Status2,
        Register::FifoData,
        Register::FifoLevel,
        Register::WaterLevel,
        Register::Control,
        Register::BitFraming,
        Register::Coll,
        Register::Mode,
        Register::TxMode,
        Register::RxMode,
        Register::TxControl,
        Register::TxAsk,
        Register::CrcResultMsb,
        Register::CrcResultLsb,
        Register::ModWidth,
        Register::RfCfg,
        Register::TMode,
        Register::TPrescaler,
        Register::TReloadHigh,
        Register::TReloadLow,
        Register::Version,
    ];

    /// Register address as listed in the datasheet.
    pub const fn address(self) -> u8 {
        self as u8
    }

    /// Address byte of a write transfer.
    pub const fn write_address(self) -> u8 {
        (self.address() << 1) & 0x7E
    }

    /// Address byte of a read transfer.
    pub const fn read_address(self) -> u8 {
        self.write_address() | 0x80
    }

    /// Look up a register by its datasheet address.
    pub fn from_address(address: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|reg| reg.address() == address)
    }

    /// Decode the address byte of an SPI frame into (register, is_read).
    pub fn decode_wire(byte: u8) -> Option<(Self, bool)> {
        let is_read = byte & 0x80 != 0;
        Self::from_address((byte & 0x7E) >> 1).map(|reg| (reg, is_read))
    }
}

// ============================================================================
// Bit fields
// ============================================================================

/// CommandReg bits.
pub mod command_bits {
    /// Soft power-down requested or in progress.
    pub const POWER_DOWN: u8 = 0x10;
    /// Command field.
    pub const COMMAND_MASK: u8 = 0x0F;
}

/// ComIrqReg / ComIEnReg bits.
pub mod com_irq {
    /// Written bits are set rather than cleared.
    pub const SET1: u8 = 0x80;
    pub const TX: u8 = 0x40;
    pub const RX: u8 = 0x20;
    pub const IDLE: u8 = 0x10;
    pub const HI_ALERT: u8 = 0x08;
    pub const LO_ALERT: u8 = 0x04;
    pub const ERR: u8 = 0x02;
    pub const TIMER: u8 = 0x01;
    /// Every interrupt flag.
    pub const ALL: u8 = 0x7F;
}

/// DivIrqReg bits.
pub mod div_irq {
    pub const SET2: u8 = 0x80;
    pub const MFIN_ACT: u8 = 0x10;
    pub const CRC: u8 = 0x04;
    pub const ALL: u8 = 0x7F;
}

/// ErrorReg bits.
pub mod error_bits {
    pub const WR_ERR: u8 = 0x80;
    pub const TEMP_ERR: u8 = 0x40;
    pub const BUFFER_OVFL: u8 = 0x10;
    pub const COLL_ERR: u8 = 0x08;
    pub const CRC_ERR: u8 = 0x04;
    pub const PARITY_ERR: u8 = 0x02;
    pub const PROTOCOL_ERR: u8 = 0x01;
}

/// Status2Reg bits.
pub mod status2 {
    /// Crypto1 unit is switched on; only valid after a successful MFAuthent.
    pub const MF_CRYPTO1_ON: u8 = 0x08;
}

/// FIFOLevelReg bits.
pub mod fifo_level {
    /// Writing this bit flushes the FIFO.
    pub const FLUSH: u8 = 0x80;
    pub const LEVEL_MASK: u8 = 0x7F;
}

/// ControlReg bits.
pub mod control {
    /// Number of valid bits in the last received byte (0 = whole byte).
    pub const RX_LAST_BITS: u8 = 0x07;
}

/// BitFramingReg bits.
pub mod bit_framing {
    /// Start transmission of a Transceive command.
    pub const START_SEND: u8 = 0x80;
    /// Number of bits of the last transmitted byte.
    pub const TX_LAST_BITS: u8 = 0x07;
}

/// CollReg bits.
pub mod coll {
    /// When cleared, received bits are zeroed after a collision.
    pub const VALUES_AFTER_COLL: u8 = 0x80;
}

/// TxControlReg bits.
pub mod tx_control {
    /// TX1 and TX2 drive the modulated carrier.
    pub const ANTENNA_ON: u8 = 0x03;
}

// ============================================================================
// Register interface
// ============================================================================

/// Typed register access on top of an SPI transport.
///
/// Owns the transport; holds no other state. A failed transfer is returned as
/// `RfidError::Transport` and the register is presumed unchanged.
#[derive(Debug)]
pub struct RegisterInterface<S> {
    spi: S,
}

impl<S: SpiTransport> RegisterInterface<S> {
    pub fn new(spi: S) -> Self {
        Self { spi }
    }

    /// Give back the transport.
    pub fn into_inner(self) -> S {
        self.spi
    }

    fn transfer(&mut self, tx: &[u8]) -> Result<Vec<u8>> {
        let rx = self.spi.transfer(tx)?;
        if rx.len() != tx.len() {
            return Err(HardwareError::invalid_data(format!(
                "SPI reply of {} bytes to a {}-byte frame",
                rx.len(),
                tx.len()
            ))
            .into());
        }
        Ok(rx)
    }

    /// Read one register.
    pub fn read_register(&mut self, reg: Register) -> Result<u8> {
        let rx = self.transfer(&[reg.read_address(), 0x00])?;
        Ok(rx[1])
    }

    /// Write one register.
    pub fn write_register(&mut self, reg: Register, value: u8) -> Result<()> {
        trace!(register = ?reg, value = format_args!("{value:#04x}"), "write register");
        self.transfer(&[reg.write_address(), value])?;
        Ok(())
    }

    /// Read `count` bytes from the FIFO in one transfer.
    pub fn read_fifo(&mut self, count: usize) -> Result<Vec<u8>> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut tx = vec![Register::FifoData.read_address(); count];
        tx.push(0x00);
        let rx = self.transfer(&tx)?;
        Ok(rx[1..=count].to_vec())
    }

    /// Append bytes to the FIFO in one transfer.
    pub fn write_fifo(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        let mut tx = Vec::with_capacity(data.len() + 1);
        tx.push(Register::FifoData.write_address());
        tx.extend_from_slice(data);
        self.transfer(&tx)?;
        Ok(())
    }

    /// Set bits in a register. Skips the write when they are already set.
    pub fn set_bit_mask(&mut self, reg: Register, mask: u8) -> Result<()> {
        let current = self.read_register(reg)?;
        if current & mask != mask {
            self.write_register(reg, current | mask)?;
        }
        Ok(())
    }

    /// Clear bits in a register. Skips the write when they are already clear.
    pub fn clear_bit_mask(&mut self, reg: Register, mask: u8) -> Result<()> {
        let current = self.read_register(reg)?;
        if current & mask != 0 {
            self.write_register(reg, current & !mask)?;
        }
        Ok(())
    }
}
