//! Reader chip (PCD) control.
//!
//! [`Pcd`] owns the register interface and the optional reset line. It knows
//! how to bring the chip up, switch the antenna and run one chip command to
//! completion. Card-level exchanges live in the `picc`, `auth` and `block`
//! modules, which extend `Pcd` with further `impl` blocks.
//!
//! Every command completes with a [`ChipStatus`] decoded from ErrorReg. The
//! status is internal; callers only ever see it mapped onto
//! [`RfidError`](crate::RfidError).

use crate::config::RfidConfig;
use crate::error::{Result, RfidError};
use crate::register::{
    Register, RegisterInterface, bit_framing, com_irq, command_bits, control, error_bits,
    fifo_level, status2, tx_control,
};
use crowpi_hardware::{ResetPin, SpiTransport};
use std::fmt;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Commands of the chip's CommandReg.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PcdCommand {
    Idle = 0x00,
    Mem = 0x01,
    GenerateRandomId = 0x02,
    CalcCrc = 0x03,
    Transmit = 0x04,
    NoCmdChange = 0x07,
    Receive = 0x08,
    Transceive = 0x0C,
    MfAuthent = 0x0E,
    SoftReset = 0x0F,
}

impl PcdCommand {
    pub const fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code & command_bits::COMMAND_MASK {
            0x00 => Some(Self::Idle),
            0x01 => Some(Self::Mem),
            0x02 => Some(Self::GenerateRandomId),
            0x03 => Some(Self::CalcCrc),
            0x04 => Some(Self::Transmit),
            0x07 => Some(Self::NoCmdChange),
            0x08 => Some(Self::Receive),
            0x0C => Some(Self::Transceive),
            0x0E => Some(Self::MfAuthent),
            0x0F => Some(Self::SoftReset),
            _ => None,
        }
    }
}

/// Silicon reported by VersionReg.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipVersion {
    /// NXP MFRC522 version 1.0 (0x91).
    Mfrc522V1,
    /// NXP MFRC522 version 2.0 (0x92).
    Mfrc522V2,
    /// Fudan FM17522 clone (0x88).
    Fm17522,
    /// Anything else; usually a wiring problem.
    Unknown(u8),
}

impl ChipVersion {
    pub fn from_register(value: u8) -> Self {
        match value {
            0x91 => Self::Mfrc522V1,
            0x92 => Self::Mfrc522V2,
            0x88 => Self::Fm17522,
            other => Self::Unknown(other),
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

impl fmt::Display for ChipVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mfrc522V1 => write!(f, "MFRC522 v1.0"),
            Self::Mfrc522V2 => write!(f, "MFRC522 v2.0"),
            Self::Fm17522 => write!(f, "FM17522"),
            Self::Unknown(value) => write!(f, "unknown (0x{value:02X})"),
        }
    }
}

/// Outcome of one chip command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChipStatus {
    Ok,
    /// The chip's timer fired before a card answered.
    NoResponse,
    Collision,
    CrcError,
    BufferOverflow,
    ParityError,
    ProtocolError,
    Overheated,
    WriteError,
}

impl ChipStatus {
    /// Decode ErrorReg. Collisions are reported separately because the
    /// received bits are still meaningful.
    fn from_error_register(value: u8) -> Self {
        if value & error_bits::BUFFER_OVFL != 0 {
            Self::BufferOverflow
        } else if value & error_bits::TEMP_ERR != 0 {
            Self::Overheated
        } else if value & error_bits::WR_ERR != 0 {
            Self::WriteError
        } else if value & error_bits::PROTOCOL_ERR != 0 {
            Self::ProtocolError
        } else if value & error_bits::PARITY_ERR != 0 {
            Self::ParityError
        } else if value & error_bits::CRC_ERR != 0 {
            Self::CrcError
        } else if value & error_bits::COLL_ERR != 0 {
            Self::Collision
        } else {
            Self::Ok
        }
    }

    /// Map a failed status onto the public taxonomy.
    pub(crate) fn into_error(self, operation: &'static str, polls: u32) -> RfidError {
        match self {
            Self::NoResponse => RfidError::timeout(operation, polls),
            Self::Collision => RfidError::collision(format!("bit collision during {operation}")),
            Self::Ok => RfidError::protocol(format!("{operation} completed without a reply")),
            other => RfidError::protocol(format!("{operation} failed: {other}")),
        }
    }
}

impl fmt::Display for ChipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Ok => "ok",
            Self::NoResponse => "no response",
            Self::Collision => "collision",
            Self::CrcError => "CRC error",
            Self::BufferOverflow => "FIFO overflow",
            Self::ParityError => "parity error",
            Self::ProtocolError => "protocol error",
            Self::Overheated => "chip overheated",
            Self::WriteError => "FIFO write error",
        };
        f.write_str(text)
    }
}

/// Reply of one chip command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Reply {
    pub status: ChipStatus,
    pub data: Vec<u8>,
    /// Valid bits of the last received byte, 0 for a whole byte.
    pub valid_bits: u8,
    /// Polls of ComIrqReg the command took.
    pub polls: u32,
}

impl Reply {
    fn status(status: ChipStatus, polls: u32) -> Self {
        Self {
            status,
            data: Vec::new(),
            valid_bits: 0,
            polls,
        }
    }

    /// Turn any non-`Ok` status into an error.
    pub(crate) fn ok_or_error(self, operation: &'static str) -> Result<Self> {
        match self.status {
            ChipStatus::Ok => Ok(self),
            status => Err(status.into_error(operation, self.polls)),
        }
    }
}

/// The reader chip.
pub struct Pcd<S> {
    pub(crate) regs: RegisterInterface<S>,
    reset_pin: Option<Box<dyn ResetPin>>,
    pub(crate) config: RfidConfig,
}

impl<S> fmt::Debug for Pcd<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pcd")
            .field("reset_pin", &self.reset_pin.is_some())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S: SpiTransport> Pcd<S> {
    /// Wrap a transport. The chip is not touched until [`Pcd::init`].
    pub fn new(spi: S, config: RfidConfig) -> Self {
        Self {
            regs: RegisterInterface::new(spi),
            reset_pin: None,
            config,
        }
    }

    /// Use a reset line for hard resets.
    pub fn with_reset_pin(mut self, pin: Box<dyn ResetPin>) -> Self {
        self.reset_pin = Some(pin);
        self
    }

    pub fn config(&self) -> &RfidConfig {
        &self.config
    }

    /// Raw register access.
    pub fn registers(&mut self) -> &mut RegisterInterface<S> {
        &mut self.regs
    }

    /// Start a chip command.
    pub fn execute(&mut self, command: PcdCommand) -> Result<()> {
        self.regs.write_register(Register::Command, command.code())
    }

    /// Reset the chip.
    ///
    /// A chip held in hard power-down (reset line low) is released by driving
    /// the line high; otherwise a SoftReset is issued. Either way the chip is
    /// then polled until it leaves power-down.
    pub fn reset(&mut self) -> Result<()> {
        let hard_reset = match self.reset_pin.as_mut() {
            Some(pin) => {
                if pin.is_low()? {
                    pin.set_high()?;
                    true
                } else {
                    false
                }
            }
            None => false,
        };
        if !hard_reset {
            self.execute(PcdCommand::SoftReset)?;
        }
        debug!(hard_reset, "chip reset issued");

        let settle = self.config.reset_settle();
        if !settle.is_zero() {
            thread::sleep(settle);
        }

        let budget = self.config.reset_poll_budget.max(1);
        for polls in 1..=budget {
            let command = self.regs.read_register(Register::Command)?;
            if command & command_bits::POWER_DOWN == 0 {
                trace!(polls, "chip out of power-down");
                return self.stop_crypto1();
            }
        }

        Err(RfidError::timeout("chip reset", budget))
    }

    /// Reset the chip and configure it for ISO 14443-A at 106 kBd.
    pub fn init(&mut self) -> Result<()> {
        self.reset()?;
        self.reset_transmission()?;

        // TAuto, prescaler 0xA9 and reload 1000: 25 ms receive timeout
        self.regs.write_register(Register::TMode, 0x80)?;
        self.regs.write_register(Register::TPrescaler, 0xA9)?;
        self.regs.write_register(Register::TReloadHigh, 0x03)?;
        self.regs.write_register(Register::TReloadLow, 0xE8)?;

        // Force 100 % ASK
        self.regs.write_register(Register::TxAsk, 0x40)?;
        // CRC preset 0x6363
        self.regs.write_register(Register::Mode, 0x3D)?;

        self.set_antenna(true)?;
        info!("RFID reader initialised");
        Ok(())
    }

    /// Back to 106 kBd with the default modulation width.
    pub fn reset_transmission(&mut self) -> Result<()> {
        self.regs.write_register(Register::TxMode, 0x00)?;
        self.regs.write_register(Register::RxMode, 0x00)?;
        self.regs.write_register(Register::ModWidth, 0x26)
    }

    /// Switch the RF field on or off.
    pub fn set_antenna(&mut self, on: bool) -> Result<()> {
        debug!(on, "antenna");
        if on {
            self.regs
                .set_bit_mask(Register::TxControl, tx_control::ANTENNA_ON)
        } else {
            self.regs
                .clear_bit_mask(Register::TxControl, tx_control::ANTENNA_ON)
        }
    }

    /// Read VersionReg. Unknown values are logged, not rejected.
    pub fn version(&mut self) -> Result<ChipVersion> {
        let version = ChipVersion::from_register(self.regs.read_register(Register::Version)?);
        if version.is_known() {
            debug!(%version, "chip version");
        } else {
            warn!(%version, "unexpected chip version; check wiring");
        }
        Ok(version)
    }

    /// Switch the Crypto1 unit off, leaving the authenticated state.
    pub fn stop_crypto1(&mut self) -> Result<()> {
        self.regs
            .clear_bit_mask(Register::Status2, status2::MF_CRYPTO1_ON)
    }

    /// Whether the Crypto1 unit is on.
    pub fn crypto1_active(&mut self) -> Result<bool> {
        Ok(self.regs.read_register(Register::Status2)? & status2::MF_CRYPTO1_ON != 0)
    }

    /// Run one Transceive or MFAuthent command to completion.
    ///
    /// `wait_irq` selects the ComIrqReg bits that mark completion. The chip's
    /// timer interrupt is reported as [`ChipStatus::NoResponse`]; exhausting
    /// the poll budget is an error.
    pub(crate) fn communicate(
        &mut self,
        command: PcdCommand,
        wait_irq: u8,
        tx: &[u8],
        tx_last_bits: u8,
    ) -> Result<Reply> {
        self.execute(PcdCommand::Idle)?;
        self.regs.write_register(Register::ComIrq, com_irq::ALL)?;
        self.regs
            .write_register(Register::FifoLevel, fifo_level::FLUSH)?;
        self.regs.write_fifo(tx)?;
        self.regs.write_register(
            Register::BitFraming,
            tx_last_bits & bit_framing::TX_LAST_BITS,
        )?;
        self.execute(command)?;
        if command == PcdCommand::Transceive {
            self.regs
                .set_bit_mask(Register::BitFraming, bit_framing::START_SEND)?;
        }

        let budget = self.config.command_poll_budget.max(1);
        let mut completed = None;
        for polls in 1..=budget {
            let irq = self.regs.read_register(Register::ComIrq)?;
            if irq & wait_irq != 0 {
                completed = Some((polls, false));
                break;
            }
            if irq & com_irq::TIMER != 0 {
                completed = Some((polls, true));
                break;
            }
        }

        if command == PcdCommand::Transceive {
            self.regs
                .clear_bit_mask(Register::BitFraming, bit_framing::START_SEND)?;
        }

        let Some((polls, timed_out)) = completed else {
            self.execute(PcdCommand::Idle)?;
            return Err(RfidError::timeout("chip command", budget));
        };
        if timed_out {
            return Ok(Reply::status(ChipStatus::NoResponse, polls));
        }

        let status = ChipStatus::from_error_register(self.regs.read_register(Register::Error)?);
        if !matches!(status, ChipStatus::Ok | ChipStatus::Collision) {
            return Ok(Reply::status(status, polls));
        }

        let level = self.regs.read_register(Register::FifoLevel)? & fifo_level::LEVEL_MASK;
        let data = self.regs.read_fifo(usize::from(level))?;
        let valid_bits = self.regs.read_register(Register::Control)? & control::RX_LAST_BITS;

        Ok(Reply {
            status,
            data,
            valid_bits,
            polls,
        })
    }

    /// Give back the transport.
    pub fn into_transport(self) -> S {
        self.regs.into_inner()
    }
}

/// Pause used by callers that wait between attempts.
pub(crate) fn pause(duration: Duration) {
    if !duration.is_zero() {
        thread::sleep(duration);
    }
}
