//! Register-level MFRC522 simulation.
//!
//! [`SimulatedPcd`] implements [`SpiTransport`] and decodes every frame the
//! driver sends exactly as the chip would: address bytes, FIFO bursts,
//! interrupt flags with their set/clear semantics, the CRC coprocessor,
//! Transceive on StartSend and MFAuthent. Cards placed in the field answer
//! through [`SimulatedCard`].

use super::card::{Response, SimulatedCard};
use crate::card::BLOCK_SIZE;
use crate::pcd::PcdCommand;
use crate::picc::command;
use crate::register::{
    Register, bit_framing, com_irq, div_irq, error_bits, fifo_level, status2, tx_control,
};
use crowpi_hardware::{HardwareError, SpiTransport};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// VersionReg value reported by the simulation.
pub const SIMULATED_VERSION: u8 = 0x92;

const FIFO_SIZE: usize = 64;
const REGISTER_COUNT: usize = 0x40;

/// CRC_A (ISO 14443-3), low byte first. Software reference used by the
/// simulated coprocessor and the simulated cards.
pub fn crc_a(data: &[u8]) -> [u8; 2] {
    let mut crc: u16 = 0x6363;
    for &byte in data {
        let mut ch = byte ^ (crc & 0x00FF) as u8;
        ch ^= ch << 4;
        let ch = u16::from(ch);
        crc = (crc >> 8) ^ (ch << 8) ^ (ch << 3) ^ (ch >> 4);
    }
    crc.to_le_bytes()
}

#[derive(Debug, Default)]
struct Faults {
    failures_pending: usize,
    disconnected: bool,
    corrupt_bcc: bool,
    corrupt_sak_crc: bool,
    corrupt_read_crc: bool,
    nak_write: bool,
    stall_crc: bool,
}

#[derive(Debug)]
struct ChipState {
    regs: [u8; REGISTER_COUNT],
    fifo: VecDeque<u8>,
    cards: Vec<SimulatedCard>,
    faults: Faults,
    transfers: usize,
    soft_resets: usize,
}

impl ChipState {
    fn new() -> Self {
        let mut state = Self {
            regs: [0; REGISTER_COUNT],
            fifo: VecDeque::with_capacity(FIFO_SIZE),
            cards: Vec::new(),
            faults: Faults::default(),
            transfers: 0,
            soft_resets: 0,
        };
        state.load_defaults();
        state
    }

    fn load_defaults(&mut self) {
        self.regs = [0; REGISTER_COUNT];
        self.set(Register::Command, 0x20);
        self.set(Register::ComIEn, 0x80);
        self.set(Register::ComIrq, 0x14);
        self.set(Register::Status2, 0x00);
        self.set(Register::WaterLevel, 0x08);
        self.set(Register::Control, 0x10);
        self.set(Register::Mode, 0x3F);
        self.set(Register::TxControl, 0x80);
        self.set(Register::ModWidth, 0x26);
        self.set(Register::Version, SIMULATED_VERSION);
        self.fifo.clear();
    }

    fn get(&self, reg: Register) -> u8 {
        self.regs[usize::from(reg.address())]
    }

    fn set(&mut self, reg: Register, value: u8) {
        self.regs[usize::from(reg.address())] = value;
    }

    fn antenna_on(&self) -> bool {
        self.get(Register::TxControl) & tx_control::ANTENNA_ON == tx_control::ANTENNA_ON
    }

    fn current_command(&self) -> Option<PcdCommand> {
        PcdCommand::from_code(self.get(Register::Command))
    }

    fn read(&mut self, address: u8) -> u8 {
        let Some(reg) = Register::from_address(address) else {
            return self.regs[usize::from(address & 0x3F)];
        };
        match reg {
            Register::FifoData => self.fifo.pop_front().unwrap_or(0),
            Register::FifoLevel => self.fifo.len() as u8,
            _ => self.get(reg),
        }
    }

    fn write(&mut self, address: u8, value: u8) {
        let Some(reg) = Register::from_address(address) else {
            self.regs[usize::from(address & 0x3F)] = value;
            return;
        };
        match reg {
            Register::Command => self.execute(value),
            Register::ComIrq => {
                let bits = value & com_irq::ALL;
                let current = self.get(reg);
                let next = if value & com_irq::SET1 != 0 {
                    current | bits
                } else {
                    current & !bits
                };
                self.set(reg, next);
            }
            Register::DivIrq => {
                let bits = value & div_irq::ALL;
                let current = self.get(reg);
                let next = if value & div_irq::SET2 != 0 {
                    current | bits
                } else {
                    current & !bits
                };
                self.set(reg, next);
            }
            Register::FifoLevel => {
                if value & fifo_level::FLUSH != 0 {
                    self.fifo.clear();
                    let error = self.get(Register::Error) & !error_bits::BUFFER_OVFL;
                    self.set(Register::Error, error);
                }
            }
            Register::FifoData => {
                if self.fifo.len() < FIFO_SIZE {
                    self.fifo.push_back(value);
                } else {
                    let error = self.get(Register::Error) | error_bits::BUFFER_OVFL;
                    self.set(Register::Error, error);
                }
            }
            Register::BitFraming => {
                self.set(reg, value & !bit_framing::START_SEND);
                if value & bit_framing::START_SEND != 0
                    && self.current_command() == Some(PcdCommand::Transceive)
                {
                    self.transceive(value & bit_framing::TX_LAST_BITS);
                }
            }
            Register::TxControl => {
                self.set(reg, value);
                if !self.antenna_on() {
                    self.cards.iter_mut().for_each(SimulatedCard::power_off);
                }
            }
            Register::Error | Register::Version | Register::Status1 => {}
            _ => self.set(reg, value),
        }
    }

    fn execute(&mut self, value: u8) {
        let Some(command) = PcdCommand::from_code(value) else {
            return;
        };
        self.set(Register::Command, value);

        match command {
            PcdCommand::SoftReset => {
                self.load_defaults();
                self.set(Register::Command, 0x00);
                self.cards.iter_mut().for_each(SimulatedCard::power_off);
                self.soft_resets += 1;
            }
            PcdCommand::CalcCrc => {
                let data: Vec<u8> = self.fifo.drain(..).collect();
                if !self.faults.stall_crc {
                    let [low, high] = crc_a(&data);
                    self.set(Register::CrcResultLsb, low);
                    self.set(Register::CrcResultMsb, high);
                    let irq = self.get(Register::DivIrq) | div_irq::CRC;
                    self.set(Register::DivIrq, irq);
                }
            }
            PcdCommand::MfAuthent => self.authenticate(),
            _ => {}
        }
    }

    fn authenticate(&mut self) {
        let frame: Vec<u8> = self.fifo.drain(..).collect();
        self.set(Register::Error, 0);

        let accepted = self.antenna_on()
            && self
                .cards
                .iter_mut()
                .filter(|card| card.is_selected())
                .map(|card| card.authenticate(&frame))
                .fold(false, |any, ok| any | ok);

        let irq = self.get(Register::ComIrq);
        if accepted {
            let status = self.get(Register::Status2) | status2::MF_CRYPTO1_ON;
            self.set(Register::Status2, status);
            self.set(Register::ComIrq, irq | com_irq::IDLE);
        } else {
            self.set(Register::ComIrq, irq | com_irq::TIMER);
        }
        self.set(Register::Command, PcdCommand::Idle.code());
    }

    fn transceive(&mut self, tx_last_bits: u8) {
        let frame: Vec<u8> = self.fifo.drain(..).collect();
        self.set(Register::Error, 0);
        let control = self.get(Register::Control) & !0x07;
        self.set(Register::Control, control);
        let irq = self.get(Register::ComIrq) | com_irq::TX;

        if !self.antenna_on() {
            self.set(Register::ComIrq, irq | com_irq::TIMER);
            return;
        }

        let responses: Vec<(usize, Response)> = self
            .cards
            .iter_mut()
            .enumerate()
            .filter_map(|(index, card)| card.respond(&frame, tx_last_bits).map(|r| (index, r)))
            .collect();

        let Some((_, first)) = responses.first() else {
            self.set(Register::ComIrq, irq | com_irq::TIMER);
            return;
        };
        let mut response = first.clone();
        let collided = responses.iter().any(|(_, other)| *other != response);
        if collided {
            let error = self.get(Register::Error) | error_bits::COLL_ERR;
            self.set(Register::Error, error);
            for (_, other) in &responses[1..] {
                for (byte, theirs) in response.data.iter_mut().zip(&other.data) {
                    *byte |= theirs;
                }
            }
        }

        self.inject_faults(&frame, &mut response);
        if self.faults.nak_write && is_write_command(&frame) {
            self.faults.nak_write = false;
            response = Response {
                data: vec![0x04],
                valid_bits: 4,
            };
            for (index, _) in &responses {
                self.cards[*index].fall_back();
            }
        }

        self.fifo.extend(response.data.iter().take(FIFO_SIZE));
        let control = self.get(Register::Control) | (response.valid_bits & 0x07);
        self.set(Register::Control, control);
        self.set(Register::ComIrq, irq | com_irq::RX | com_irq::IDLE);
    }

    fn inject_faults(&mut self, frame: &[u8], response: &mut Response) {
        let is_select_code = frame
            .first()
            .is_some_and(|code| matches!(*code, command::SEL_CL1 | command::SEL_CL2 | command::SEL_CL3));

        if self.faults.corrupt_bcc
            && is_select_code
            && frame.get(1) == Some(&command::NVB_ANTICOLL)
            && response.data.len() == 5
        {
            self.faults.corrupt_bcc = false;
            response.data[4] ^= 0xFF;
        }
        if self.faults.corrupt_sak_crc
            && is_select_code
            && frame.get(1) == Some(&command::NVB_SELECT)
            && response.data.len() == 3
        {
            self.faults.corrupt_sak_crc = false;
            response.data[2] ^= 0xFF;
        }
        if self.faults.corrupt_read_crc
            && frame.first() == Some(&command::MF_READ)
            && response.data.len() == BLOCK_SIZE + 2
        {
            self.faults.corrupt_read_crc = false;
            response.data[BLOCK_SIZE + 1] ^= 0xFF;
        }
    }
}

fn is_write_command(frame: &[u8]) -> bool {
    frame.len() == 4 && frame[0] == command::MF_WRITE
}

fn lock(state: &Mutex<ChipState>) -> MutexGuard<'_, ChipState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Simulated MFRC522 on an SPI bus.
///
/// # Examples
///
/// ```
/// use crowpi_rfid::mock::{SimulatedCard, SimulatedPcd};
/// use crowpi_rfid::{RfidConfig, RfidReader};
/// use std::time::Duration;
///
/// let (chip, handle) = SimulatedPcd::new();
/// handle.insert_card(SimulatedCard::classic_4k(&[0x11, 0x22, 0x33, 0x44]));
///
/// let reader = RfidReader::new(chip, RfidConfig::for_testing()).unwrap();
/// let card = reader.detect_card(Duration::from_millis(20)).unwrap().unwrap();
/// assert_eq!(card.uid.to_hex(), "11223344");
/// ```
#[derive(Debug)]
pub struct SimulatedPcd {
    state: Arc<Mutex<ChipState>>,
}

impl SimulatedPcd {
    /// Create a chip with an empty field and its control handle.
    pub fn new() -> (Self, SimulatedPcdHandle) {
        let state = Arc::new(Mutex::new(ChipState::new()));
        (
            Self {
                state: Arc::clone(&state),
            },
            SimulatedPcdHandle { state },
        )
    }
}

impl SpiTransport for SimulatedPcd {
    fn transfer(&mut self, tx: &[u8]) -> crowpi_hardware::Result<Vec<u8>> {
        let mut state = lock(&self.state);

        if state.faults.disconnected {
            return Err(HardwareError::disconnected("simulated MFRC522"));
        }
        if state.faults.failures_pending > 0 {
            state.faults.failures_pending -= 1;
            return Err(HardwareError::communication("injected SPI failure"));
        }
        state.transfers += 1;

        let mut rx = vec![0u8; tx.len()];
        let Some(&first) = tx.first() else {
            return Ok(rx);
        };
        let address = (first & 0x7E) >> 1;

        if first & 0x80 != 0 {
            // Read burst: every byte but the last is an address
            for (slot, &previous) in rx.iter_mut().skip(1).zip(tx.iter()) {
                if previous & 0x80 != 0 {
                    *slot = state.read((previous & 0x7E) >> 1);
                }
            }
        } else {
            for &value in &tx[1..] {
                state.write(address, value);
            }
        }
        Ok(rx)
    }
}

/// Handle for controlling and inspecting a [`SimulatedPcd`].
#[derive(Debug, Clone)]
pub struct SimulatedPcdHandle {
    state: Arc<Mutex<ChipState>>,
}

impl SimulatedPcdHandle {
    /// Place a card in the field.
    pub fn insert_card(&self, card: SimulatedCard) {
        lock(&self.state).cards.push(card);
    }

    /// Take every card out of the field.
    pub fn remove_cards(&self) {
        lock(&self.state).cards.clear();
    }

    pub fn card_count(&self) -> usize {
        lock(&self.state).cards.len()
    }

    /// Current contents of a block of the card at `index`.
    pub fn card_block(&self, index: usize, block: u8) -> Option<[u8; BLOCK_SIZE]> {
        lock(&self.state).cards.get(index)?.block(block)
    }

    /// Raw register value.
    pub fn register(&self, reg: Register) -> u8 {
        lock(&self.state).get(reg)
    }

    pub fn antenna_on(&self) -> bool {
        lock(&self.state).antenna_on()
    }

    pub fn crypto1_on(&self) -> bool {
        lock(&self.state).get(Register::Status2) & status2::MF_CRYPTO1_ON != 0
    }

    /// Flip the BCC of the next anti-collision reply.
    pub fn corrupt_next_bcc(&self) {
        lock(&self.state).faults.corrupt_bcc = true;
    }

    /// Flip the CRC of the next SAK.
    pub fn corrupt_next_sak_crc(&self) {
        lock(&self.state).faults.corrupt_sak_crc = true;
    }

    /// Flip the CRC of the next READ reply.
    pub fn corrupt_next_read_crc(&self) {
        lock(&self.state).faults.corrupt_read_crc = true;
    }

    /// Answer the next WRITE command with a NAK.
    pub fn nak_next_write(&self) {
        lock(&self.state).faults.nak_write = true;
    }

    /// Keep the CRC coprocessor from ever finishing.
    pub fn stall_crc(&self, stalled: bool) {
        lock(&self.state).faults.stall_crc = stalled;
    }

    /// Make the next `count` transfers fail.
    pub fn fail_next(&self, count: usize) {
        lock(&self.state).faults.failures_pending = count;
    }

    /// Make every further transfer fail.
    pub fn disconnect(&self) {
        lock(&self.state).faults.disconnected = true;
    }

    /// Successful transfers so far.
    pub fn transfer_count(&self) -> usize {
        lock(&self.state).transfers
    }

    /// SoftReset commands executed so far.
    pub fn soft_reset_count(&self) -> usize {
        lock(&self.state).soft_resets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(chip: &mut SimulatedPcd, reg: Register) -> u8 {
        chip.transfer(&[reg.read_address(), 0x00]).unwrap()[1]
    }

    fn write(chip: &mut SimulatedPcd, reg: Register, value: u8) {
        chip.transfer(&[reg.write_address(), value]).unwrap();
    }

    #[test]
    fn test_crc_a_reference_vectors() {
        assert_eq!(crc_a(&[0x50, 0x00]), [0x57, 0xCD]);
        assert_eq!(crc_a(&[0x30, 0x04]), [0x26, 0xEE]);
        assert_eq!(crc_a(&[]), [0x63, 0x63]);
    }

    #[test]
    fn test_version() {
        let (mut chip, _) = SimulatedPcd::new();
        assert_eq!(read(&mut chip, Register::Version), 0x92);
    }

    #[test]
    fn test_irq_set_and_clear_semantics() {
        let (mut chip, _) = SimulatedPcd::new();
        write(&mut chip, Register::ComIrq, 0x7F);
        assert_eq!(read(&mut chip, Register::ComIrq), 0x00);

        write(&mut chip, Register::ComIrq, 0x80 | 0x21);
        assert_eq!(read(&mut chip, Register::ComIrq), 0x21);
    }

    #[test]
    fn test_fifo_burst() {
        let (mut chip, _) = SimulatedPcd::new();
        chip.transfer(&[Register::FifoData.write_address(), 1, 2, 3]).unwrap();
        assert_eq!(read(&mut chip, Register::FifoLevel), 3);

        let fifo = Register::FifoData.read_address();
        let rx = chip.transfer(&[fifo, fifo, fifo, 0x00]).unwrap();
        assert_eq!(rx, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_crc_coprocessor() {
        let (mut chip, _) = SimulatedPcd::new();
        chip.transfer(&[Register::FifoData.write_address(), 0x50, 0x00]).unwrap();
        write(&mut chip, Register::Command, PcdCommand::CalcCrc.code());

        assert_eq!(read(&mut chip, Register::DivIrq) & div_irq::CRC, div_irq::CRC);
        assert_eq!(read(&mut chip, Register::CrcResultLsb), 0x57);
        assert_eq!(read(&mut chip, Register::CrcResultMsb), 0xCD);
    }

    #[test]
    fn test_transfer_faults() {
        let (mut chip, handle) = SimulatedPcd::new();
        handle.fail_next(1);
        assert!(chip.transfer(&[0x80, 0x00]).is_err());
        assert!(chip.transfer(&[0x80, 0x00]).is_ok());
        assert_eq!(handle.transfer_count(), 1);

        handle.disconnect();
        assert!(matches!(
            chip.transfer(&[0x80, 0x00]),
            Err(HardwareError::Disconnected { .. })
        ));
    }

    #[test]
    fn test_soft_reset_powers_cards_off() {
        let (mut chip, handle) = SimulatedPcd::new();
        write(&mut chip, Register::TxControl, 0x83);
        write(&mut chip, Register::Command, PcdCommand::SoftReset.code());

        assert_eq!(handle.soft_reset_count(), 1);
        assert!(!handle.antenna_on());
        assert_eq!(read(&mut chip, Register::Command) & 0x10, 0);
    }
}
