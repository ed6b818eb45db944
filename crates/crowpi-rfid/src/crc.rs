//! CRC_A through the chip's coprocessor.

use crate::error::{Result, RfidError};
use crate::pcd::{Pcd, PcdCommand};
use crate::register::{Register, div_irq, fifo_level};
use crowpi_hardware::SpiTransport;
use tracing::trace;

impl<S: SpiTransport> Pcd<S> {
    /// Compute the CRC_A of `data` and return it low byte first, the order in
    /// which it is appended to a frame.
    ///
    /// Polls DivIrqReg at most `crc_poll_budget` times.
    pub fn compute_crc(&mut self, data: &[u8]) -> Result<[u8; 2]> {
        self.execute(PcdCommand::Idle)?;
        self.regs.write_register(Register::DivIrq, div_irq::CRC)?;
        self.regs
            .write_register(Register::FifoLevel, fifo_level::FLUSH)?;
        self.regs.write_fifo(data)?;
        self.execute(PcdCommand::CalcCrc)?;

        let budget = self.config.crc_poll_budget.max(1);
        for polls in 1..=budget {
            let irq = self.regs.read_register(Register::DivIrq)?;
            if irq & div_irq::CRC != 0 {
                self.execute(PcdCommand::Idle)?;
                let low = self.regs.read_register(Register::CrcResultLsb)?;
                let high = self.regs.read_register(Register::CrcResultMsb)?;
                trace!(polls, "CRC ready");
                return Ok([low, high]);
            }
        }

        self.execute(PcdCommand::Idle)?;
        Err(RfidError::timeout("CRC calculation", budget))
    }

    /// Compute the CRC of `frame` and append it.
    pub(crate) fn append_crc(&mut self, frame: &mut Vec<u8>) -> Result<()> {
        let crc = self.compute_crc(frame)?;
        frame.extend_from_slice(&crc);
        Ok(())
    }

    /// Check that the last two bytes of `frame` are the CRC of the rest.
    pub(crate) fn verify_crc(&mut self, frame: &[u8]) -> Result<bool> {
        let Some(split) = frame.len().checked_sub(2) else {
            return Ok(false);
        };
        let (payload, crc) = frame.split_at(split);
        Ok(self.compute_crc(payload)? == [crc[0], crc[1]])
    }
}

#[cfg(test)]
mod tests {
    use crate::config::RfidConfig;
    use crate::error::RfidError;
    use crate::mock::{SimulatedPcd, crc_a};
    use crate::pcd::Pcd;
    use proptest::prelude::*;

    fn pcd() -> (Pcd<SimulatedPcd>, crate::mock::SimulatedPcdHandle) {
        let (chip, handle) = SimulatedPcd::new();
        let mut pcd = Pcd::new(chip, RfidConfig::for_testing());
        pcd.init().unwrap();
        (pcd, handle)
    }

    #[test]
    fn test_known_vectors() {
        let (mut pcd, _) = pcd();
        // HLTA
        assert_eq!(pcd.compute_crc(&[0x50, 0x00]).unwrap(), [0x57, 0xCD]);
        // READ block 0
        assert_eq!(pcd.compute_crc(&[0x30, 0x00]).unwrap(), [0x02, 0xA8]);
    }

    #[test]
    fn test_verify_crc() {
        let (mut pcd, _) = pcd();
        assert!(pcd.verify_crc(&[0x50, 0x00, 0x57, 0xCD]).unwrap());
        assert!(!pcd.verify_crc(&[0x50, 0x00, 0x57, 0xCE]).unwrap());
        assert!(!pcd.verify_crc(&[0x50]).unwrap());
    }

    #[test]
    fn test_stuck_engine_times_out() {
        let (mut pcd, handle) = pcd();
        handle.stall_crc(true);

        let err = pcd.compute_crc(&[0x30, 0x04]).unwrap_err();
        assert!(matches!(
            err,
            RfidError::Timeout {
                operation: "CRC calculation",
                polls: 8
            }
        ));
    }

    proptest! {
        #[test]
        fn prop_coprocessor_matches_crc_a(data in prop::collection::vec(any::<u8>(), 0..48)) {
            let (mut pcd, _) = pcd();
            prop_assert_eq!(pcd.compute_crc(&data).unwrap(), crc_a(&data));
        }
    }
}
