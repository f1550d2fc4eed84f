//! `embedded_sdmmc::BlockDevice` over the card driver
//!
//! The FAT layer works in whole 512-byte blocks; each block maps onto one
//! partial read or one write session covering the full sector.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus as HalSpiBus;
use embedded_sdmmc::{Block, BlockCount, BlockDevice, BlockIdx};

use crate::{CardError, SdCard};

impl<SPI, CS, D> BlockDevice for &SdCard<'_, SPI, CS, D>
where
    SPI: HalSpiBus<u8>,
    CS: OutputPin,
    D: DelayNs,
{
    type Error = CardError;

    fn read(
        &self,
        blocks: &mut [Block],
        start_block_idx: BlockIdx,
        _reason: &str,
    ) -> Result<(), Self::Error> {
        for (sector, block) in sectors(start_block_idx).zip(blocks.iter_mut()) {
            self.read_partial(sector?, 0, &mut block.contents)?;
        }
        Ok(())
    }

    fn write(&self, blocks: &[Block], start_block_idx: BlockIdx) -> Result<(), Self::Error> {
        for (sector, block) in sectors(start_block_idx).zip(blocks.iter()) {
            let mut session = self.begin_write(sector?)?;
            session.write_chunk(&block.contents)?;
            session.end_write()?;
        }
        Ok(())
    }

    fn num_blocks(&self) -> Result<BlockCount, Self::Error> {
        SdCard::num_blocks(self).map(BlockCount)
    }
}

/// Consecutive sector numbers from `start`, failing past `u32::MAX`.
fn sectors(start: BlockIdx) -> impl Iterator<Item = Result<u32, CardError>> {
    let BlockIdx(first) = start;
    (0u32..).map(move |i| first.checked_add(i).ok_or(CardError::OutOfRange))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use platform::mocks::{sim_bus, MockClock, SimCard, SimCardKind, SimFlash};
    use platform::SpiBus;

    #[test]
    fn whole_blocks_round_trip_through_the_trait() {
        let (spi, card_cs, flash_cs, _sim) =
            sim_bus(SimCard::new(SimCardKind::SdV2HighCapacity).with_blocks(4096), SimFlash::new(4096));
        let bus = SpiBus::new(spi, card_cs, flash_cs).unwrap().into_shared();
        let card = SdCard::new(&bus, MockClock::new());
        card.initialize().unwrap();
        let device = &card;

        let mut out = [Block::new(), Block::new()];
        out[0].contents.fill(0x11);
        out[1].contents.fill(0x22);
        device.write(&out, BlockIdx(40)).unwrap();

        let mut back = [Block::new(), Block::new()];
        device.read(&mut back, BlockIdx(40), "test").unwrap();
        assert_eq!(back[0].contents, [0x11; 512]);
        assert_eq!(back[1].contents, [0x22; 512]);
        assert_eq!(BlockDevice::num_blocks(&device).unwrap(), BlockCount(4096));
    }
}
