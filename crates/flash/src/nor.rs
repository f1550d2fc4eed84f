//! NOR flash command layer
//!
//! Every operation borrows the shared bus, selects the flash, and leaves it
//! deselected on return. Mutating commands wait for the previous erase or
//! program to finish first, so callers never have to.
//!
//! | Opcode | Command        | Frame                     |
//! |--------|----------------|---------------------------|
//! | `0x06` | write enable   | opcode                    |
//! | `0x05` | read status    | opcode, status…           |
//! | `0xD8` | 64 KiB erase   | opcode, 24-bit address    |
//! | `0x02` | page program   | opcode, address, data…    |
//! | `0x03` | read           | opcode, address, data…    |
//! | `0xB9` | deep sleep     | opcode                    |
//! | `0xAB` | wake           | opcode                    |

use core::cell::RefMut;

use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus as HalSpiBus;
use embedded_storage::nor_flash::{
    check_erase, check_read, check_write, ErrorType, NorFlash as NorFlashStorage, ReadNorFlash,
};
use platform::config::{FLASH_BLOCK_LEN, FLASH_CAPACITY, FLASH_PAGE_LEN, FLASH_READY_POLLS};
use platform::peripheral::borrow_bus;
use platform::{Chip, SharedBus, SpiBus};

use crate::FlashError;

const WRITE_ENABLE: u8 = 0x06;
const READ_STATUS: u8 = 0x05;
const BLOCK_ERASE: u8 = 0xD8;
const PAGE_PROGRAM: u8 = 0x02;
const READ: u8 = 0x03;
const DEEP_SLEEP: u8 = 0xB9;
const WAKE: u8 = 0xAB;

/// Status register: erase or program in progress.
pub const STATUS_BUSY: u8 = 0x01;

#[allow(clippy::cast_possible_truncation)]
const PAGE_LEN: u32 = FLASH_PAGE_LEN as u32;

/// Serial NOR flash on the shared bus.
pub struct NorFlash<'a, SPI, CS> {
    bus: &'a SharedBus<SPI, CS>,
    capacity: u32,
}

impl<'a, SPI, CS> NorFlash<'a, SPI, CS>
where
    SPI: HalSpiBus<u8>,
    CS: OutputPin,
{
    /// The fitted part on `bus`.
    pub fn new(bus: &'a SharedBus<SPI, CS>) -> Self {
        Self::with_capacity(bus, FLASH_CAPACITY)
    }

    /// A part of `capacity` bytes on `bus`.
    pub fn with_capacity(bus: &'a SharedBus<SPI, CS>, capacity: u32) -> Self {
        Self { bus, capacity }
    }

    /// Size in bytes.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// The bus this part hangs off.
    pub fn bus(&self) -> &'a SharedBus<SPI, CS> {
        self.bus
    }

    /// Release the part from deep power-down.
    pub fn wake(&self) -> Result<(), FlashError> {
        self.command(&[WAKE])
    }

    /// Enter deep power-down once any pending operation has finished.
    pub fn deep_sleep(&self) -> Result<(), FlashError> {
        self.wait_ready()?;
        self.command(&[DEEP_SLEEP])
    }

    /// Set the write-enable latch for the next erase or program.
    pub fn write_enable(&self) -> Result<(), FlashError> {
        self.command(&[WRITE_ENABLE])
    }

    /// Read the status register.
    pub fn read_status(&self) -> Result<u8, FlashError> {
        let mut bus = borrow_bus(self.bus)?;
        let mut chip = bus.scoped(Chip::Flash)?;
        chip.write(&[READ_STATUS])?;
        Ok(chip.exchange(0xFF)?)
    }

    /// Poll the status register until no erase or program is in progress.
    pub fn wait_ready(&self) -> Result<(), FlashError> {
        let mut bus = borrow_bus(self.bus)?;
        let mut chip = bus.scoped(Chip::Flash)?;
        chip.write(&[READ_STATUS])?;
        for _ in 0..FLASH_READY_POLLS {
            if chip.exchange(0xFF)? & STATUS_BUSY == 0 {
                return Ok(());
            }
        }
        Err(FlashError::Timeout)
    }

    /// Erase 64 KiB block number `block`.
    ///
    /// Returns as soon as the erase has started.
    pub fn erase_block(&self, block: u32) -> Result<(), FlashError> {
        let base = block
            .checked_mul(FLASH_BLOCK_LEN)
            .filter(|&base| base < self.capacity)
            .ok_or(FlashError::OutOfBounds)?;
        self.wait_ready()?;
        self.write_enable()?;
        self.command(&frame(BLOCK_ERASE, base))
    }

    /// Start a page program at `address`.
    ///
    /// The returned handle accepts bytes up to the end of the page; the part
    /// programs them when the handle is dropped.
    pub fn begin_program(&self, address: u32) -> Result<PageProgram<'a, SPI, CS>, FlashError> {
        if address >= self.capacity {
            return Err(FlashError::OutOfBounds);
        }
        self.wait_ready()?;
        self.write_enable()?;
        let mut bus = borrow_bus(self.bus)?;
        bus.select(Chip::Flash)?;
        if let Err(err) = bus.write(&frame(PAGE_PROGRAM, address)) {
            let _ = bus.deselect();
            return Err(err.into());
        }
        Ok(PageProgram {
            bus,
            remaining: PAGE_LEN.saturating_sub(address % PAGE_LEN),
        })
    }

    /// Program `data` at `address`, split at page boundaries.
    pub fn program(&self, address: u32, data: &[u8]) -> Result<(), FlashError> {
        self.check_range(address, data.len())?;
        let mut address = address;
        let mut rest = data;
        while !rest.is_empty() {
            let mut page = self.begin_program(address)?;
            let (head, tail) = rest.split_at(rest.len().min(page.remaining() as usize));
            page.write(head)?;
            drop(page);
            #[allow(clippy::cast_possible_truncation)]
            {
                address = address.saturating_add(head.len() as u32);
            }
            rest = tail;
        }
        Ok(())
    }

    /// Read `buf.len()` bytes from `address`.
    pub fn read(&self, address: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        self.check_range(address, buf.len())?;
        let mut reader = self.open_reader(address)?;
        for byte in buf.iter_mut() {
            *byte = reader.next_byte()?;
        }
        Ok(())
    }

    /// Start a sequential read at `address`.
    ///
    /// The flash stays selected, and the bus borrowed, until the reader is
    /// dropped.
    pub fn open_reader(&self, address: u32) -> Result<FlashReader<'a, SPI, CS>, FlashError> {
        if address >= self.capacity {
            return Err(FlashError::OutOfBounds);
        }
        self.wait_ready()?;
        let mut bus = borrow_bus(self.bus)?;
        bus.select(Chip::Flash)?;
        if let Err(err) = bus.write(&frame(READ, address)) {
            let _ = bus.deselect();
            return Err(err.into());
        }
        Ok(FlashReader { bus })
    }

    fn command(&self, bytes: &[u8]) -> Result<(), FlashError> {
        let mut bus = borrow_bus(self.bus)?;
        let mut chip = bus.scoped(Chip::Flash)?;
        chip.write(bytes)?;
        Ok(())
    }

    fn check_range(&self, address: u32, len: usize) -> Result<(), FlashError> {
        let len = u32::try_from(len).map_err(|_| FlashError::OutOfBounds)?;
        match address.checked_add(len) {
            Some(end) if end <= self.capacity => Ok(()),
            _ => Err(FlashError::OutOfBounds),
        }
    }
}

/// Opcode followed by a 24-bit big-endian address.
fn frame(opcode: u8, address: u32) -> [u8; 4] {
    let [_, high, mid, low] = address.to_be_bytes();
    [opcode, high, mid, low]
}

/// An open page program.
pub struct PageProgram<'a, SPI, CS>
where
    SPI: HalSpiBus<u8>,
    CS: OutputPin,
{
    bus: RefMut<'a, SpiBus<SPI, CS>>,
    remaining: u32,
}

impl<SPI, CS> PageProgram<'_, SPI, CS>
where
    SPI: HalSpiBus<u8>,
    CS: OutputPin,
{
    /// Bytes left before the page boundary.
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Append one byte.
    pub fn push(&mut self, byte: u8) -> Result<(), FlashError> {
        self.write(&[byte])
    }

    /// Append `data`; it must fit before the page boundary.
    pub fn write(&mut self, data: &[u8]) -> Result<(), FlashError> {
        let len = u32::try_from(data.len()).map_err(|_| FlashError::OutOfBounds)?;
        let remaining = self
            .remaining
            .checked_sub(len)
            .ok_or(FlashError::OutOfBounds)?;
        self.bus.write(data)?;
        self.remaining = remaining;
        Ok(())
    }
}

impl<SPI, CS> Drop for PageProgram<'_, SPI, CS>
where
    SPI: HalSpiBus<u8>,
    CS: OutputPin,
{
    fn drop(&mut self) {
        // Raising chip select starts the program cycle.
        let _ = self.bus.deselect();
    }
}

/// A sequential read in progress.
pub struct FlashReader<'a, SPI, CS>
where
    SPI: HalSpiBus<u8>,
    CS: OutputPin,
{
    bus: RefMut<'a, SpiBus<SPI, CS>>,
}

impl<SPI, CS> FlashReader<'_, SPI, CS>
where
    SPI: HalSpiBus<u8>,
    CS: OutputPin,
{
    /// Clock in the next byte.
    pub fn next_byte(&mut self) -> Result<u8, FlashError> {
        Ok(self.bus.exchange(0xFF)?)
    }
}

impl<SPI, CS> Drop for FlashReader<'_, SPI, CS>
where
    SPI: HalSpiBus<u8>,
    CS: OutputPin,
{
    fn drop(&mut self) {
        let _ = self.bus.deselect();
    }
}

// ── embedded-storage ────────────────────────────────────────────────────────

impl<SPI, CS> ErrorType for NorFlash<'_, SPI, CS>
where
    SPI: HalSpiBus<u8>,
    CS: OutputPin,
{
    type Error = FlashError;
}

impl<SPI, CS> ReadNorFlash for NorFlash<'_, SPI, CS>
where
    SPI: HalSpiBus<u8>,
    CS: OutputPin,
{
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        check_read(self, offset, bytes.len())?;
        NorFlash::read(self, offset, bytes)
    }

    fn capacity(&self) -> usize {
        self.capacity as usize
    }
}

impl<SPI, CS> NorFlashStorage for NorFlash<'_, SPI, CS>
where
    SPI: HalSpiBus<u8>,
    CS: OutputPin,
{
    const WRITE_SIZE: usize = 1;
    const ERASE_SIZE: usize = FLASH_BLOCK_LEN as usize;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        check_erase(self, from, to)?;
        for block in (from / FLASH_BLOCK_LEN)..(to / FLASH_BLOCK_LEN) {
            self.erase_block(block)?;
        }
        self.wait_ready()
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        check_write(self, offset, bytes.len())?;
        self.program(offset, bytes)?;
        self.wait_ready()
    }
}
