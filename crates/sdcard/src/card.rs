//! Card driver
//!
//! [`SdCard`] holds the bring-up result and a reference to the shared bus.
//! Every public operation borrows the bus, selects the card, and deselects
//! it again before returning, on error paths included. A [`WriteSession`]
//! keeps the bus borrowed until the sector is finalized.

use core::cell::{Cell, RefCell, RefMut};

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus as HalSpiBus;
use platform::config::{
    CARD_DATA_RESPONSE_POLLS, CARD_DATA_TOKEN_POLLS, CARD_GO_IDLE_ATTEMPTS, CARD_INIT_ATTEMPTS,
    CARD_INIT_SPI_HZ, CARD_POWER_UP_IDLE_BYTES, CARD_RESPONSE_POLLS, CARD_WRITE_BUSY_POLLS,
    CARD_WRITE_BUSY_POLL_US, SECTOR_LEN, SPI_HZ,
};
use platform::peripheral::borrow_bus;
use platform::{BusError, Chip, SharedBus, SpiBus, SpiClock, Storage};

use crate::command::{
    frame, Command, APP_CMD, DATA_ACCEPTED, DATA_START, GO_IDLE_STATE, HCS, IF_COND_CHECK,
    OCR_CCS, R1_IDLE, READ_OCR, READ_SINGLE_BLOCK, SD_SEND_OP_COND, SEND_CSD, SEND_IF_COND,
    SEND_OP_COND, SET_BLOCKLEN, WRITE_BLOCK,
};
use crate::{Addressing, CardError, CardInfo, CardKind};

/// `SET_BLOCKLEN` argument.
const BLOCK_LEN_ARG: u32 = 512;

/// SD/MMC card on the shared bus.
pub struct SdCard<'a, SPI, CS, D> {
    bus: &'a SharedBus<SPI, CS>,
    delay: RefCell<D>,
    info: Cell<Option<CardInfo>>,
}

impl<'a, SPI, CS, D> SdCard<'a, SPI, CS, D>
where
    SPI: HalSpiBus<u8>,
    CS: OutputPin,
    D: DelayNs,
{
    /// A driver for the card on `bus`; call [`initialize`](Self::initialize)
    /// before anything else.
    pub fn new(bus: &'a SharedBus<SPI, CS>, delay: D) -> Self {
        Self {
            bus,
            delay: RefCell::new(delay),
            info: Cell::new(None),
        }
    }

    /// Bring-up result, if the card is initialized.
    pub fn info(&self) -> Option<CardInfo> {
        self.info.get()
    }

    fn ready(&self) -> Result<CardInfo, CardError> {
        self.info.get().ok_or(CardError::NoInit)
    }

    /// Read `buf.len()` bytes of `sector` starting at `offset`.
    pub fn read_partial(&self, sector: u32, offset: usize, buf: &mut [u8]) -> Result<(), CardError> {
        let count = buf.len();
        let mut slots = buf.iter_mut();
        self.read_partial_with(sector, offset, count, |byte| {
            if let Some(slot) = slots.next() {
                *slot = byte;
            }
        })
    }

    /// Read `count` bytes of `sector` starting at `offset`, handing each
    /// byte to `sink` as it comes off the bus.
    pub fn read_partial_with(
        &self,
        sector: u32,
        offset: usize,
        count: usize,
        mut sink: impl FnMut(u8),
    ) -> Result<(), CardError> {
        if offset.checked_add(count).map_or(true, |end| end > SECTOR_LEN) {
            return Err(CardError::OutOfRange);
        }
        let address = self.ready()?.address_of(sector)?;
        let mut bus = borrow_bus(self.bus)?;
        let result = read_block(&mut bus, address, offset, count, &mut sink);
        release(&mut bus)?;
        result
    }

    /// Open a single-block write of `sector`.
    ///
    /// The bus stays borrowed until the session is finalized with
    /// [`WriteSession::end_write`] or dropped.
    pub fn begin_write(&self, sector: u32) -> Result<WriteSession<'_, SPI, CS, D>, CardError> {
        let address = self.ready()?.address_of(sector)?;
        let mut bus = borrow_bus(self.bus)?;
        if send_command(&mut bus, WRITE_BLOCK, address)? != 0 {
            release(&mut bus)?;
            return Err(CardError::Io);
        }
        bus.write(&[0xFF, DATA_START])?;
        Ok(WriteSession {
            bus,
            delay: &self.delay,
            remaining: SECTOR_LEN,
            open: true,
        })
    }

    /// Read the 16-byte card-specific data register.
    pub fn read_csd(&self) -> Result<[u8; 16], CardError> {
        self.ready()?;
        let mut bus = borrow_bus(self.bus)?;
        let result = read_register(&mut bus);
        release(&mut bus)?;
        result
    }

    /// Card capacity in 512-byte sectors, from the CSD.
    pub fn num_blocks(&self) -> Result<u32, CardError> {
        let kind = self.ready()?.kind;
        let csd = self.read_csd()?;
        capacity_from_csd(kind, &csd).ok_or(CardError::Io)
    }

    /// Release the file layer and leave the card with an idle bus pattern.
    ///
    /// The card must be initialized again before the next access.
    pub fn idle<S: Storage>(&self, storage: &mut S) -> Result<(), CardError> {
        storage.unmount();
        self.info.set(None);
        let mut bus = borrow_bus(self.bus)?;
        bus.idle_clocks(CARD_POWER_UP_IDLE_BYTES)?;
        Ok(())
    }
}

impl<SPI, CS, D> SdCard<'_, SPI, CS, D>
where
    SPI: HalSpiBus<u8> + SpiClock,
    CS: OutputPin,
    D: DelayNs,
{
    /// Bring the card from power-on to a ready, addressable state.
    ///
    /// Runs at [`CARD_INIT_SPI_HZ`] and leaves the bus at [`SPI_HZ`].
    pub fn initialize(&self) -> Result<CardInfo, CardError> {
        self.info.set(None);
        let mut bus = borrow_bus(self.bus)?;
        bus.set_frequency(CARD_INIT_SPI_HZ);
        let result = bring_up(&mut bus);
        bus.set_frequency(SPI_HZ);
        release(&mut bus)?;

        match result {
            Ok(info) => {
                #[cfg(feature = "defmt")]
                defmt::info!("card ready: {} {}", info.kind, info.addressing);
                self.info.set(Some(info));
                Ok(info)
            }
            Err(err) => {
                #[cfg(feature = "defmt")]
                defmt::warn!("card bring-up failed: {}", err);
                Err(err)
            }
        }
    }
}

/// An open single-block write.
///
/// Payload goes out as it is written; [`end_write`](Self::end_write) pads
/// the rest of the sector with zeros and waits for the card to commit it.
/// Dropping an open session finalizes it the same way and discards the
/// outcome.
pub struct WriteSession<'s, SPI, CS, D>
where
    SPI: HalSpiBus<u8>,
    CS: OutputPin,
    D: DelayNs,
{
    bus: RefMut<'s, SpiBus<SPI, CS>>,
    delay: &'s RefCell<D>,
    remaining: usize,
    open: bool,
}

impl<SPI, CS, D> WriteSession<'_, SPI, CS, D>
where
    SPI: HalSpiBus<u8>,
    CS: OutputPin,
    D: DelayNs,
{
    /// Stream `data` into the sector.
    pub fn write_chunk(&mut self, data: &[u8]) -> Result<(), CardError> {
        let remaining = self
            .remaining
            .checked_sub(data.len())
            .ok_or(CardError::OutOfRange)?;
        self.bus.write(data)?;
        self.remaining = remaining;
        Ok(())
    }

    /// Bytes the sector can still take.
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Pad, commit and release the bus.
    pub fn end_write(mut self) -> Result<(), CardError> {
        self.open = false;
        self.finalize()
    }

    fn finalize(&mut self) -> Result<(), CardError> {
        let padding = self.remaining.saturating_add(2);
        for _ in 0..padding {
            self.bus.exchange(0x00)?;
        }
        self.remaining = 0;
        let result = self.await_commit();
        release(&mut self.bus)?;
        result
    }

    fn await_commit(&mut self) -> Result<(), CardError> {
        let mut response = 0xFF;
        for _ in 0..CARD_DATA_RESPONSE_POLLS {
            response = self.bus.exchange(0xFF)?;
            if response != 0xFF {
                break;
            }
        }
        if response & 0x1F != DATA_ACCEPTED {
            return Err(CardError::Io);
        }
        let mut delay = self.delay.borrow_mut();
        for _ in 0..CARD_WRITE_BUSY_POLLS {
            if self.bus.exchange(0xFF)? == 0xFF {
                return Ok(());
            }
            delay.delay_us(CARD_WRITE_BUSY_POLL_US);
        }
        Err(CardError::Io)
    }
}

impl<SPI, CS, D> Drop for WriteSession<'_, SPI, CS, D>
where
    SPI: HalSpiBus<u8>,
    CS: OutputPin,
    D: DelayNs,
{
    fn drop(&mut self) {
        if self.open {
            self.open = false;
            let _ = self.finalize();
        }
    }
}

fn bring_up<SPI, CS>(bus: &mut SpiBus<SPI, CS>) -> Result<CardInfo, CardError>
where
    SPI: HalSpiBus<u8>,
    CS: OutputPin,
{
    bus.idle_clocks(CARD_POWER_UP_IDLE_BYTES)?;

    let mut idle = false;
    for _ in 0..CARD_GO_IDLE_ATTEMPTS {
        if send_command(bus, GO_IDLE_STATE, 0)? == R1_IDLE {
            idle = true;
            break;
        }
    }
    if !idle {
        return Err(CardError::NoDisk);
    }

    if send_command(bus, SEND_IF_COND, IF_COND_CHECK)? == R1_IDLE {
        let [_, _, voltage, pattern] = read_array::<_, _, 4>(bus)?;
        if voltage != 0x01 || pattern != 0xAA {
            return Err(CardError::NoInit);
        }
        if !poll_ready(bus, SD_SEND_OP_COND, HCS)? || send_command(bus, READ_OCR, 0)? != 0 {
            return Err(CardError::NoInit);
        }
        let [ocr0, _, _, _] = read_array::<_, _, 4>(bus)?;
        let addressing = if ocr0 & OCR_CCS != 0 {
            Addressing::Block
        } else {
            Addressing::Byte
        };
        return Ok(CardInfo {
            kind: CardKind::SdV2,
            addressing,
        });
    }

    let (kind, command) = if send_command(bus, SD_SEND_OP_COND, 0)? <= R1_IDLE {
        (CardKind::SdV1, SD_SEND_OP_COND)
    } else {
        (CardKind::Mmc, SEND_OP_COND)
    };
    if !poll_ready(bus, command, 0)? || send_command(bus, SET_BLOCKLEN, BLOCK_LEN_ARG)? != 0 {
        return Err(CardError::NoInit);
    }
    Ok(CardInfo {
        kind,
        addressing: Addressing::Byte,
    })
}

/// Repeat `command` until the card reports it has left the idle state.
fn poll_ready<SPI, CS>(bus: &mut SpiBus<SPI, CS>, command: Command, arg: u32) -> Result<bool, BusError>
where
    SPI: HalSpiBus<u8>,
    CS: OutputPin,
{
    for _ in 0..CARD_INIT_ATTEMPTS {
        if send_command(bus, command, arg)? == 0 {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Send `command`, prefixed with `APP_CMD` when it is an application
/// command, and return the R1 response (`0xFF` if none arrived).
fn send_command<SPI, CS>(bus: &mut SpiBus<SPI, CS>, command: Command, arg: u32) -> Result<u8, BusError>
where
    SPI: HalSpiBus<u8>,
    CS: OutputPin,
{
    if command.is_app() {
        let r1 = transmit(bus, APP_CMD, 0)?;
        if r1 > R1_IDLE {
            return Ok(r1);
        }
    }
    transmit(bus, command, arg)
}

fn transmit<SPI, CS>(bus: &mut SpiBus<SPI, CS>, command: Command, arg: u32) -> Result<u8, BusError>
where
    SPI: HalSpiBus<u8>,
    CS: OutputPin,
{
    // Re-select with a spare clock on each side so the card drops any
    // previous transaction.
    bus.deselect()?;
    bus.exchange(0xFF)?;
    bus.select(Chip::Card)?;
    bus.exchange(0xFF)?;

    bus.write(&frame(command, arg))?;

    let mut response = 0xFF;
    for _ in 0..CARD_RESPONSE_POLLS {
        response = bus.exchange(0xFF)?;
        if response & 0x80 == 0 {
            break;
        }
    }
    Ok(response)
}

fn read_array<SPI, CS, const N: usize>(bus: &mut SpiBus<SPI, CS>) -> Result<[u8; N], BusError>
where
    SPI: HalSpiBus<u8>,
    CS: OutputPin,
{
    let mut bytes = [0xFF; N];
    for byte in &mut bytes {
        *byte = bus.exchange(0xFF)?;
    }
    Ok(bytes)
}

fn wait_data_token<SPI, CS>(bus: &mut SpiBus<SPI, CS>) -> Result<(), CardError>
where
    SPI: HalSpiBus<u8>,
    CS: OutputPin,
{
    for _ in 0..CARD_DATA_TOKEN_POLLS {
        match bus.exchange(0xFF)? {
            DATA_START => return Ok(()),
            0xFF => {}
            _ => return Err(CardError::Io),
        }
    }
    Err(CardError::Io)
}

fn read_block<SPI, CS>(
    bus: &mut SpiBus<SPI, CS>,
    address: u32,
    offset: usize,
    count: usize,
    sink: &mut impl FnMut(u8),
) -> Result<(), CardError>
where
    SPI: HalSpiBus<u8>,
    CS: OutputPin,
{
    if send_command(bus, READ_SINGLE_BLOCK, address)? != 0 {
        return Err(CardError::Io);
    }
    wait_data_token(bus)?;
    for _ in 0..offset {
        bus.exchange(0xFF)?;
    }
    for _ in 0..count {
        sink(bus.exchange(0xFF)?);
    }
    // Rest of the sector plus the 2-byte CRC.
    let trailing = SECTOR_LEN
        .saturating_sub(offset)
        .saturating_sub(count)
        .saturating_add(2);
    for _ in 0..trailing {
        bus.exchange(0xFF)?;
    }
    Ok(())
}

fn read_register<SPI, CS>(bus: &mut SpiBus<SPI, CS>) -> Result<[u8; 16], CardError>
where
    SPI: HalSpiBus<u8>,
    CS: OutputPin,
{
    if send_command(bus, SEND_CSD, 0)? != 0 {
        return Err(CardError::Io);
    }
    wait_data_token(bus)?;
    let csd = read_array::<_, _, 16>(bus)?;
    read_array::<_, _, 2>(bus)?;
    Ok(csd)
}

/// Deselect and clock one byte so the card releases MISO.
fn release<SPI, CS>(bus: &mut SpiBus<SPI, CS>) -> Result<(), BusError>
where
    SPI: HalSpiBus<u8>,
    CS: OutputPin,
{
    bus.deselect()?;
    bus.exchange(0xFF)?;
    Ok(())
}

/// Sector count encoded in a CSD register.
// Field widths bound every intermediate: shift <= 24, c_size < 2^22.
#[allow(clippy::arithmetic_side_effects)]
pub fn capacity_from_csd(kind: CardKind, csd: &[u8; 16]) -> Option<u32> {
    let [c0, _, _, _, _, c5, c6, c7, c8, c9, c10, ..] = *csd;
    if kind == CardKind::SdV2 && c0 >> 6 == 1 {
        let c_size = (u32::from(c7 & 0x3F) << 16) | (u32::from(c8) << 8) | u32::from(c9);
        return c_size.checked_add(1)?.checked_mul(1024);
    }
    // READ_BL_LEN + C_SIZE_MULT + 2, as a power of two in bytes per C_SIZE unit.
    let shift = u32::from(c5 & 0x0F) + u32::from((c10 & 0x80) >> 7) + u32::from((c9 & 0x03) << 1) + 2;
    let c_size = (u32::from(c6 & 0x03) << 10) | (u32::from(c7) << 2) | u32::from(c8 >> 6);
    let units = c_size.checked_add(1)?;
    if shift >= 9 {
        units.checked_mul(1u32.checked_shl(shift - 9)?)
    } else {
        Some(units >> (9 - shift))
    }
}
