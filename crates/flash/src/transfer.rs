//! Card-to-flash track transfer
//!
//! ```text
//! open "<n>.ULV"
//! read chunk 0 ─→ parse header, patch sentinel to 0xFF, erase ⌈(L+4)/64K⌉ blocks
//! every chunk  ─→ stream into 256-byte page programs
//! short chunk  ─→ program the true sentinel at offset 3   (commit)
//! ```
//!
//! The restart signal is checked before every erase, every card read and
//! every programmed byte. An interrupted or failed transfer leaves the
//! sentinel at `0xFF`, which playback refuses.

use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus as HalSpiBus;
use platform::config::{FLASH_PAGE_LEN, TRANSFER_CHUNK_LEN};
use platform::{ControlState, Storage};
use track::{erase_blocks_for, TrackHeader, TrackId, HEADER_LEN, SENTINEL_OFFSET, SENTINEL_PENDING};

use crate::nor::PageProgram;
use crate::{FlashError, NorFlash};

#[allow(clippy::cast_possible_truncation)]
const PAGE_LEN: u32 = FLASH_PAGE_LEN as u32;

/// Transfer errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransferError {
    /// The track file could not be opened
    NotFound,
    /// Reading the track file failed
    SourceIo,
    /// The restart signal was raised
    Interrupted,
    /// The file is shorter or longer than its header says
    InvalidHeader,
    /// The image does not fit the flash
    TooLarge,
    /// The flash failed
    Flash(FlashError),
}

impl From<FlashError> for TransferError {
    fn from(err: FlashError) -> Self {
        Self::Flash(err)
    }
}

impl core::fmt::Display for TransferError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "Track file not found"),
            Self::SourceIo => write!(f, "Track file read failed"),
            Self::Interrupted => write!(f, "Transfer interrupted"),
            Self::InvalidHeader => write!(f, "Track length does not match its header"),
            Self::TooLarge => write!(f, "Track does not fit the flash"),
            Self::Flash(err) => write!(f, "Transfer flash error: {err}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for TransferError {}

/// Progress callbacks, used to drive the indicator lines.
pub trait TransferObserver {
    /// The header was accepted; erasing starts.
    fn on_start(&mut self, _header: TrackHeader) {}

    /// Block `block` has been erased.
    fn on_block_erased(&mut self, _block: u32) {}

    /// All blocks are erased; writing starts.
    fn on_erase_complete(&mut self) {}

    /// A chunk of `len` bytes has been programmed.
    fn on_chunk_written(&mut self, _len: usize) {}

    /// The sentinel has been written.
    fn on_commit(&mut self) {}
}

/// Observer that ignores progress.
pub struct NoProgress;

impl TransferObserver for NoProgress {}

/// Bookkeeping for one copy.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransferSession {
    header: Option<TrackHeader>,
    pending_erase_blocks: u32,
    next_page_address: u32,
    page_remaining: u32,
    written: u64,
}

impl Default for TransferSession {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferSession {
    /// A session with nothing received yet.
    pub const fn new() -> Self {
        Self {
            header: None,
            pending_erase_blocks: 0,
            next_page_address: 0,
            page_remaining: 0,
            written: 0,
        }
    }

    /// Header of the image being copied, once the first chunk is in.
    pub fn header(&self) -> Option<TrackHeader> {
        self.header
    }

    /// Erase blocks not yet erased.
    pub fn pending_erase_blocks(&self) -> u32 {
        self.pending_erase_blocks
    }

    /// Start address of the next page to open.
    pub fn next_page_address(&self) -> u32 {
        self.next_page_address
    }

    /// Bytes left in the current page.
    pub fn bytes_remaining_in_current_page(&self) -> u32 {
        self.page_remaining
    }

    /// Image bytes programmed so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Accept the first chunk: parse the header, replace the sentinel with
    /// `0xFF` in `chunk`, and erase the blocks the image will occupy.
    pub fn begin<SPI, CS>(
        &mut self,
        flash: &NorFlash<'_, SPI, CS>,
        chunk: &mut [u8],
        control: &ControlState,
        observer: &mut impl TransferObserver,
    ) -> Result<TrackHeader, TransferError>
    where
        SPI: HalSpiBus<u8>,
        CS: OutputPin,
    {
        let bytes = chunk
            .get(..HEADER_LEN)
            .and_then(|head| <[u8; HEADER_LEN]>::try_from(head).ok())
            .ok_or(TransferError::InvalidHeader)?;
        let header = TrackHeader::from_bytes(bytes);
        if header.image_len() > u64::from(flash.capacity()) {
            return Err(TransferError::TooLarge);
        }
        if let Some(sentinel) = chunk.get_mut(SENTINEL_OFFSET) {
            *sentinel = SENTINEL_PENDING;
        }

        *self = Self::new();
        self.header = Some(header);
        self.pending_erase_blocks = erase_blocks_for(header.payload_len());
        observer.on_start(header);

        #[cfg(feature = "defmt")]
        defmt::info!(
            "transfer: {} bytes, {} blocks",
            header.payload_len(),
            self.pending_erase_blocks
        );

        let mut block = 0;
        while self.pending_erase_blocks > 0 {
            if control.restart_requested() {
                return Err(TransferError::Interrupted);
            }
            flash.erase_block(block)?;
            observer.on_block_erased(block);
            self.pending_erase_blocks = self.pending_erase_blocks.saturating_sub(1);
            block = block.saturating_add(1);
        }
        observer.on_erase_complete();
        Ok(header)
    }

    /// Program `chunk` at the current position.
    pub fn write_chunk<SPI, CS>(
        &mut self,
        flash: &NorFlash<'_, SPI, CS>,
        chunk: &[u8],
        control: &ControlState,
        observer: &mut impl TransferObserver,
    ) -> Result<(), TransferError>
    where
        SPI: HalSpiBus<u8>,
        CS: OutputPin,
    {
        let header = self.header.ok_or(TransferError::InvalidHeader)?;
        let len = u64::try_from(chunk.len()).map_err(|_| TransferError::InvalidHeader)?;
        if self.written.saturating_add(len) > header.image_len() {
            return Err(TransferError::InvalidHeader);
        }

        let mut program: Option<PageProgram<'_, SPI, CS>> = None;
        for &byte in chunk {
            if control.restart_requested() {
                return Err(TransferError::Interrupted);
            }
            if program.is_none() || self.page_remaining == 0 {
                // Close the previous page before the next wait-ready.
                drop(program.take());
                program = Some(self.open_page(flash)?);
            }
            if let Some(page) = program.as_mut() {
                page.push(byte)?;
            }
            self.page_remaining = self.page_remaining.saturating_sub(1);
            self.written = self.written.saturating_add(1);
        }
        drop(program);
        observer.on_chunk_written(chunk.len());
        Ok(())
    }

    /// Write the true sentinel, making the image visible to playback.
    pub fn commit<SPI, CS>(
        &mut self,
        flash: &NorFlash<'_, SPI, CS>,
        observer: &mut impl TransferObserver,
    ) -> Result<(), TransferError>
    where
        SPI: HalSpiBus<u8>,
        CS: OutputPin,
    {
        let header = self.header.ok_or(TransferError::InvalidHeader)?;
        if self.written != header.image_len() {
            return Err(TransferError::InvalidHeader);
        }
        #[allow(clippy::cast_possible_truncation)]
        flash.program(SENTINEL_OFFSET as u32, &[header.sentinel()])?;
        flash.wait_ready()?;
        observer.on_commit();

        #[cfg(feature = "defmt")]
        defmt::info!("transfer committed");
        Ok(())
    }

    fn open_page<'a, SPI, CS>(
        &mut self,
        flash: &NorFlash<'a, SPI, CS>,
    ) -> Result<PageProgram<'a, SPI, CS>, FlashError>
    where
        SPI: HalSpiBus<u8>,
        CS: OutputPin,
    {
        if self.page_remaining == 0 {
            // Crossed into a fresh page.
            let page = flash.begin_program(self.next_page_address)?;
            self.next_page_address = self.next_page_address.saturating_add(PAGE_LEN);
            self.page_remaining = PAGE_LEN;
            Ok(page)
        } else {
            // Resuming a page left open at a chunk boundary.
            let address = self.next_page_address.saturating_sub(self.page_remaining);
            flash.begin_program(address)
        }
    }
}

/// Copy track `track` from the card into flash and commit it.
///
/// `storage` must already be mounted. Returns the committed header.
pub fn transfer_track<SPI, CS, S>(
    flash: &NorFlash<'_, SPI, CS>,
    storage: &mut S,
    track: TrackId,
    control: &ControlState,
    observer: &mut impl TransferObserver,
) -> Result<TrackHeader, TransferError>
where
    SPI: HalSpiBus<u8>,
    CS: OutputPin,
    S: Storage,
{
    storage
        .open(track.file_name().as_str())
        .map_err(|_| TransferError::NotFound)?;

    let mut session = TransferSession::new();
    #[allow(clippy::large_stack_arrays)]
    let mut chunk = [0u8; TRANSFER_CHUNK_LEN];
    loop {
        if control.restart_requested() {
            return Err(TransferError::Interrupted);
        }
        let count = storage.read(&mut chunk).map_err(|_| TransferError::SourceIo)?;
        let data = chunk.get_mut(..count).ok_or(TransferError::SourceIo)?;
        if session.header().is_none() {
            session.begin(flash, data, control, observer)?;
        }
        session.write_chunk(flash, data, control, observer)?;
        if count < TRANSFER_CHUNK_LEN {
            break;
        }
    }
    session.commit(flash, observer)?;
    session.header().ok_or(TransferError::InvalidHeader)
}
