//! SD/MMC card driver over SPI
//!
//! Brings a card from power-on to an addressable state and moves partial
//! sectors in and out of it over the shared bus. The driver borrows the bus
//! per operation, so the serial flash can be used between card accesses.
//!
//! # Protocol outline
//!
//! ```text
//! 80 idle clocks → CMD0 (idle) → CMD8 0x1AA ─ echo ─→ ACMD41(HCS) → CMD58 → SD v2 (SC/HC)
//!                                            └ reject ─→ ACMD41 / CMD1   → CMD16 512 → SD v1 / MMC
//! ```
//!
//! Standard-capacity cards are byte addressed: every sector number is
//! multiplied by 512 before it goes into a command argument. High-capacity
//! cards take sector numbers directly.
//!
//! # Modules
//!
//! - [`command`] - Command set and 6-byte frame encoding
//! - [`card`] - The driver: bring-up, partial reads, streamed writes, CSD
//! - [`block_device`] - `embedded_sdmmc::BlockDevice` for the FAT layer

// ── Lint policy ─────────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)] // no .unwrap() in production code
#![deny(clippy::expect_used)] // no .expect() in production code
#![deny(clippy::panic)] // no panic!() in production code
#![deny(unused_must_use)]
// all Results must be handled
// ────────────────────────────────────────────────────────────────────────────
#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::doc_markdown)] // command names in doc comments
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod block_device;
pub mod card;
pub mod command;

pub use card::{SdCard, WriteSession};

use platform::BusError;

/// Card generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CardKind {
    /// MultiMediaCard v3
    Mmc,
    /// SD version 1
    SdV1,
    /// SD version 2 (standard or high capacity)
    SdV2,
}

/// How sector numbers map to command arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Addressing {
    /// Argument is a byte address (`sector * 512`)
    Byte,
    /// Argument is the sector number
    Block,
}

/// Result of a successful bring-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CardInfo {
    /// Card generation
    pub kind: CardKind,
    /// Sector addressing mode
    pub addressing: Addressing,
}

impl CardInfo {
    /// Command argument for `sector`.
    pub fn address_of(&self, sector: u32) -> Result<u32, CardError> {
        match self.addressing {
            Addressing::Block => Ok(sector),
            Addressing::Byte => sector.checked_mul(512).ok_or(CardError::OutOfRange),
        }
    }
}

/// Card errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CardError {
    /// No card answered `GO_IDLE_STATE`
    NoDisk,
    /// The card left idle but negotiation failed, or it was never initialized
    NoInit,
    /// A data token, data response or busy wait timed out mid-transfer
    Io,
    /// Offset, count or sector outside the addressable range
    OutOfRange,
    /// The shared bus failed
    Bus(BusError),
}

impl From<BusError> for CardError {
    fn from(err: BusError) -> Self {
        Self::Bus(err)
    }
}

impl core::fmt::Display for CardError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NoDisk => write!(f, "No card present"),
            Self::NoInit => write!(f, "Card initialization failed"),
            Self::Io => write!(f, "Card I/O error"),
            Self::OutOfRange => write!(f, "Card access out of range"),
            Self::Bus(err) => write!(f, "Card bus error: {err}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for CardError {}
