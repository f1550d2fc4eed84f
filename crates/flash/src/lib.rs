//! Serial NOR flash and the card-to-flash transfer
//!
//! [`NorFlash`] speaks the byte-oriented command set of the 128 Mbit part
//! over the shared bus. [`transfer::transfer_track`] copies one track image
//! from the card into it, erasing ahead of the writes and committing the
//! image with a single trailing sentinel write.
//!
//! # Modules
//!
//! - [`nor`] - Command layer, streaming reader, `embedded_storage` traits
//! - [`transfer`] - Track copy with erase-ahead, page streaming and commit

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
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod nor;
pub mod transfer;

pub use nor::{FlashReader, NorFlash, PageProgram};
pub use transfer::{transfer_track, NoProgress, TransferError, TransferObserver, TransferSession};

use embedded_storage::nor_flash::{NorFlashError, NorFlashErrorKind};
use platform::BusError;

/// Flash errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashError {
    /// The shared bus failed
    Bus(BusError),
    /// The part stayed busy past the poll bound
    Timeout,
    /// Address range outside the part
    OutOfBounds,
    /// Erase range not on block boundaries
    NotAligned,
}

impl From<BusError> for FlashError {
    fn from(err: BusError) -> Self {
        Self::Bus(err)
    }
}

impl core::fmt::Display for FlashError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Bus(err) => write!(f, "Flash bus error: {err}"),
            Self::Timeout => write!(f, "Flash stayed busy"),
            Self::OutOfBounds => write!(f, "Flash address out of bounds"),
            Self::NotAligned => write!(f, "Flash erase range not block aligned"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for FlashError {}

impl NorFlashError for FlashError {
    fn kind(&self) -> NorFlashErrorKind {
        match self {
            Self::OutOfBounds => NorFlashErrorKind::OutOfBounds,
            Self::NotAligned => NorFlashErrorKind::NotAligned,
            Self::Bus(_) | Self::Timeout => NorFlashErrorKind::Other,
        }
    }
}

impl From<NorFlashErrorKind> for FlashError {
    fn from(kind: NorFlashErrorKind) -> Self {
        match kind {
            NorFlashErrorKind::NotAligned => Self::NotAligned,
            _ => Self::OutOfBounds,
        }
    }
}
