//! Playback engine: flash image → DAC and actuator lines
//!
//! Streams a committed track image out of serial flash with sample-accurate
//! timing. The image header is checked first; an image whose sentinel was
//! never written is refused.
//!
//! # Modules
//!
//! - [`engine`] - Header check, window sequencing and deadline pacing

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

pub mod engine;

pub use engine::{play_track, read_header, stream, ByteStream};

use flash::FlashError;
use platform::LineError;

/// Playback errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PlaybackError {
    /// The image sentinel is not set: transfer incomplete
    Incomplete,
    /// The restart signal was raised
    Interrupted,
    /// Reading the flash failed
    Flash(FlashError),
    /// An actuator line could not be driven
    Actuator(LineError),
}

impl From<FlashError> for PlaybackError {
    fn from(err: FlashError) -> Self {
        Self::Flash(err)
    }
}

impl From<LineError> for PlaybackError {
    fn from(err: LineError) -> Self {
        Self::Actuator(err)
    }
}

impl From<core::convert::Infallible> for PlaybackError {
    fn from(err: core::convert::Infallible) -> Self {
        match err {}
    }
}

impl core::fmt::Display for PlaybackError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Incomplete => write!(f, "Track image incomplete"),
            Self::Interrupted => write!(f, "Playback interrupted"),
            Self::Flash(err) => write!(f, "Playback flash error: {err}"),
            Self::Actuator(err) => write!(f, "Playback output error: {err}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for PlaybackError {}
