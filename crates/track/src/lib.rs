//! Track image format
//!
//! A track image is what the transfer pipeline copies from the card into
//! serial flash and what playback streams back out:
//!
//! ```text
//! offset 0   1   2   3          4 ...
//!        ┌───┬───┬───┬────────┬──────────────────────────────────────────┐
//!        │ length (LE, 3 B) │sentinel│ M A A … A (1492×) M A A … A …        │
//!        └───┴───┴───┴────────┴──────────────────────────────────────────┘
//! ```
//!
//! `length` counts the payload bytes (mechanical + audio). Byte 3 is the
//! high byte of the length in the source file; in flash it stays `0xFF`
//! until the transfer has written everything else, so a reader can tell a
//! committed image from a partial one.
//!
//! Each mechanical byte `M` carries two nibbles for the four actuator lines,
//! low nibble first, one playback window (746 samples) apart; 1492 audio
//! samples `A` follow it.
//!
//! # Modules
//!
//! - [`id`] - Track numbers and their file names on the card
//! - [`header`] - Length header, commit sentinel, erase-block math
//! - [`layout`] - Interleave of mechanical and audio bytes
//! - `encoder` - Host-side image builder (`std` feature)

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

#[cfg(feature = "std")]
pub mod encoder;
pub mod header;
pub mod id;
pub mod layout;

pub use header::{erase_blocks_for, HeaderState, TrackHeader, HEADER_LEN, SENTINEL_OFFSET, SENTINEL_PENDING};
pub use id::TrackId;
pub use layout::{Layout, Slot, SAMPLES_PER_MECH_BYTE};
