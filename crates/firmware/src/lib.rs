//! Animatronic player firmware
//!
//! Copies a track from the microSD card into serial flash and plays it back
//! to the DAC and the four actuator lines, under control of one mode button.
//!
//! # Architecture
//!
//! ```text
//! main.rs (thread mode: Player loop)      panel task (interrupt executor)
//!         │                                       │
//!         ├── player ── transfer / playback       ├── front_panel
//!         ├── feedback (beeps, soft start)        │
//!         └── fat (embedded-sdmmc) ── sdcard      │
//!                     │                           │
//!              platform::ControlState ◄───────────┘
//! ```
//!
//! # Features
//!
//! - `hardware` - Build for the STM32H7 target (embassy, defmt)
//! - `std` - Enable standard library (host tests)
//!
//! # Building
//!
//! ```bash
//! cargo build --release --target thumbv7em-none-eabihf --features hardware
//! ```

#![cfg_attr(all(not(test), not(feature = "std")), no_std)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(unsafe_op_in_unsafe_fn)]
// unsafe fn body is not implicitly unsafe block
// Logging discipline
#![warn(clippy::print_stdout)] // prefer defmt over println! in lib code
#![warn(clippy::dbg_macro)] // dbg! should not be left in committed code
// Intentional allows for this codebase:
#![allow(clippy::module_name_repetitions)] // common in Rust crates; not a real issue
#![allow(clippy::missing_errors_doc)] // most errors are self-explanatory
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

pub mod fat;
pub mod feedback;
pub mod front_panel;
pub mod player;

#[cfg(feature = "hardware")]
pub mod hardware;

pub use front_panel::{FrontPanel, PanelAction};
pub use player::{Outcome, Player, PlayerError};
