//! Hardware Abstraction Layer (HAL) for the animatronic player
//!
//! This crate provides the seams between the device logic (card driver,
//! flash transfer, playback, front panel) and the physical peripherals,
//! enabling development and testing without the board.
//!
//! # Architecture Layers
//!
//! ```text
//! Application Layer (firmware crate: front panel, main loop)
//!         ↓
//! Feature Layers (sdcard, flash, playback, track)
//!         ↓
//! Platform HAL (this crate - bus, outputs, timer, power, shared state)
//!         ↓
//! Hardware Layer (Embassy HAL + PAC)
//! ```
//!
//! # Modules
//!
//! - [`peripheral`] - SPI bus shared by the card and the serial flash
//! - [`gpio`] - Four-line mechanical actuator and its interrupt-safe wrapper
//! - [`audio`] - 8-bit DAC output
//! - [`timer`] - Free-running step timer with deadline waits
//! - [`power`] - Sleep entry and the power-off hand-off
//! - [`storage`] - Sequential file layer (petit-FAT style)
//! - [`control`] - Flags shared between the panel interrupt and the main loop
//! - [`config`] - Device constants
//!
//! # Features
//!
//! - `std`: Host mocks and simulators ([`mocks`])
//! - `hardware`: Physical hardware implementations
//! - `defmt`: Enable defmt logging derives

// ── Lint policy ─────────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)] // no .unwrap() in production code
#![deny(clippy::expect_used)] // no .expect() in production code
#![deny(clippy::panic)] // no panic!() in production code
#![deny(clippy::unreachable)] // no unreachable!() that isn't documented
#![deny(unused_must_use)]
// all Results must be handled
// ────────────────────────────────────────────────────────────────────────────
#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(unsafe_op_in_unsafe_fn)] // unsafe fn body is not implicitly unsafe block
#![warn(clippy::print_stdout)] // prefer defmt over println! in lib code
// Pedantic lints suppressed for this hardware HAL crate:
#![allow(clippy::doc_markdown)] // opcodes and register names in doc comments
#![allow(clippy::must_use_candidate)] // hardware accessors; callers decide
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod audio;
pub mod config;
pub mod control;
pub mod gpio;
pub mod peripheral;
pub mod power;
pub mod storage;
pub mod timer;

#[cfg(any(test, feature = "std"))]
pub mod mocks;

pub use audio::Dac;
pub use control::{CardSession, ControlState};
pub use gpio::{Actuator, ActuatorLine, LineError, PinState, SharedActuator, INDICATOR_MASK};
pub use peripheral::{BusError, Chip, SharedBus, SpiBus, SpiClock};
pub use power::{PowerControl, PowerManager, SleepMode};
pub use storage::Storage;
pub use timer::{Cadence, StepTimer};
