//! Shared control state
//!
//! The only channel between the front-panel interrupt and the main loop.
//! Every field is a one-word atomic; there is no queue and no lock.
//!
//! # Ordering
//!
//! Writers store the dependent fields (selected track, power-down request)
//! first and the restart flag last with `Release`. Readers consume the flag
//! first with `Acquire` and only then read the fields, so a raised flag
//! always comes with the index it was raised for.

use core::sync::atomic::{AtomicBool, AtomicU16, AtomicU8, Ordering};

use crate::config::TRACK_COUNT;
use crate::power::PowerControl;

/// Card/file-layer session as seen by the main loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CardSession {
    /// Card not brought up
    Uninitialized,
    /// Card initialized and volume mounted
    Mounted,
    /// A track file is open for reading
    FileOpen,
}

impl CardSession {
    const fn to_raw(self) -> u8 {
        match self {
            Self::Uninitialized => 0,
            Self::Mounted => 1,
            Self::FileOpen => 2,
        }
    }

    const fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Mounted,
            2 => Self::FileOpen,
            _ => Self::Uninitialized,
        }
    }
}

/// Flags shared between the panel interrupt and the main loop.
pub struct ControlState {
    selected_track: AtomicU8,
    restart: AtomicBool,
    card_session: AtomicU8,
    catalog: AtomicU16,
    power_down: AtomicBool,
}

impl ControlState {
    /// Fresh state: no track selected, nothing pending.
    pub const fn new() -> Self {
        Self {
            selected_track: AtomicU8::new(0),
            restart: AtomicBool::new(false),
            card_session: AtomicU8::new(CardSession::Uninitialized.to_raw()),
            catalog: AtomicU16::new(0),
            power_down: AtomicBool::new(false),
        }
    }

    /// Select `track` and raise the restart signal.
    pub fn request_track(&self, track: u8) {
        self.selected_track.store(track, Ordering::Relaxed);
        self.restart.store(true, Ordering::Release);
    }

    /// Select `track` without signalling a restart.
    pub fn set_selected_track(&self, track: u8) {
        self.selected_track.store(track, Ordering::Release);
    }

    /// Consume the restart signal, returning whether it was raised.
    pub fn take_restart(&self) -> bool {
        self.restart.swap(false, Ordering::AcqRel)
    }

    /// Poll the restart signal without consuming it.
    pub fn restart_requested(&self) -> bool {
        self.restart.load(Ordering::Acquire)
    }

    /// Selected track (`1..=TRACK_COUNT`), or `None` before the first selection.
    pub fn selected_track(&self) -> Option<u8> {
        match self.selected_track.load(Ordering::Acquire) {
            0 => None,
            track => Some(track),
        }
    }

    /// Record which track files exist on the card, bit `n - 1` for track `n`.
    pub fn set_catalog(&self, mask: u16) {
        self.catalog.store(mask, Ordering::Release);
    }

    /// Recorded catalog bitmask.
    pub fn catalog(&self) -> u16 {
        self.catalog.load(Ordering::Acquire)
    }

    /// Whether track `track` was found on the card.
    pub fn catalog_contains(&self, track: u8) -> bool {
        if track == 0 || track > TRACK_COUNT {
            return false;
        }
        let bit = 1u16.wrapping_shl(u32::from(track.saturating_sub(1)));
        self.catalog() & bit != 0
    }

    /// Record the card/file-layer session state.
    pub fn set_card_session(&self, session: CardSession) {
        self.card_session.store(session.to_raw(), Ordering::Release);
    }

    /// Card/file-layer session state.
    pub fn card_session(&self) -> CardSession {
        CardSession::from_raw(self.card_session.load(Ordering::Acquire))
    }

    /// Ask the main loop to power down; also raises the restart signal so
    /// any running transfer or playback stops.
    pub fn request_power_down(&self) {
        self.power_down.store(true, Ordering::Relaxed);
        self.restart.store(true, Ordering::Release);
    }

    /// Whether a power-down has been requested.
    pub fn power_down_requested(&self) -> bool {
        self.power_down.load(Ordering::Acquire)
    }
}

impl PowerControl for ControlState {
    fn power_down(&self) {
        self.request_power_down();
    }
}

impl Default for ControlState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_nothing_selected() {
        let state = ControlState::new();
        assert_eq!(state.selected_track(), None);
        assert!(!state.restart_requested());
        assert_eq!(state.card_session(), CardSession::Uninitialized);
    }

    #[test]
    fn request_track_raises_restart_once() {
        let state = ControlState::new();
        state.request_track(4);
        assert!(state.restart_requested());
        assert!(state.take_restart());
        assert!(!state.take_restart());
        assert_eq!(state.selected_track(), Some(4));
    }

    #[test]
    fn catalog_bits_map_to_track_numbers() {
        let state = ControlState::new();
        state.set_catalog(0b10_0000_0101);
        assert!(state.catalog_contains(1));
        assert!(!state.catalog_contains(2));
        assert!(state.catalog_contains(3));
        assert!(state.catalog_contains(10));
        assert!(!state.catalog_contains(0));
        assert!(!state.catalog_contains(11));
    }

    #[test]
    fn power_down_also_signals_restart() {
        let state = ControlState::new();
        state.request_power_down();
        assert!(state.power_down_requested());
        assert!(state.take_restart());
    }

    #[test]
    fn power_control_hand_off_goes_through_the_flags() {
        let state = ControlState::new();
        PowerControl::power_down(&state);
        assert!(state.power_down_requested());
        assert!(state.restart_requested());
    }

    #[test]
    fn card_session_round_trips() {
        let state = ControlState::new();
        for session in [CardSession::Mounted, CardSession::FileOpen, CardSession::Uninitialized] {
            state.set_card_session(session);
            assert_eq!(state.card_session(), session);
        }
    }
}
