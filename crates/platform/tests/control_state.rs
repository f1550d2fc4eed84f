//! Shared control state and deadline arithmetic, checked for all inputs.
// Integration test file: expect/unwrap/panic are intentional test mechanisms.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    clippy::cast_possible_truncation
)]

use platform::config::TRACK_COUNT;
use platform::timer::reached;
use platform::ControlState;

proptest::proptest! {
    /// A raised restart always carries the track it was raised for.
    #[test]
    fn restart_carries_requested_track(tracks in proptest::collection::vec(1u8..=TRACK_COUNT, 1..20)) {
        let state = ControlState::new();
        for &track in &tracks {
            state.request_track(track);
        }
        assert!(state.take_restart());
        assert_eq!(state.selected_track(), tracks.last().copied());
        assert!(!state.restart_requested());
    }

    /// The catalog answers exactly the bits that were stored.
    #[test]
    fn catalog_matches_mask(mask in 0u16..(1 << TRACK_COUNT)) {
        let state = ControlState::new();
        state.set_catalog(mask);
        for track in 1..=TRACK_COUNT {
            let expected = mask & (1 << (track - 1)) != 0;
            assert_eq!(state.catalog_contains(track), expected, "track {track}");
        }
    }

    /// A deadline is reached exactly when `now` is at or after it, for any
    /// base value, across wrap.
    #[test]
    fn reached_is_wrap_invariant(base in proptest::num::u32::ANY, ahead in 1u32..(1 << 30)) {
        let deadline = base.wrapping_add(ahead);
        assert!(!reached(base, deadline));
        assert!(reached(deadline, deadline));
        assert!(reached(deadline.wrapping_add(ahead), deadline));
    }
}

#[test]
fn power_down_request_is_sticky() {
    let state = ControlState::new();
    state.request_power_down();
    assert!(state.take_restart());
    assert!(state.power_down_requested());
    assert!(state.power_down_requested());
}
