//! Mode button timing against a virtual clock.
// Integration test file: expect/unwrap/panic are intentional test mechanisms.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    clippy::cast_possible_truncation
)]

use firmware::{FrontPanel, PanelAction};
use platform::mocks::{MockClock, MockLine, Recording, ScriptedButton};
use platform::{Actuator, ControlState, SharedActuator};
use proptest::prelude::*;
use track::TrackId;

struct Rig {
    clock: MockClock,
    rec: Recording,
    actuator: SharedActuator<Actuator<MockLine>>,
    control: ControlState,
}

impl Rig {
    fn new(catalog: u16) -> Self {
        let clock = MockClock::new();
        let rec = Recording::new();
        let actuator = SharedActuator::new(Actuator::new(rec.lines()).unwrap());
        let control = ControlState::new();
        control.set_catalog(catalog);
        Self {
            clock,
            rec,
            actuator,
            control,
        }
    }

    /// Press for `hold_ms` with the panel handing power-off to the control state.
    fn press(&self, hold_ms: u64) -> PanelAction {
        let mut panel = FrontPanel::new(self.clock.clone(), &self.actuator, &self.control, &self.control);
        let mut button = ScriptedButton::pressed_for(&self.clock, hold_ms);
        panel.on_falling_edge(&mut button).unwrap()
    }
}

#[test]
fn short_press_changes_nothing() {
    let rig = Rig::new(0b11);
    rig.control.set_selected_track(1);

    assert_eq!(rig.press(400), PanelAction::Ignored);
    assert_eq!(rig.control.selected_track(), Some(1));
    assert!(!rig.control.restart_requested());
    assert!(!rig.control.power_down_requested());
    assert_eq!(rig.rec.line_state(), 0);
}

#[test]
fn long_press_advances_the_track() {
    let rig = Rig::new(0b111);
    rig.control.set_selected_track(1);

    assert_eq!(rig.press(900), PanelAction::Advanced(TrackId::new(2).unwrap()));
    assert_eq!(rig.control.selected_track(), Some(2));
    assert!(rig.control.take_restart());
    assert!(!rig.control.power_down_requested());
}

#[test]
fn first_long_press_selects_track_one() {
    let rig = Rig::new(0b1);

    assert_eq!(rig.press(900), PanelAction::Advanced(TrackId::FIRST));
    assert_eq!(rig.control.selected_track(), Some(1));
}

#[test]
fn two_second_hold_powers_down() {
    let rig = Rig::new(0b11);
    rig.control.set_selected_track(1);

    assert_eq!(rig.press(2_000), PanelAction::PowerDown);
    assert!(rig.control.power_down_requested());
    assert!(rig.control.restart_requested());
    // The track is not advanced on the way out.
    assert_eq!(rig.control.selected_track(), Some(1));
    assert_eq!(rig.rec.line_state(), 0);
}

#[test]
fn power_off_waits_for_release() {
    let rig = Rig::new(0b1);

    rig.press(5_000);

    assert!(rig.clock.elapsed_ms() >= 5_000);
}

#[test]
fn bounce_without_a_press_returns_at_once() {
    let rig = Rig::new(0b1);
    rig.actuator.with(|a| a.latch(0b0011)).unwrap();
    let mut panel = FrontPanel::new(rig.clock.clone(), &rig.actuator, &rig.control, &rig.control);

    let action = panel.on_falling_edge(&mut ScriptedButton::released(&rig.clock)).unwrap();

    assert_eq!(action, PanelAction::Ignored);
    assert_eq!(rig.clock.elapsed_ms(), 0);
    assert_eq!(rig.rec.line_state(), 0);
}

#[test]
fn long_press_threshold_is_five_hundred_ms() {
    for (hold, expected) in [
        (499, PanelAction::Ignored),
        (500, PanelAction::Advanced(TrackId::FIRST)),
        (501, PanelAction::Advanced(TrackId::FIRST)),
    ] {
        let rig = Rig::new(0b1);
        assert_eq!(rig.press(hold), expected, "held {hold} ms");
    }
}

#[test]
fn power_off_threshold_is_two_seconds() {
    for (hold, expected) in [
        (1_999, PanelAction::Advanced(TrackId::FIRST)),
        (2_000, PanelAction::PowerDown),
        (2_001, PanelAction::PowerDown),
    ] {
        let rig = Rig::new(0b1);
        assert_eq!(rig.press(hold), expected, "held {hold} ms");
        assert_eq!(rig.control.power_down_requested(), expected == PanelAction::PowerDown);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn press_length_decides_the_action(hold in 0u64..4_000) {
        let rig = Rig::new(0b11_1111_1111);
        let action = rig.press(hold);

        let expected = if hold < 500 {
            PanelAction::Ignored
        } else if hold < 2_000 {
            PanelAction::Advanced(TrackId::FIRST)
        } else {
            PanelAction::PowerDown
        };
        prop_assert_eq!(action, expected);
        prop_assert_eq!(rig.control.power_down_requested(), expected == PanelAction::PowerDown);
    }
}
