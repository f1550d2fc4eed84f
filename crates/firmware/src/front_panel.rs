//! Mode button handler
//!
//! Runs on every falling edge of the mode button, preempting the main loop.
//! It never touches the shared bus: it only drives the actuator lines,
//! updates [`ControlState`] and hands power-off to a [`PowerControl`].
//!
//! ```text
//! edge ─→ clear lines ─→ released within 500 ms? ── yes ─→ ignore (short press)
//!                              │ no
//!                   indicator lines high
//!                              │
//!           released within a further 1.5 s? ── yes ─→ next track, raise restart
//!                              │ no
//!        lines low, wait for release ─→ power-off request
//! ```

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use platform::config::{PANEL_LONG_PRESS_POLLS, PANEL_POLL_MS, PANEL_POWER_OFF_POLLS};
use platform::{Actuator, ControlState, LineError, PinState, PowerControl, SharedActuator, INDICATOR_MASK};
use track::TrackId;

/// What a button press did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PanelAction {
    /// Released before the long-press threshold
    Ignored,
    /// Selected a track and raised the restart signal
    Advanced(TrackId),
    /// The card holds neither the next track nor track 1; nothing was
    /// signalled
    NoTrack,
    /// Held to power-off; the request has been handed over
    PowerDown,
}

/// Front-panel state machine.
pub struct FrontPanel<'a, D, P, C> {
    delay: D,
    actuator: &'a SharedActuator<Actuator<P>>,
    control: &'a ControlState,
    power: &'a C,
}

impl<'a, D, P, C> FrontPanel<'a, D, P, C>
where
    D: DelayNs,
    P: OutputPin,
    C: PowerControl,
{
    /// A handler driving `actuator` and signalling through `control`.
    pub fn new(
        delay: D,
        actuator: &'a SharedActuator<Actuator<P>>,
        control: &'a ControlState,
        power: &'a C,
    ) -> Self {
        Self {
            delay,
            actuator,
            control,
            power,
        }
    }

    /// Handle one falling edge of `button` (low = pressed).
    ///
    /// Blocks for as long as the button is held.
    pub fn on_falling_edge<B: InputPin>(&mut self, button: &mut B) -> Result<PanelAction, LineError> {
        self.actuator.with(Actuator::clear)?;

        if !self.held_for(button, PANEL_LONG_PRESS_POLLS) {
            return Ok(PanelAction::Ignored);
        }

        self.actuator.with(|lines| lines.set(INDICATOR_MASK, PinState::High))?;
        let released_early = !self.held_for(button, PANEL_POWER_OFF_POLLS);
        self.actuator.with(|lines| lines.set(INDICATOR_MASK, PinState::Low))?;

        if released_early {
            return Ok(self.advance());
        }

        while is_pressed(button) {
            self.delay.delay_ms(PANEL_POLL_MS);
        }
        #[cfg(feature = "defmt")]
        defmt::info!("panel: power-off");
        self.power.power_down();
        Ok(PanelAction::PowerDown)
    }

    /// Poll `button` across `polls` waits; `true` if it was still down
    /// after the last one.
    fn held_for<B: InputPin>(&mut self, button: &mut B, polls: u32) -> bool {
        for _ in 0..polls {
            if !is_pressed(button) {
                return false;
            }
            self.delay.delay_ms(PANEL_POLL_MS);
        }
        is_pressed(button)
    }

    /// Select the next track on the card, wrapping to track 1.
    fn advance(&self) -> PanelAction {
        let next = match self.control.selected_track().and_then(TrackId::new) {
            Some(current) => current.next().unwrap_or(TrackId::FIRST),
            None => TrackId::FIRST,
        };

        // No catalog yet: the card was not readable at boot. The main loop
        // brings it up before copying, and a missing file fails there.
        if self.control.catalog() == 0 {
            #[cfg(feature = "defmt")]
            defmt::info!("panel: track {} (card not read yet)", next.get());
            self.control.request_track(next.get());
            return PanelAction::Advanced(next);
        }

        let target = if self.on_card(next) { next } else { TrackId::FIRST };

        if self.on_card(target) {
            #[cfg(feature = "defmt")]
            defmt::info!("panel: track {}", target.get());
            self.control.request_track(target.get());
            PanelAction::Advanced(target)
        } else {
            #[cfg(feature = "defmt")]
            defmt::warn!("panel: no track on card");
            self.control.set_selected_track(target.get());
            PanelAction::NoTrack
        }
    }

    fn on_card(&self, track: TrackId) -> bool {
        self.control.catalog_contains(track.get())
    }
}

/// The button is active low; a pin that cannot be read counts as released.
fn is_pressed<B: InputPin>(button: &mut B) -> bool {
    button.is_low().unwrap_or(false)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use platform::mocks::{MockClock, MockLine, MockPowerControl, Recording, ScriptedButton};

    fn press(hold_ms: u64, control: &ControlState) -> (PanelAction, MockPowerControl, Recording) {
        let clock = MockClock::new();
        let rec = Recording::new();
        let actuator = SharedActuator::new(Actuator::<MockLine>::new(rec.lines()).unwrap());
        let power = MockPowerControl::new();
        let mut panel = FrontPanel::new(clock.clone(), &actuator, control, &power);
        let mut button = ScriptedButton::pressed_for(&clock, hold_ms);
        let action = panel.on_falling_edge(&mut button).unwrap();
        (action, power, rec)
    }

    #[test]
    fn edge_clears_the_lines_first() {
        let clock = MockClock::new();
        let rec = Recording::new();
        let actuator = SharedActuator::new(Actuator::new(rec.lines()).unwrap());
        actuator.with(|a| a.latch(0b0111)).unwrap();
        let control = ControlState::new();
        let power = MockPowerControl::new();
        let mut panel = FrontPanel::new(clock.clone(), &actuator, &control, &power);

        let action = panel.on_falling_edge(&mut ScriptedButton::released(&clock)).unwrap();

        assert_eq!(action, PanelAction::Ignored);
        assert_eq!(rec.line_state(), 0);
    }

    #[test]
    fn advance_skips_to_first_when_next_is_missing() {
        let control = ControlState::new();
        control.set_catalog(0b0000_0101);
        control.set_selected_track(1);

        let (action, _, _) = press(900, &control);

        assert_eq!(action, PanelAction::Advanced(TrackId::FIRST));
        assert_eq!(control.selected_track(), Some(1));
        assert!(control.take_restart());
    }

    #[test]
    fn advance_wraps_after_the_last_track() {
        let control = ControlState::new();
        control.set_catalog(0b11_1111_1111);
        control.set_selected_track(10);

        let (action, _, _) = press(700, &control);

        assert_eq!(action, PanelAction::Advanced(TrackId::FIRST));
    }

    #[test]
    fn unread_card_still_requests_the_next_track() {
        let control = ControlState::new();
        control.set_selected_track(3);

        let (action, _, _) = press(900, &control);

        assert_eq!(action, PanelAction::Advanced(TrackId::new(4).unwrap()));
        assert_eq!(control.selected_track(), Some(4));
        assert!(control.take_restart());
    }

    #[test]
    fn card_without_track_one_signals_nothing() {
        let control = ControlState::new();
        control.set_catalog(0b100);

        let (action, _, _) = press(900, &control);

        assert_eq!(action, PanelAction::NoTrack);
        assert!(!control.restart_requested());
    }

    #[test]
    fn power_off_press_drives_the_lines_low() {
        let control = ControlState::new();
        control.set_catalog(0b1);

        let (action, power, rec) = press(2_500, &control);

        assert_eq!(action, PanelAction::PowerDown);
        assert_eq!(power.requests(), 1);
        assert_eq!(rec.line_state(), 0);
        assert!(!control.restart_requested());
    }
}
