//! Mechanical actuator outputs
//!
//! Four digital lines move the figure: legs, mouth and the two eyes. Playback
//! latches them a nibble at a time; the front panel uses lines 2 and 3 as
//! "mechanical forward" indicators during a long press, and the transfer
//! pipeline toggles the same pair as a progress indicator.
//!
//! Both the panel interrupt and thread mode drive the lines, so the firmware
//! holds the actuator in a [`SharedActuator`].

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embedded_hal::digital::OutputPin;

/// Pin state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PinState {
    /// High (logic 1)
    High,
    /// Low (logic 0)
    Low,
}

impl From<bool> for PinState {
    fn from(value: bool) -> Self {
        if value {
            Self::High
        } else {
            Self::Low
        }
    }
}

impl From<PinState> for bool {
    fn from(value: PinState) -> Self {
        matches!(value, PinState::High)
    }
}

/// One of the four actuator lines, in nibble bit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ActuatorLine {
    /// Bit 0
    Legs,
    /// Bit 1
    Mouth,
    /// Bit 2
    LeftEye,
    /// Bit 3
    RightEye,
}

impl ActuatorLine {
    /// All lines in bit order.
    pub const ALL: [Self; 4] = [Self::Legs, Self::Mouth, Self::LeftEye, Self::RightEye];

    /// Bit of this line within a nibble.
    pub const fn mask(self) -> u8 {
        match self {
            Self::Legs => 0b0001,
            Self::Mouth => 0b0010,
            Self::LeftEye => 0b0100,
            Self::RightEye => 0b1000,
        }
    }
}

/// Lines 2 and 3, driven during a long press and while a transfer runs.
pub const INDICATOR_MASK: u8 = ActuatorLine::LeftEye.mask() | ActuatorLine::RightEye.mask();

/// A pin refused to change state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LineError;

impl core::fmt::Display for LineError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Actuator line could not be driven")
    }
}

#[cfg(feature = "std")]
impl std::error::Error for LineError {}

/// The four actuator lines with a shadow copy of their state.
pub struct Actuator<P> {
    lines: [P; 4],
    state: u8,
}

impl<P: OutputPin> Actuator<P> {
    /// Take the lines in bit order and drive them all low.
    pub fn new(lines: [P; 4]) -> Result<Self, LineError> {
        let mut actuator = Self { lines, state: 0 };
        actuator.clear()?;
        Ok(actuator)
    }

    /// Drive all four lines from the low nibble of `nibble`.
    pub fn latch(&mut self, nibble: u8) -> Result<(), LineError> {
        for (line, pin) in ActuatorLine::ALL.iter().zip(self.lines.iter_mut()) {
            drive(pin, nibble & line.mask() != 0)?;
        }
        self.state = nibble & 0x0F;
        Ok(())
    }

    /// Drive every line low.
    pub fn clear(&mut self) -> Result<(), LineError> {
        self.latch(0)
    }

    /// Drive the lines in `mask` to `state`, leaving the others alone.
    pub fn set(&mut self, mask: u8, state: PinState) -> Result<(), LineError> {
        let next = match state {
            PinState::High => self.state | mask,
            PinState::Low => self.state & !mask,
        };
        self.latch(next)
    }

    /// Invert the lines in `mask`.
    pub fn toggle(&mut self, mask: u8) -> Result<(), LineError> {
        self.latch(self.state ^ mask)
    }

    /// Current line state as a nibble.
    pub fn state(&self) -> u8 {
        self.state
    }
}

fn drive<P: OutputPin>(pin: &mut P, high: bool) -> Result<(), LineError> {
    if high {
        pin.set_high().map_err(|_| LineError)
    } else {
        pin.set_low().map_err(|_| LineError)
    }
}

/// Actuator shared between the panel interrupt and thread mode.
///
/// `CriticalSectionRawMutex` is required: the panel handler runs in interrupt
/// context and may preempt playback mid-latch.
pub struct SharedActuator<A> {
    inner: Mutex<CriticalSectionRawMutex, RefCell<A>>,
}

impl<A> SharedActuator<A> {
    /// Wrap an actuator.
    pub const fn new(actuator: A) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(actuator)),
        }
    }

    /// Run `f` with exclusive access, interrupts masked.
    pub fn with<R>(&self, f: impl FnOnce(&mut A) -> R) -> R {
        self.inner.lock(|cell| f(&mut cell.borrow_mut()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::mocks::{MockLine, Recording};

    fn actuator(rec: &Recording) -> Actuator<MockLine> {
        Actuator::new(rec.lines()).unwrap()
    }

    #[test]
    fn latch_maps_bits_to_lines() {
        let rec = Recording::new();
        let mut act = actuator(&rec);
        act.latch(0b0101).unwrap();
        assert_eq!(rec.line_state(), 0b0101);
        assert_eq!(act.state(), 0b0101);
    }

    #[test]
    fn latch_ignores_high_nibble() {
        let rec = Recording::new();
        let mut act = actuator(&rec);
        act.latch(0xA5).unwrap();
        assert_eq!(act.state(), 0x05);
    }

    #[test]
    fn set_and_toggle_touch_only_masked_lines() {
        let rec = Recording::new();
        let mut act = actuator(&rec);
        act.latch(ActuatorLine::Legs.mask()).unwrap();
        act.set(INDICATOR_MASK, PinState::High).unwrap();
        assert_eq!(act.state(), 0b1101);
        act.toggle(ActuatorLine::LeftEye.mask()).unwrap();
        assert_eq!(act.state(), 0b1001);
        act.set(INDICATOR_MASK, PinState::Low).unwrap();
        assert_eq!(rec.line_state(), 0b0001);
    }

    #[test]
    fn shared_actuator_grants_exclusive_access() {
        let rec = Recording::new();
        let shared = SharedActuator::new(actuator(&rec));
        shared.with(|a| a.latch(0b1111)).unwrap();
        assert_eq!(shared.with(|a| a.state()), 0b1111);
    }

    #[test]
    fn pin_state_bool_round_trip() {
        assert_eq!(PinState::from(true), PinState::High);
        assert!(!bool::from(PinState::Low));
    }
}
