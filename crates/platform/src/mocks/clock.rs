//! Virtual time: a clock that only moves when waited on, and a button
//! scripted against it.

use std::cell::Cell;
use std::convert::Infallible;
use std::rc::Rc;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{ErrorType, InputPin};

use crate::timer::{reached, StepTimer};

const NANOS_PER_SECOND: u128 = 1_000_000_000;

/// Virtual clock implementing [`DelayNs`] and [`StepTimer`].
///
/// Clones share the same time. Delays and deadline waits advance it
/// instantly, so timing-dependent code runs at host speed while every
/// observed timestamp stays exact.
#[derive(Clone)]
pub struct MockClock {
    ticks: Rc<Cell<u64>>,
    frequency: u32,
}

impl MockClock {
    /// A clock ticking once per nanosecond.
    pub fn new() -> Self {
        Self::with_frequency(1_000_000_000)
    }

    /// A clock ticking at `frequency` Hz.
    pub fn with_frequency(frequency: u32) -> Self {
        Self {
            ticks: Rc::new(Cell::new(0)),
            frequency: frequency.max(1),
        }
    }

    /// Ticks since creation, without wrap.
    pub fn ticks(&self) -> u64 {
        self.ticks.get()
    }

    /// Jump to an absolute tick count.
    pub fn set_ticks(&self, ticks: u64) {
        self.ticks.set(ticks);
    }

    /// Move time forward by `ticks`.
    pub fn advance_ticks(&self, ticks: u64) {
        self.ticks.set(self.ticks.get() + ticks);
    }

    /// Elapsed time in nanoseconds.
    pub fn elapsed_ns(&self) -> u64 {
        (u128::from(self.ticks()) * NANOS_PER_SECOND / u128::from(self.frequency)) as u64
    }

    /// Elapsed time in whole milliseconds.
    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ns() / 1_000_000
    }

    /// Convert a tick count of this clock to nanoseconds.
    pub fn ticks_to_ns(&self, ticks: u64) -> u64 {
        (u128::from(ticks) * NANOS_PER_SECOND / u128::from(self.frequency)) as u64
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl DelayNs for MockClock {
    fn delay_ns(&mut self, ns: u32) {
        let ticks = (u128::from(ns) * u128::from(self.frequency)).div_ceil(NANOS_PER_SECOND);
        self.advance_ticks(ticks as u64);
    }
}

impl StepTimer for MockClock {
    fn frequency(&self) -> u32 {
        self.frequency
    }

    fn now(&self) -> u32 {
        self.ticks.get() as u32
    }

    fn delay_until(&mut self, deadline: u32) {
        let now = self.now();
        if !reached(now, deadline) {
            self.advance_ticks(u64::from(deadline.wrapping_sub(now)));
        }
    }
}

/// Mode button that reads low from creation until a scripted release time.
///
/// The press is still seen at exactly `hold_ms`; the button reads high
/// from the first instant after.
pub struct ScriptedButton {
    clock: MockClock,
    script: Script,
}

enum Script {
    HeldUntil(u64),
    Stuck,
    Released,
}

impl ScriptedButton {
    /// Pressed now and released after `hold_ms`.
    pub fn pressed_for(clock: &MockClock, hold_ms: u64) -> Self {
        Self {
            clock: clock.clone(),
            script: Script::HeldUntil(clock.elapsed_ns() + hold_ms * 1_000_000),
        }
    }

    /// Pressed and never released.
    pub fn stuck(clock: &MockClock) -> Self {
        Self {
            clock: clock.clone(),
            script: Script::Stuck,
        }
    }

    /// Never pressed.
    pub fn released(clock: &MockClock) -> Self {
        Self {
            clock: clock.clone(),
            script: Script::Released,
        }
    }
}

impl ErrorType for ScriptedButton {
    type Error = Infallible;
}

impl InputPin for ScriptedButton {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        self.is_low().map(|low| !low)
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(match self.script {
            Script::HeldUntil(release) => self.clock.elapsed_ns() <= release,
            Script::Stuck => true,
            Script::Released => false,
        })
    }
}
