//! Recording DAC, actuator lines and power seams.

use std::cell::{Cell, RefCell};
use std::convert::Infallible;
use std::rc::Rc;

use embedded_hal::digital::{ErrorType, OutputPin};

use crate::audio::Dac;
use crate::power::{PowerControl, PowerManager, SleepMode};

use super::MockClock;

#[derive(Default)]
struct Log {
    samples: Vec<u8>,
    sample_ticks: Vec<u64>,
    lines: u8,
    dac_disabled: bool,
    // (samples emitted so far, line state after the change)
    line_history: Vec<(usize, u8)>,
}

/// Shared log of everything written to the DAC and actuator lines.
///
/// Line changes are stamped with the number of DAC samples emitted before
/// them, so a change stamped `n` is in effect from sample `n` onwards.
#[derive(Clone, Default)]
pub struct Recording {
    log: Rc<RefCell<Log>>,
    clock: Option<MockClock>,
}

impl Recording {
    /// A recording without timestamps.
    pub fn new() -> Self {
        Self::default()
    }

    /// A recording that stamps each DAC sample with `clock`'s tick count.
    pub fn with_clock(clock: &MockClock) -> Self {
        Self {
            log: Rc::default(),
            clock: Some(clock.clone()),
        }
    }

    /// A DAC writing into this recording.
    pub fn dac(&self) -> MockDac {
        MockDac {
            recording: self.clone(),
        }
    }

    /// The four actuator lines, in bit order, writing into this recording.
    pub fn lines(&self) -> [MockLine; 4] {
        [0, 1, 2, 3].map(|bit| MockLine {
            recording: self.clone(),
            bit,
        })
    }

    /// Every DAC sample, in order.
    pub fn samples(&self) -> Vec<u8> {
        self.log.borrow().samples.clone()
    }

    /// Clock tick of every DAC sample (empty without a clock).
    pub fn sample_ticks(&self) -> Vec<u64> {
        self.log.borrow().sample_ticks.clone()
    }

    /// Whether the DAC has been disabled.
    pub fn dac_disabled(&self) -> bool {
        self.log.borrow().dac_disabled
    }

    /// Current line state as a nibble.
    pub fn line_state(&self) -> u8 {
        self.log.borrow().lines
    }

    /// Line state in effect while sample `index` was emitted.
    pub fn line_state_at(&self, index: usize) -> u8 {
        self.log
            .borrow()
            .line_history
            .iter()
            .take_while(|(at, _)| *at <= index)
            .last()
            .map_or(0, |(_, state)| *state)
    }

    /// Sample indices at which the line state changed, with the new state.
    pub fn line_changes(&self) -> Vec<(usize, u8)> {
        let log = self.log.borrow();
        // Settled state per sample index: the last write before that sample.
        let mut settled: Vec<(usize, u8)> = Vec::new();
        for &(at, state) in &log.line_history {
            match settled.last_mut() {
                Some(last) if last.0 == at => last.1 = state,
                _ => settled.push((at, state)),
            }
        }
        let mut previous = 0u8;
        settled
            .into_iter()
            .filter(|&(_, state)| {
                let changed = state != previous;
                previous = state;
                changed
            })
            .collect()
    }

    fn push_sample(&self, code: u8) {
        let mut log = self.log.borrow_mut();
        log.samples.push(code);
        if let Some(clock) = &self.clock {
            log.sample_ticks.push(clock.ticks());
        }
    }

    fn drive(&self, bit: u8, high: bool) {
        let mut log = self.log.borrow_mut();
        let mask = 1 << bit;
        log.lines = if high { log.lines | mask } else { log.lines & !mask };
        let entry = (log.samples.len(), log.lines);
        log.line_history.push(entry);
    }
}

/// DAC writing into a [`Recording`].
pub struct MockDac {
    recording: Recording,
}

impl Dac for MockDac {
    fn write(&mut self, code: u8) {
        if !self.recording.dac_disabled() {
            self.recording.push_sample(code);
        }
    }

    fn disable(&mut self) {
        self.recording.log.borrow_mut().dac_disabled = true;
    }
}

/// Actuator line writing into a [`Recording`].
pub struct MockLine {
    recording: Recording,
    bit: u8,
}

impl ErrorType for MockLine {
    type Error = Infallible;
}

impl OutputPin for MockLine {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.recording.drive(self.bit, false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.recording.drive(self.bit, true);
        Ok(())
    }
}

/// Power manager that records sleep requests and returns.
#[derive(Clone, Default)]
pub struct MockPower {
    sleeps: Rc<RefCell<Vec<SleepMode>>>,
}

impl MockPower {
    /// A fresh recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every sleep entered, in order.
    pub fn sleeps(&self) -> Vec<SleepMode> {
        self.sleeps.borrow().clone()
    }
}

impl PowerManager for MockPower {
    fn enter_sleep(&mut self, mode: SleepMode) {
        self.sleeps.borrow_mut().push(mode);
    }
}

/// Power-off hand-off that counts requests.
#[derive(Clone, Default)]
pub struct MockPowerControl {
    requests: Rc<Cell<u32>>,
}

impl MockPowerControl {
    /// A fresh counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of power-down requests.
    pub fn requests(&self) -> u32 {
        self.requests.get()
    }
}

impl PowerControl for MockPowerControl {
    fn power_down(&self) {
        self.requests.set(self.requests.get() + 1);
    }
}
