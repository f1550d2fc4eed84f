//! Step timer and deadline waits
//!
//! Playback and the feedback tones pace themselves against a free-running
//! counter rather than counted busy loops: each step waits for an absolute
//! deadline, so the work done inside a step does not shift the next one as
//! long as it fits in the period.

/// Free-running, wrapping tick counter.
pub trait StepTimer {
    /// Counter frequency in Hz.
    fn frequency(&self) -> u32;

    /// Current counter value.
    fn now(&self) -> u32;

    /// Spin until the counter reaches `deadline`.
    fn delay_until(&mut self, deadline: u32) {
        while !reached(self.now(), deadline) {
            core::hint::spin_loop();
        }
    }
}

/// Whether `now` is at or past `deadline`, across counter wrap.
///
/// Valid while the two are less than half the counter range apart.
pub const fn reached(now: u32, deadline: u32) -> bool {
    now.wrapping_sub(deadline) < 0x8000_0000
}

/// Fixed-rate sequence of deadlines.
///
/// Spreads the remainder of `frequency / rate` over successive periods so the
/// average rate is exact.
#[derive(Debug, Clone)]
pub struct Cadence {
    next: u32,
    period: u32,
    remainder: u32,
    rate: u32,
    error: u32,
}

impl Cadence {
    /// Start a cadence of `rate_hz` steps on `timer`, first deadline one
    /// period from now.
    pub fn start<T: StepTimer + ?Sized>(timer: &T, rate_hz: u32) -> Self {
        let rate = rate_hz.max(1);
        let frequency = timer.frequency();
        let mut cadence = Self {
            next: timer.now(),
            period: frequency / rate,
            remainder: frequency % rate,
            rate,
            error: 0,
        };
        cadence.advance();
        cadence
    }

    /// Wait for the current deadline, then schedule the next one.
    pub fn wait<T: StepTimer + ?Sized>(&mut self, timer: &mut T) {
        timer.delay_until(self.next);
        self.advance();
    }

    /// Whole ticks per step.
    pub fn period(&self) -> u32 {
        self.period
    }

    /// Deadline of the next step.
    pub fn deadline(&self) -> u32 {
        self.next
    }

    fn advance(&mut self) {
        let mut step = self.period;
        // error < rate and remainder < rate, so the sum cannot overflow.
        self.error = self.error.saturating_add(self.remainder);
        if self.error >= self.rate {
            self.error = self.error.saturating_sub(self.rate);
            step = step.saturating_add(1);
        }
        self.next = self.next.wrapping_add(step);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
mod tests {
    use super::*;
    use crate::mocks::MockClock;

    #[test]
    fn reached_handles_wrap() {
        assert!(reached(5, 5));
        assert!(reached(6, 5));
        assert!(!reached(4, 5));
        assert!(reached(2, u32::MAX - 1));
        assert!(!reached(u32::MAX - 1, 2));
    }

    #[test]
    fn cadence_spreads_remainder() {
        let mut clock = MockClock::with_frequency(100);
        let start = clock.now();
        let mut cadence = Cadence::start(&clock, 30);
        for _ in 0..30 {
            cadence.wait(&mut clock);
        }
        // 30 steps at 30 Hz on a 100 Hz counter take exactly one second.
        assert_eq!(clock.now().wrapping_sub(start), 100);
        assert_eq!(cadence.period(), 3);
    }

    #[test]
    fn cadence_survives_counter_wrap() {
        let mut clock = MockClock::with_frequency(1_000);
        clock.set_ticks(u64::from(u32::MAX - 10));
        let mut cadence = Cadence::start(&clock, 100);
        for _ in 0..5 {
            cadence.wait(&mut clock);
        }
        assert_eq!(clock.now(), 39);
    }

    #[test]
    fn late_step_does_not_shift_later_deadlines() {
        let mut clock = MockClock::with_frequency(1_000);
        let mut cadence = Cadence::start(&clock, 100);
        cadence.wait(&mut clock);
        clock.advance_ticks(15);
        cadence.wait(&mut clock);
        cadence.wait(&mut clock);
        assert_eq!(clock.now(), 30);
    }
}
