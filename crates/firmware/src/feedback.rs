//! Audible feedback through the DAC
//!
//! The player has no display. Before each transfer it beeps the number of
//! the track it is about to copy, and at power-up it walks the DAC down to
//! mid-scale so the amplifier does not thump.

use embedded_hal::delay::DelayNs;
use platform::config::{
    BEEP_GAP_MS, BEEP_HALF_PERIOD_US, BEEP_LEVEL, BEEP_PERIODS, DAC_RAMP_STEPS, DAC_RAMP_STEP_US,
    PRE_TRANSFER_PAUSE_MS,
};
use platform::{Cadence, ControlState, Dac, StepTimer};
use track::TrackId;

const MICROS_PER_SECOND: u32 = 1_000_000;

// Silence is waited out in slices this long so a restart is seen promptly.
const QUIET_SLICE_MS: u32 = 10;

/// Beep `track.get()` times, then pause before the transfer starts.
///
/// Each beep is [`BEEP_PERIODS`] periods of a `0x00`/[`BEEP_LEVEL`] square
/// wave followed by [`BEEP_GAP_MS`] of silence.
///
/// Returns `false` as soon as `control` raises the restart signal. It is
/// checked after every square-wave period and every 10 ms of silence.
pub fn beep_track_number<D, T>(dac: &mut D, timer: &mut T, track: TrackId, control: &ControlState) -> bool
where
    D: Dac,
    T: StepTimer + DelayNs,
{
    for _ in 0..track.get() {
        let mut cadence = Cadence::start(&*timer, MICROS_PER_SECOND / BEEP_HALF_PERIOD_US);
        for _ in 0..BEEP_PERIODS {
            dac.write(0x00);
            cadence.wait(timer);
            dac.write(BEEP_LEVEL);
            cadence.wait(timer);
            if control.restart_requested() {
                return false;
            }
        }
        if !quiet_for(timer, BEEP_GAP_MS, control) {
            return false;
        }
    }
    quiet_for(timer, PRE_TRANSFER_PAUSE_MS, control)
}

fn quiet_for<T: DelayNs>(timer: &mut T, ms: u32, control: &ControlState) -> bool {
    let mut left = ms;
    while left > 0 {
        if control.restart_requested() {
            return false;
        }
        let slice = left.min(QUIET_SLICE_MS);
        timer.delay_ms(slice);
        left = left.saturating_sub(slice);
    }
    !control.restart_requested()
}

/// Ramp the DAC from full scale down to mid-scale.
pub fn soft_start<D, T>(dac: &mut D, timer: &mut T)
where
    D: Dac,
    T: StepTimer,
{
    let mut cadence = Cadence::start(&*timer, MICROS_PER_SECOND / DAC_RAMP_STEP_US);
    for step in 0..DAC_RAMP_STEPS {
        dac.write(u8::MAX.saturating_sub(step));
        cadence.wait(timer);
    }
}
