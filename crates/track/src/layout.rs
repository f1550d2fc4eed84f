//! Payload interleave
//!
//! The payload is a sequence of groups, each one mechanical byte followed by
//! up to [`SAMPLES_PER_MECH_BYTE`] audio samples. Only the last group may be
//! short.

use platform::config::WINDOW_STEPS;

/// Audio samples carried per mechanical byte: two playback windows, one per
/// nibble.
pub const SAMPLES_PER_MECH_BYTE: u32 = 2 * WINDOW_STEPS as u32;

const GROUP_LEN: u32 = SAMPLES_PER_MECH_BYTE + 1;

/// What a payload byte is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Slot {
    /// The `n`th mechanical byte.
    Mechanical(u32),
    /// The `n`th audio sample.
    Audio(u32),
}

/// Shape of a payload holding a given number of audio samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Layout {
    samples: u32,
}

impl Layout {
    /// Layout for `samples` audio samples.
    pub const fn for_samples(samples: u32) -> Self {
        Self { samples }
    }

    /// Layout recovered from a payload length, as recorded in the header.
    pub const fn from_payload_len(payload_len: u32) -> Self {
        let groups = payload_len.div_ceil(GROUP_LEN);
        Self {
            samples: payload_len.saturating_sub(groups),
        }
    }

    /// Audio samples in the payload.
    pub const fn samples(self) -> u32 {
        self.samples
    }

    /// Mechanical bytes in the payload.
    pub const fn mech_bytes(self) -> u32 {
        self.samples.div_ceil(SAMPLES_PER_MECH_BYTE)
    }

    /// Payload length in bytes, or `None` if it does not fit a `u32`.
    pub const fn payload_len(self) -> Option<u32> {
        self.samples.checked_add(self.mech_bytes())
    }

    /// Classify the payload byte at `offset`.
    pub const fn slot(offset: u32) -> Slot {
        let group = offset / GROUP_LEN;
        let within = offset % GROUP_LEN;
        if within == 0 {
            Slot::Mechanical(group)
        } else {
            Slot::Audio(
                group
                    .saturating_mul(SAMPLES_PER_MECH_BYTE)
                    .saturating_add(within.saturating_sub(1)),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_is_two_windows() {
        assert_eq!(SAMPLES_PER_MECH_BYTE, 1_492);
    }

    #[test]
    fn payload_counts_one_mech_byte_per_group() {
        assert_eq!(Layout::for_samples(0).payload_len(), Some(0));
        assert_eq!(Layout::for_samples(1).payload_len(), Some(2));
        assert_eq!(Layout::for_samples(1_492).payload_len(), Some(1_493));
        assert_eq!(Layout::for_samples(1_493).payload_len(), Some(1_495));
    }

    #[test]
    fn payload_len_inverts() {
        for samples in [0, 1, 745, 1_491, 1_492, 1_493, 29_840, 1_000_000] {
            let layout = Layout::for_samples(samples);
            let len = layout.payload_len().unwrap_or(0);
            assert_eq!(Layout::from_payload_len(len), layout);
        }
    }

    #[test]
    fn slots_interleave() {
        assert_eq!(Layout::slot(0), Slot::Mechanical(0));
        assert_eq!(Layout::slot(1), Slot::Audio(0));
        assert_eq!(Layout::slot(1_492), Slot::Audio(1_491));
        assert_eq!(Layout::slot(1_493), Slot::Mechanical(1));
        assert_eq!(Layout::slot(1_494), Slot::Audio(1_492));
    }
}
