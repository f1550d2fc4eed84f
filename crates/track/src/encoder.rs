//! Host-side image encoder
//!
//! Builds the bytes `transfer_track` expects to find on the card from
//! unsigned 8-bit samples at the playback rate and a mechanical script.
//!
//! # Script format
//!
//! ```text
//! song.wav
//! 0.5 1.0 1.5
//! 0.25 0.3 0.35 0.4
//!
//! 2.0
//! ```
//!
//! Line 1 names the audio file. Lines 2-5 list toggle times in seconds for
//! legs, mouth, left eye and right eye; an empty or missing line means the
//! line never moves. Every line starts low.

use std::fmt;

use platform::config::{FLASH_CAPACITY, MECH_RATE_HZ};
use platform::ActuatorLine;

use crate::header::{TrackHeader, HEADER_LEN};
use crate::layout::{Layout, SAMPLES_PER_MECH_BYTE};

/// Script parse failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    /// First line (audio file name) absent or blank.
    MissingAudio,
    /// A toggle time on a mechanical line is not a number.
    InvalidTime {
        /// 1-based mechanical line (1 = legs).
        line: usize,
        /// The offending token.
        token: String,
    },
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingAudio => f.write_str("script does not name an audio file"),
            Self::InvalidTime { line, token } => {
                write!(f, "mechanical line {line}: invalid toggle time '{token}'")
            }
        }
    }
}

impl std::error::Error for ScriptError {}

/// Image encoding failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    /// Image would not fit the serial flash.
    TooLarge {
        /// Image length including header.
        image_len: u64,
    },
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooLarge { image_len } => {
                write!(f, "image of {image_len} bytes exceeds {FLASH_CAPACITY} bytes of flash")
            }
        }
    }
}

impl std::error::Error for EncodeError {}

/// Toggle times for the four actuator lines, legs first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MechanicalTimeline {
    toggles: [Vec<f64>; 4],
}

/// A parsed script: audio source plus timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct MechanicalScript {
    /// Audio file named on the first line, relative to the script.
    pub audio: String,
    /// Mechanical toggles.
    pub timeline: MechanicalTimeline,
}

impl MechanicalScript {
    /// Parse script text.
    pub fn parse(text: &str) -> Result<Self, ScriptError> {
        let mut lines = text.lines();
        let audio = lines
            .next()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or(ScriptError::MissingAudio)?
            .to_owned();

        let mut timeline = MechanicalTimeline::default();
        for (index, (slot, line)) in timeline.toggles.iter_mut().zip(lines).enumerate() {
            *slot = line
                .split_whitespace()
                .map(|token| {
                    token.parse::<f64>().map_err(|_| ScriptError::InvalidTime {
                        line: index.saturating_add(1),
                        token: token.to_owned(),
                    })
                })
                .collect::<Result<_, _>>()?;
        }
        Ok(Self { audio, timeline })
    }
}

impl MechanicalTimeline {
    /// Timeline from per-line toggle times in seconds, ascending.
    pub fn new(toggles: [Vec<f64>; 4]) -> Self {
        Self { toggles }
    }

    /// Toggle times for line `index` (0 = legs).
    pub fn toggles(&self, index: usize) -> &[f64] {
        self.toggles.get(index).map_or(&[], Vec::as_slice)
    }

    /// Pack the timeline into `count` mechanical bytes.
    ///
    /// Nibble `k` holds the line states at `k / MECH_RATE_HZ` seconds. Each
    /// line consumes at most one toggle per nibble, so toggles closer than
    /// one nibble apart are spread over successive nibbles.
    pub fn mech_bytes(&self, count: usize) -> Vec<u8> {
        let mut states = 0u8;
        let mut cursors = [0usize; 4];
        let mut nibble_index = 0u32;

        let mut next_nibble = |states: &mut u8| {
            let t = f64::from(nibble_index) / f64::from(MECH_RATE_HZ);
            nibble_index = nibble_index.saturating_add(1);
            for ((times, cursor), line) in self.toggles.iter().zip(cursors.iter_mut()).zip(ActuatorLine::ALL) {
                if times.get(*cursor).is_some_and(|&at| t >= at) {
                    *states ^= line.mask();
                    *cursor = cursor.saturating_add(1);
                }
            }
            *states
        };

        (0..count)
            .map(|_| {
                let low = next_nibble(&mut states);
                let high = next_nibble(&mut states);
                high.wrapping_shl(4) | low
            })
            .collect()
    }
}

/// Map a sample in `[min, max]` onto `0..=255`, rounding to nearest.
pub fn to_unsigned(sample: f64, min: f64, max: f64) -> u8 {
    if max <= min {
        return 0x80;
    }
    let scaled = ((sample - min) / (max - min) * 255.0).round().clamp(0.0, 255.0);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    {
        scaled as u8
    }
}

/// Average interleaved frames of `channels` samples down to mono.
pub fn mixdown(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    #[allow(clippy::cast_precision_loss)]
    let scale = 1.0 / channels as f32;
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() * scale)
        .collect()
}

/// Build a complete image: header, then one mechanical byte ahead of every
/// group of [`SAMPLES_PER_MECH_BYTE`] samples.
pub fn encode_image(samples: &[u8], timeline: &MechanicalTimeline) -> Result<Vec<u8>, EncodeError> {
    let too_large = |image_len: u64| EncodeError::TooLarge { image_len };

    let sample_count = u32::try_from(samples.len()).map_err(|_| too_large(u64::MAX))?;
    let layout = Layout::for_samples(sample_count);
    let payload_len = layout.payload_len().ok_or(too_large(u64::MAX))?;
    let header = TrackHeader::for_payload(payload_len);
    if header.image_len() > u64::from(FLASH_CAPACITY) {
        return Err(too_large(header.image_len()));
    }

    let mech = timeline.mech_bytes(layout.mech_bytes() as usize);
    let mut image = Vec::with_capacity(HEADER_LEN.saturating_add(payload_len as usize));
    image.extend_from_slice(&header.to_bytes());
    for (group, mech_byte) in samples.chunks(SAMPLES_PER_MECH_BYTE as usize).zip(mech) {
        image.push(mech_byte);
        image.extend_from_slice(group);
    }
    Ok(image)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::layout::Slot;

    #[test]
    fn script_parses_empty_and_missing_lines() {
        let script = MechanicalScript::parse("song.wav\n0.5 1.0\n\n0.025").unwrap();
        assert_eq!(script.audio, "song.wav");
        assert_eq!(script.timeline.toggles(0), &[0.5, 1.0]);
        assert!(script.timeline.toggles(1).is_empty());
        assert_eq!(script.timeline.toggles(2), &[0.025]);
        assert!(script.timeline.toggles(3).is_empty());
    }

    #[test]
    fn script_rejects_bad_tokens() {
        assert_eq!(MechanicalScript::parse(""), Err(ScriptError::MissingAudio));
        assert_eq!(
            MechanicalScript::parse("a.wav\n\n1.0 x"),
            Err(ScriptError::InvalidTime { line: 2, token: "x".into() })
        );
    }

    #[test]
    fn nibbles_follow_toggle_times() {
        // Legs up at 0 s, mouth up at 25 ms (second nibble), legs down at 50 ms.
        let timeline = MechanicalTimeline::new([vec![0.0, 0.05], vec![0.025], vec![], vec![]]);
        let bytes = timeline.mech_bytes(2);
        assert_eq!(bytes[0], 0b0011_0001);
        assert_eq!(bytes[1], 0b0010_0010);
    }

    #[test]
    fn close_toggles_spread_over_nibbles() {
        let timeline = MechanicalTimeline::new([vec![], vec![], vec![0.0, 0.001, 0.002], vec![]]);
        let bytes = timeline.mech_bytes(2);
        // On, off, on, then stays on.
        assert_eq!(bytes[0] & 0x44, 0x04);
        assert_eq!(bytes[1] & 0x44, 0x44);
    }

    #[test]
    fn image_interleaves_mech_bytes() {
        let samples: Vec<u8> = (0..3_000u32).map(|i| (i % 251) as u8).collect();
        let timeline = MechanicalTimeline::new([vec![0.0], vec![], vec![], vec![]]);
        let image = encode_image(&samples, &timeline).unwrap();

        let payload_len = u32::from_le_bytes(image[..4].try_into().unwrap());
        assert_eq!(payload_len, 3_000 + 3);
        assert_eq!(image.len(), 4 + 3_003);
        for (offset, &byte) in image[4..].iter().enumerate() {
            match Layout::slot(offset as u32) {
                Slot::Mechanical(_) => assert_eq!(byte & 0x11, 0x11),
                Slot::Audio(n) => assert_eq!(byte, samples[n as usize]),
            }
        }
    }

    #[test]
    fn oversized_image_is_rejected() {
        let samples = vec![0u8; FLASH_CAPACITY as usize];
        assert!(matches!(
            encode_image(&samples, &MechanicalTimeline::default()),
            Err(EncodeError::TooLarge { .. })
        ));
    }

    #[test]
    fn unsigned_mapping_spans_full_range() {
        assert_eq!(to_unsigned(-1.0, -1.0, 1.0), 0);
        assert_eq!(to_unsigned(1.0, -1.0, 1.0), 255);
        assert_eq!(to_unsigned(0.0, -1.0, 1.0), 128);
        assert_eq!(to_unsigned(f64::from(i16::MIN), f64::from(i16::MIN), f64::from(i16::MAX)), 0);
        assert_eq!(to_unsigned(2.0, -1.0, 1.0), 255);
    }

    #[test]
    fn stereo_mixes_to_mean() {
        assert_eq!(mixdown(&[1.0, 0.0, -0.5, -0.5], 2), vec![0.5, -0.5]);
    }
}
