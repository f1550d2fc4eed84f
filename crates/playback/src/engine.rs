//! Real-time image streaming
//!
//! One output step per DAC sample, paced by a [`Cadence`] at the image
//! sample rate. Steps are grouped in windows of [`WINDOW_STEPS`]; at the
//! first step of a window the actuator latches a nibble:
//!
//! ```text
//! window 0: read M, latch M & 0x0F ─┐
//! window 1:         latch M >> 4   ─┘ 746 steps later
//! window 2: read M', latch M' & 0x0F …
//! ```
//!
//! Every step fetches its bytes first and only then waits for its deadline,
//! so a step that also latches lines starts its output at the same instant
//! as one that only writes the DAC.

use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus as HalSpiBus;
use flash::{FlashError, FlashReader, NorFlash};
use platform::config::{SAMPLE_RATE_HZ, WINDOW_STEPS};
use platform::{Actuator, Cadence, ControlState, Dac, SharedActuator, StepTimer};
use track::{HeaderState, TrackHeader, HEADER_LEN};

use crate::PlaybackError;

/// Sequential byte source for playback.
pub trait ByteStream {
    /// Error type
    type Error;

    /// The next byte of the image.
    fn next_byte(&mut self) -> Result<u8, Self::Error>;
}

impl<SPI, CS> ByteStream for FlashReader<'_, SPI, CS>
where
    SPI: HalSpiBus<u8>,
    CS: OutputPin,
{
    type Error = FlashError;

    fn next_byte(&mut self) -> Result<u8, FlashError> {
        FlashReader::next_byte(self)
    }
}

/// Read the 4-byte image header.
pub fn read_header<B: ByteStream>(source: &mut B) -> Result<TrackHeader, B::Error> {
    let mut bytes = [0u8; HEADER_LEN];
    for byte in &mut bytes {
        *byte = source.next_byte()?;
    }
    Ok(TrackHeader::from_bytes(bytes))
}

/// Play the image stored at flash address 0.
///
/// Refuses an uncommitted image with [`PlaybackError::Incomplete`]. Returns
/// the number of samples played when the image runs out.
pub fn play_track<SPI, CS, D, P, T>(
    flash: &NorFlash<'_, SPI, CS>,
    dac: &mut D,
    actuator: &SharedActuator<Actuator<P>>,
    timer: &mut T,
    control: &ControlState,
) -> Result<u32, PlaybackError>
where
    SPI: HalSpiBus<u8>,
    CS: OutputPin,
    D: Dac,
    P: OutputPin,
    T: StepTimer,
{
    let mut reader = flash.open_reader(0)?;
    let header = read_header(&mut reader)?;
    let HeaderState::Committed(payload_len) = header.state() else {
        #[cfg(feature = "defmt")]
        defmt::warn!("playback: image not committed");
        return Err(PlaybackError::Incomplete);
    };

    #[cfg(feature = "defmt")]
    defmt::info!("playback: {} bytes", payload_len);

    let result = stream(&mut reader, payload_len, dac, actuator, timer, control);

    #[cfg(feature = "defmt")]
    match &result {
        Ok(samples) => defmt::info!("playback: finished after {} samples", samples),
        Err(err) => defmt::info!("playback: stopped: {}", err),
    }
    result
}

/// Stream `payload_len` payload bytes from `source` to the outputs.
///
/// Stops with [`PlaybackError::Interrupted`] as soon as the restart signal
/// is seen, leaving the outputs as they are.
pub fn stream<B, D, P, T>(
    source: &mut B,
    payload_len: u32,
    dac: &mut D,
    actuator: &SharedActuator<Actuator<P>>,
    timer: &mut T,
    control: &ControlState,
) -> Result<u32, PlaybackError>
where
    B: ByteStream,
    PlaybackError: From<B::Error>,
    D: Dac,
    P: OutputPin,
    T: StepTimer,
{
    let mut remaining = payload_len;
    let mut position: u16 = 0;
    let mut pending_high: Option<u8> = None;
    let mut samples = 0u32;
    let mut cadence = Cadence::start(&*timer, SAMPLE_RATE_HZ);

    while remaining > 0 {
        if control.restart_requested() {
            return Err(PlaybackError::Interrupted);
        }

        let latch = if position == 0 {
            match pending_high.take() {
                Some(high) => Some(high),
                None => {
                    let mech = source.next_byte()?;
                    remaining = remaining.saturating_sub(1);
                    pending_high = Some(mech.wrapping_shr(4));
                    Some(mech & 0x0F)
                }
            }
        } else {
            None
        };
        let sample = if remaining > 0 {
            remaining = remaining.saturating_sub(1);
            Some(source.next_byte()?)
        } else {
            None
        };

        cadence.wait(timer);
        if let Some(nibble) = latch {
            actuator.with(|lines| lines.latch(nibble))?;
        }
        if let Some(code) = sample {
            dac.write(code);
            samples = samples.saturating_add(1);
        }

        position = position.saturating_add(1);
        if position >= WINDOW_STEPS {
            position = 0;
        }
    }
    Ok(samples)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::arithmetic_side_effects)]
mod tests {
    use super::*;
    use core::convert::Infallible;
    use platform::mocks::{MockClock, MockLine, Recording};

    /// Payload bytes from memory; reads past the end see erased flash.
    struct Bytes<'a>(core::slice::Iter<'a, u8>);

    impl ByteStream for Bytes<'_> {
        type Error = Infallible;

        fn next_byte(&mut self) -> Result<u8, Infallible> {
            Ok(self.0.next().copied().unwrap_or(0xFF))
        }
    }

    fn outputs(clock: &MockClock) -> (Recording, SharedActuator<Actuator<MockLine>>) {
        let rec = Recording::with_clock(clock);
        let actuator = SharedActuator::new(Actuator::new(rec.lines()).unwrap());
        (rec, actuator)
    }

    #[test]
    fn header_is_read_little_endian() {
        let data = [0x34, 0x12, 0x00, 0x00, 0x99];
        let header = read_header(&mut Bytes(data.iter())).unwrap();
        assert_eq!(header.state(), HeaderState::Committed(0x1234));
    }

    #[test]
    fn mech_byte_alone_latches_and_plays_nothing() {
        let clock = MockClock::new();
        let (rec, actuator) = outputs(&clock);
        let samples = stream(
            &mut Bytes([0x3C].iter()),
            1,
            &mut rec.dac(),
            &actuator,
            &mut clock.clone(),
            &ControlState::new(),
        )
        .unwrap();
        assert_eq!(samples, 0);
        assert_eq!(rec.line_state(), 0x0C);
    }

    #[test]
    fn empty_payload_plays_nothing() {
        let clock = MockClock::new();
        let (rec, actuator) = outputs(&clock);
        let samples = stream(
            &mut Bytes([].iter()),
            0,
            &mut rec.dac(),
            &actuator,
            &mut clock.clone(),
            &ControlState::new(),
        )
        .unwrap();
        assert_eq!(samples, 0);
        assert!(rec.samples().is_empty());
    }
}
