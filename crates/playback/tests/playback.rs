//! Playback timing and refusal rules against the simulated flash.
// Integration test file: expect/unwrap/panic are intentional test mechanisms.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    clippy::cast_possible_truncation
)]

use platform::config::{FLASH_BLOCK_LEN, SAMPLE_RATE_HZ, WINDOW_STEPS};
use platform::mocks::{sim_bus, MockClock, MockCs, MockLine, MockSpi, Recording, SimBus, SimCard, SimFlash};
use platform::{Actuator, ControlState, SharedActuator, SharedBus, SpiBus};
use playback::{play_track, PlaybackError};
use proptest::prelude::*;
use track::encoder::{encode_image, MechanicalTimeline};
use track::{Layout, TrackHeader, SAMPLES_PER_MECH_BYTE};

const WINDOW: usize = WINDOW_STEPS as usize;
const CAPACITY: usize = 2 * FLASH_BLOCK_LEN as usize;

fn rig(contents: &[u8]) -> (SharedBus<MockSpi, MockCs>, SimBus) {
    let (spi, card_cs, flash_cs, sim) = sim_bus(SimCard::absent(), SimFlash::with_contents(CAPACITY, contents));
    (SpiBus::new(spi, card_cs, flash_cs).unwrap().into_shared(), sim)
}

/// Committed image: one mechanical byte, then `samples` audio bytes.
fn image(mech: u8, samples: &[u8]) -> Vec<u8> {
    let payload_len = 1 + samples.len() as u32;
    let mut bytes = TrackHeader::for_payload(payload_len).to_bytes().to_vec();
    bytes.push(mech);
    bytes.extend_from_slice(samples);
    bytes
}

struct Outputs {
    clock: MockClock,
    rec: Recording,
    actuator: SharedActuator<Actuator<MockLine>>,
}

impl Outputs {
    fn new() -> Self {
        let clock = MockClock::new();
        let rec = Recording::with_clock(&clock);
        let actuator = SharedActuator::new(Actuator::new(rec.lines()).unwrap());
        Self { clock, rec, actuator }
    }

    fn play(&self, bus: &SharedBus<MockSpi, MockCs>, control: &ControlState) -> Result<u32, PlaybackError> {
        let flash = flash::NorFlash::with_capacity(bus, CAPACITY as u32);
        play_track(&flash, &mut self.rec.dac(), &self.actuator, &mut self.clock.clone(), control)
    }
}

#[test]
fn low_nibble_latches_first_and_high_one_window_later() {
    let samples: Vec<u8> = (0..2 * WINDOW).map(|i| i as u8).collect();
    let (bus, _sim) = rig(&image(0b1010_0101, &samples));
    let out = Outputs::new();

    let played = out.play(&bus, &ControlState::new()).unwrap();

    assert_eq!(played as usize, 2 * WINDOW);
    assert_eq!(out.rec.samples(), samples);
    assert_eq!(out.rec.line_changes(), vec![(0, 0b0101), (WINDOW, 0b1010)]);
}

#[test]
fn every_step_writes_one_sample_at_an_even_cadence() {
    let timeline = MechanicalTimeline::new([vec![0.0], vec![0.03], vec![], vec![0.05]]);
    let audio: Vec<u8> = (0..SAMPLES_PER_MECH_BYTE * 2 + 10).map(|i| (i % 251) as u8).collect();
    let encoded = encode_image(&audio, &timeline).unwrap();
    let (bus, _sim) = rig(&encoded);
    let out = Outputs::new();

    out.play(&bus, &ControlState::new()).unwrap();

    assert_eq!(out.rec.samples(), audio);
    let ticks = out.rec.sample_ticks();
    let period = u64::from(1_000_000_000 / SAMPLE_RATE_HZ);
    for pair in ticks.windows(2) {
        let delta = pair[1] - pair[0];
        assert!(delta == period || delta == period + 1, "uneven step: {delta}");
    }
}

#[test]
fn mechanical_bytes_never_reach_the_dac() {
    let audio = vec![0x80u8; SAMPLES_PER_MECH_BYTE as usize + 1];
    let timeline = MechanicalTimeline::new([vec![0.0], vec![], vec![], vec![]]);
    let encoded = encode_image(&audio, &timeline).unwrap();
    let layout = Layout::from_payload_len(TrackHeader::from_bytes(encoded[..4].try_into().unwrap()).payload_len());
    assert_eq!(layout.mech_bytes(), 2);
    let (bus, _sim) = rig(&encoded);
    let out = Outputs::new();

    let played = out.play(&bus, &ControlState::new()).unwrap();

    assert_eq!(played as usize, audio.len());
    assert!(out.rec.samples().iter().all(|&s| s == 0x80));
}

#[test]
fn erased_flash_is_refused() {
    let (bus, _sim) = rig(&[]);
    let out = Outputs::new();

    assert_eq!(out.play(&bus, &ControlState::new()), Err(PlaybackError::Incomplete));
    assert!(out.rec.samples().is_empty());
}

#[test]
fn zero_length_image_plays_nothing() {
    let (bus, _sim) = rig(&TrackHeader::for_payload(0).to_bytes());
    let out = Outputs::new();

    assert_eq!(out.play(&bus, &ControlState::new()), Ok(0));
    assert_eq!(out.rec.line_state(), 0);
}

#[test]
fn restart_stops_playback_and_leaves_outputs_alone() {
    let samples = vec![0x40u8; 3 * WINDOW];
    let (bus, _sim) = rig(&image(0b0011_1100, &samples));
    let out = Outputs::new();
    let control = ControlState::new();
    control.request_track(2);

    assert_eq!(out.play(&bus, &control), Err(PlaybackError::Interrupted));
    assert!(out.rec.samples().is_empty());
    assert!(control.restart_requested());
}

#[test]
fn outputs_are_not_cleared_at_the_end() {
    let (bus, _sim) = rig(&image(0b1111_0110, &[1, 2, 3]));
    let out = Outputs::new();

    out.play(&bus, &ControlState::new()).unwrap();

    assert_eq!(out.rec.line_state(), 0b0110);
    assert_eq!(*out.rec.samples().last().unwrap(), 3);
}

#[test]
fn flash_is_released_after_playback() {
    let (bus, sim) = rig(&image(0, &[9; 16]));
    let out = Outputs::new();

    out.play(&bus, &ControlState::new()).unwrap();

    assert!(!sim.flash_selected());
    assert!(!sim.contention());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn uncommitted_images_are_refused(len in 0u32..0x00FF_FFFF, sentinel in 1u8..=0xFF) {
        let mut header = TrackHeader::for_payload(len).to_bytes();
        header[3] = sentinel;
        let (bus, _sim) = rig(&header);
        let out = Outputs::new();

        prop_assert_eq!(out.play(&bus, &ControlState::new()), Err(PlaybackError::Incomplete));
        prop_assert!(out.rec.samples().is_empty());
    }
}
