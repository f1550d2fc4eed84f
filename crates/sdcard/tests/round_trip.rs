//! Write-then-read round trips against every simulated card generation.
// Integration test file: expect/unwrap/panic are intentional test mechanisms.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    clippy::cast_possible_truncation
)]

use platform::mocks::{sim_bus, MockClock, SimCard, SimCardKind, SimFlash};
use platform::SpiBus;
use proptest::prelude::*;
use sdcard::SdCard;

const KINDS: [SimCardKind; 4] = [
    SimCardKind::Mmc,
    SimCardKind::SdV1,
    SimCardKind::SdV2Standard,
    SimCardKind::SdV2HighCapacity,
];

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Bytes written at `offset` in a sector come back unchanged from a
    /// partial read of the same range, whatever the addressing mode.
    #[test]
    fn partial_range_round_trips(
        kind in proptest::sample::select(KINDS.to_vec()),
        sector in 1u32..2048,
        offset in 0usize..512,
        seed in any::<u8>(),
        len in 1usize..=512,
    ) {
        let count = len.min(512 - offset);
        let payload: Vec<u8> = (0..count).map(|i| seed.wrapping_add(i as u8)).collect();

        let (spi, card_cs, flash_cs, sim) = sim_bus(SimCard::new(kind), SimFlash::new(4096));
        let bus = SpiBus::new(spi, card_cs, flash_cs).unwrap().into_shared();
        let card = SdCard::new(&bus, MockClock::new());
        card.initialize().unwrap();

        let mut session = card.begin_write(sector).unwrap();
        session.write_chunk(&vec![0u8; offset]).unwrap();
        session.write_chunk(&payload).unwrap();
        session.end_write().unwrap();

        let mut back = vec![0u8; count];
        card.read_partial(sector, offset, &mut back).unwrap();
        prop_assert_eq!(back, payload);
        prop_assert!(!sim.card_selected());
        prop_assert!(!sim.contention());
    }
}

#[test]
fn streamed_read_matches_buffered_read() {
    let mut sim_card = SimCard::new(SimCardKind::SdV2HighCapacity);
    let sector: Vec<u8> = (0..512u32).map(|i| (i * 7) as u8).collect();
    sim_card.load(9, &sector);
    let (spi, card_cs, flash_cs, _sim) = sim_bus(sim_card, SimFlash::new(4096));
    let bus = SpiBus::new(spi, card_cs, flash_cs).unwrap().into_shared();
    let card = SdCard::new(&bus, MockClock::new());
    card.initialize().unwrap();

    let mut streamed = Vec::new();
    card.read_partial_with(9, 10, 300, |b| streamed.push(b)).unwrap();
    let mut buffered = vec![0u8; 300];
    card.read_partial(9, 10, &mut buffered).unwrap();
    assert_eq!(streamed, buffered);
    assert_eq!(streamed[..], sector[10..310]);
}
