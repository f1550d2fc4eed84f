//! Image geometry checked across the whole length range.
// Integration test file: expect/unwrap/panic are intentional test mechanisms.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    clippy::cast_possible_truncation
)]

use platform::config::{FLASH_BLOCK_LEN, FLASH_CAPACITY};
use proptest::prelude::*;
use track::{erase_blocks_for, HeaderState, Layout, Slot, TrackHeader, SAMPLES_PER_MECH_BYTE};

proptest! {
    /// The erased region covers the image, and one block fewer would not.
    #[test]
    fn erase_blocks_cover_image_tightly(payload_len in 0u32..FLASH_CAPACITY) {
        let image = u64::from(payload_len) + 4;
        let blocks = u64::from(erase_blocks_for(payload_len));
        prop_assert!(blocks * u64::from(FLASH_BLOCK_LEN) >= image);
        prop_assert!((blocks - 1) * u64::from(FLASH_BLOCK_LEN) < image);
    }

    /// Every payload offset is either a group's leading mechanical byte or
    /// an audio sample, and samples are numbered without gaps.
    #[test]
    fn slots_partition_the_payload(samples in 1u32..20_000) {
        let layout = Layout::for_samples(samples);
        let len = layout.payload_len().unwrap();
        let mut next_sample = 0;
        let mut next_mech = 0;
        for offset in 0..len {
            match Layout::slot(offset) {
                Slot::Mechanical(n) => {
                    prop_assert_eq!(n, next_mech);
                    prop_assert_eq!(offset, n * (SAMPLES_PER_MECH_BYTE + 1));
                    next_mech += 1;
                }
                Slot::Audio(n) => {
                    prop_assert_eq!(n, next_sample);
                    next_sample += 1;
                }
            }
        }
        prop_assert_eq!(next_sample, samples);
        prop_assert_eq!(next_mech, layout.mech_bytes());
    }

    /// A header is committed exactly when its high byte is clear.
    #[test]
    fn committed_iff_high_byte_clear(bytes in any::<[u8; 4]>()) {
        let header = TrackHeader::from_bytes(bytes);
        match header.state() {
            HeaderState::Committed(len) => {
                prop_assert_eq!(bytes[3], 0);
                prop_assert_eq!(len, header.payload_len());
            }
            HeaderState::Pending => prop_assert_ne!(bytes[3], 0),
        }
    }
}
