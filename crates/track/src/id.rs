//! Track numbers
//!
//! Tracks are numbered `1..=TRACK_COUNT`. On the card each lives in a file
//! named by one character plus the track extension: digits `1`-`9` for the
//! first nine, `A` for the tenth.

use core::fmt::Write as _;

use heapless::String;
use platform::config::{TRACK_COUNT, TRACK_EXTENSION};

/// File-name buffer: one character, a dot, the extension.
pub type FileName = String<8>;

/// A valid track number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TrackId(u8);

impl TrackId {
    /// Track 1, the default before any selection.
    pub const FIRST: Self = Self(1);

    /// `Some` for `1..=TRACK_COUNT`.
    pub const fn new(number: u8) -> Option<Self> {
        if number >= 1 && number <= TRACK_COUNT {
            Some(Self(number))
        } else {
            None
        }
    }

    /// The track number.
    pub const fn get(self) -> u8 {
        self.0
    }

    /// The following track, or `None` after the last.
    pub const fn next(self) -> Option<Self> {
        Self::new(self.0.saturating_add(1))
    }

    /// Bit of this track in a catalog mask.
    pub const fn catalog_bit(self) -> u16 {
        1u16.wrapping_shl(self.0.saturating_sub(1) as u32)
    }

    /// Character naming this track on the card.
    pub const fn name_char(self) -> char {
        match self.0 {
            1 => '1',
            2 => '2',
            3 => '3',
            4 => '4',
            5 => '5',
            6 => '6',
            7 => '7',
            8 => '8',
            9 => '9',
            _ => 'A',
        }
    }

    /// File name on the card, e.g. `3.ULV`.
    pub fn file_name(self) -> FileName {
        let mut name = FileName::new();
        // Fits: 1 + 1 + 3 characters.
        let _ = write!(name, "{}.{}", self.name_char(), TRACK_EXTENSION);
        name
    }

    /// Every track, in order.
    pub fn all() -> impl Iterator<Item = Self> {
        (1..=TRACK_COUNT).map(Self)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn valid_range() {
        assert_eq!(TrackId::new(0), None);
        assert_eq!(TrackId::new(1), Some(TrackId::FIRST));
        assert!(TrackId::new(10).is_some());
        assert_eq!(TrackId::new(11), None);
    }

    #[test]
    fn file_names() {
        assert_eq!(TrackId::new(3).unwrap().file_name().as_str(), "3.ULV");
        assert_eq!(TrackId::new(9).unwrap().file_name().as_str(), "9.ULV");
        assert_eq!(TrackId::new(10).unwrap().file_name().as_str(), "A.ULV");
    }

    #[test]
    fn next_stops_after_last() {
        assert_eq!(TrackId::FIRST.next(), TrackId::new(2));
        assert_eq!(TrackId::new(10).unwrap().next(), None);
    }

    #[test]
    fn catalog_bits_are_distinct() {
        let mask = TrackId::all().fold(0u16, |acc, id| {
            assert_eq!(acc & id.catalog_bit(), 0);
            acc | id.catalog_bit()
        });
        assert_eq!(mask, 0x03FF);
    }
}
