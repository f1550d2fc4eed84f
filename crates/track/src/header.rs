//! Length header and commit sentinel
//!
//! The first four bytes of an image hold the payload length, little-endian.
//! In flash, byte [`SENTINEL_OFFSET`] reads [`SENTINEL_PENDING`] until the
//! transfer writes it as the very last byte. Images never reach 16 MiB, so
//! the true value of that byte is always `0x00` and anything else means the
//! image is not committed.

use platform::config::FLASH_BLOCK_LEN;

/// Bytes of header ahead of the payload.
pub const HEADER_LEN: usize = 4;

/// Offset of the commit sentinel (the length's high byte).
pub const SENTINEL_OFFSET: usize = 3;

/// Erased-flash value the sentinel holds until commit.
pub const SENTINEL_PENDING: u8 = 0xFF;

/// Decoded image header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TrackHeader {
    bytes: [u8; HEADER_LEN],
}

/// What a header read back from flash says about the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HeaderState {
    /// Committed image with this many payload bytes.
    Committed(u32),
    /// Sentinel not written: transfer incomplete or interrupted.
    Pending,
}

impl TrackHeader {
    /// Header for a payload of `payload_len` bytes.
    pub const fn for_payload(payload_len: u32) -> Self {
        Self {
            bytes: payload_len.to_le_bytes(),
        }
    }

    /// Header from its raw bytes.
    pub const fn from_bytes(bytes: [u8; HEADER_LEN]) -> Self {
        Self { bytes }
    }

    /// Raw bytes, sentinel included.
    pub const fn to_bytes(self) -> [u8; HEADER_LEN] {
        self.bytes
    }

    /// Payload length as recorded, sentinel byte included.
    pub const fn payload_len(self) -> u32 {
        u32::from_le_bytes(self.bytes)
    }

    /// Image length: header plus payload.
    pub const fn image_len(self) -> u64 {
        (self.payload_len() as u64).saturating_add(HEADER_LEN as u64)
    }

    /// True value of the sentinel byte.
    pub const fn sentinel(self) -> u8 {
        self.bytes[SENTINEL_OFFSET]
    }

    /// The same header with the sentinel forced to [`SENTINEL_PENDING`].
    pub const fn pending(self) -> Self {
        let mut bytes = self.bytes;
        bytes[SENTINEL_OFFSET] = SENTINEL_PENDING;
        Self { bytes }
    }

    /// Interpret a header read back from flash.
    pub const fn state(self) -> HeaderState {
        if self.sentinel() == 0 {
            HeaderState::Committed(self.payload_len())
        } else {
            HeaderState::Pending
        }
    }
}

/// Number of 64 KiB erase blocks an image with `payload_len` payload bytes
/// occupies, header included.
pub const fn erase_blocks_for(payload_len: u32) -> u32 {
    let image = (payload_len as u64).saturating_add(HEADER_LEN as u64);
    let blocks = image.div_ceil(FLASH_BLOCK_LEN as u64);
    if blocks > u32::MAX as u64 {
        u32::MAX
    } else {
        #[allow(clippy::cast_possible_truncation)]
        {
            blocks as u32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn erase_count_rounds_up() {
        assert_eq!(erase_blocks_for(65_536 * 3 + 1_000), 4);
        assert_eq!(erase_blocks_for(0), 1);
        assert_eq!(erase_blocks_for(65_536 - 4), 1);
        assert_eq!(erase_blocks_for(65_536 - 3), 2);
        assert_eq!(erase_blocks_for(u32::MAX), 65_537);
    }

    #[test]
    fn pending_masks_only_the_sentinel() {
        let header = TrackHeader::for_payload(0x0012_3456);
        assert_eq!(header.state(), HeaderState::Committed(0x0012_3456));
        let pending = header.pending();
        assert_eq!(pending.to_bytes(), [0x56, 0x34, 0x12, 0xFF]);
        assert_eq!(pending.state(), HeaderState::Pending);
        assert_eq!(header.sentinel(), 0);
    }

    #[test]
    fn any_nonzero_high_byte_is_pending() {
        for high in 1..=u8::MAX {
            let header = TrackHeader::from_bytes([0x10, 0x00, 0x00, high]);
            assert_eq!(header.state(), HeaderState::Pending);
        }
    }

    #[test]
    fn image_len_includes_header() {
        assert_eq!(TrackHeader::for_payload(1_000).image_len(), 1_004);
    }
}
