//! Device configuration and constants
//!
//! Central values shared by the card driver, the transfer pipeline, playback
//! and the front panel. Timing bounds here are protocol contracts; change
//! them together with the code that relies on them.

/// The application name
pub const APP_NAME: &str = "Animatronic Player";

/// Application version (synchronized with Cargo.toml)
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

// ── Track catalog ───────────────────────────────────────────────────────────

/// Number of track slots on the card (`1..=TRACK_COUNT`).
pub const TRACK_COUNT: u8 = 10;

/// Extension of track files on the card.
pub const TRACK_EXTENSION: &str = "ULV";

// ── Card ────────────────────────────────────────────────────────────────────

/// Card sector size in bytes.
pub const SECTOR_LEN: usize = 512;

/// Bytes clocked with the card deselected at power-up (80 clocks).
pub const CARD_POWER_UP_IDLE_BYTES: usize = 10;

/// `GO_IDLE_STATE` attempts before the card is reported absent.
pub const CARD_GO_IDLE_ATTEMPTS: u32 = 100;

/// Response polls after each command frame.
pub const CARD_RESPONSE_POLLS: u32 = 10;

/// Operating-condition polls while the card leaves the idle state.
pub const CARD_INIT_ATTEMPTS: u32 = 10_000;

/// Polls for the data-start token of a block read.
pub const CARD_DATA_TOKEN_POLLS: u32 = 40_000;

/// Polls for the data-response token after a block write.
pub const CARD_DATA_RESPONSE_POLLS: u32 = 500;

/// Busy polls after a block write (with [`CARD_WRITE_BUSY_POLL_US`] → 500 ms).
pub const CARD_WRITE_BUSY_POLLS: u32 = 5_000;

/// Delay between busy polls after a block write.
pub const CARD_WRITE_BUSY_POLL_US: u32 = 100;

// ── SPI ─────────────────────────────────────────────────────────────────────

/// Bus clock while the card is brought up.
pub const CARD_INIT_SPI_HZ: u32 = 312_500;

/// Bus clock for normal card and flash traffic.
pub const SPI_HZ: u32 = 5_000_000;

// ── Serial flash ────────────────────────────────────────────────────────────

/// Program page size.
pub const FLASH_PAGE_LEN: usize = 256;

/// Erase block size (the `0xD8` block erase).
pub const FLASH_BLOCK_LEN: u32 = 64 * 1024;

/// Capacity of the fitted part (128 Mbit).
pub const FLASH_CAPACITY: u32 = 16 * 1024 * 1024;

/// Status reads before a busy flash is declared stuck. At the run clock
/// this is several seconds, longer than the worst-case block erase.
pub const FLASH_READY_POLLS: u32 = 2_000_000;

/// Bytes pulled from the card per read during a transfer.
pub const TRANSFER_CHUNK_LEN: usize = 1024;

// ── Playback ────────────────────────────────────────────────────────────────

/// DAC sample rate of track images.
pub const SAMPLE_RATE_HZ: u32 = 29_840;

/// Mechanical nibble rate of track images.
pub const MECH_RATE_HZ: u32 = 40;

/// Playback steps (DAC samples) per mechanical nibble.
pub const WINDOW_STEPS: u16 = 746;

// Window length is derived from the two rates; keep them consistent.
const _: () = assert!(SAMPLE_RATE_HZ / MECH_RATE_HZ == WINDOW_STEPS as u32);

/// DAC code for the output midpoint.
pub const DAC_MID_SCALE: u8 = 0x80;

// ── Front panel ─────────────────────────────────────────────────────────────

/// Mode button poll interval.
pub const PANEL_POLL_MS: u32 = 10;

/// Polls before a press counts as long (500 ms).
pub const PANEL_LONG_PRESS_POLLS: u32 = 50;

/// Further polls after a long press before it becomes power-off (1.5 s).
pub const PANEL_POWER_OFF_POLLS: u32 = 150;

// ── Audible feedback ────────────────────────────────────────────────────────

/// Square-wave periods per beep.
pub const BEEP_PERIODS: u32 = 244;

/// Half period of the beep tone (32 ticks of the 39.0625 kHz timer).
pub const BEEP_HALF_PERIOD_US: u32 = 819;

/// DAC code for the high half of the beep tone.
pub const BEEP_LEVEL: u8 = 0x0F;

/// Silence after each beep.
pub const BEEP_GAP_MS: u32 = 800;

/// Pause between the track beeps and the start of a transfer.
pub const PRE_TRANSFER_PAUSE_MS: u32 = 1_200;

/// DAC soft-start steps from full scale down to mid-scale.
pub const DAC_RAMP_STEPS: u8 = 128;

/// Delay per soft-start step (one 39.0625 kHz timer tick).
pub const DAC_RAMP_STEP_US: u32 = 26;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_matches_rates() {
        assert_eq!(SAMPLE_RATE_HZ / MECH_RATE_HZ, u32::from(WINDOW_STEPS));
    }

    #[test]
    fn chunk_is_whole_pages() {
        assert_eq!(TRANSFER_CHUNK_LEN % FLASH_PAGE_LEN, 0);
    }

    #[test]
    fn panel_thresholds() {
        assert_eq!(PANEL_LONG_PRESS_POLLS * PANEL_POLL_MS, 500);
        assert_eq!(PANEL_POWER_OFF_POLLS * PANEL_POLL_MS, 1_500);
    }
}
