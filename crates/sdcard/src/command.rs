//! Card command set
//!
//! A command is sent as a 6-byte frame: `01` + 6-bit index, a big-endian
//! argument, then a check byte. In SPI mode the card only verifies the check
//! byte on a few commands, so the driver sends a fixed value for the
//! commands it uses at bring-up and a bare stop bit otherwise.

/// A card command; bit 7 marks an application command (`ACMD`) that must
/// be preceded by `APP_CMD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Command(u8);

const APP_FLAG: u8 = 0x80;

impl Command {
    /// Command index (0..=63).
    pub const fn index(self) -> u8 {
        self.0 & 0x3F
    }

    /// Whether this is an application command.
    pub const fn is_app(self) -> bool {
        self.0 & APP_FLAG != 0
    }
}

/// CMD0: reset to idle state
pub const GO_IDLE_STATE: Command = Command(0);
/// CMD1: start initialization (MMC)
pub const SEND_OP_COND: Command = Command(1);
/// CMD8: interface condition (SD v2)
pub const SEND_IF_COND: Command = Command(8);
/// CMD9: read the card-specific data register
pub const SEND_CSD: Command = Command(9);
/// CMD16: set block length
pub const SET_BLOCKLEN: Command = Command(16);
/// CMD17: read one block
pub const READ_SINGLE_BLOCK: Command = Command(17);
/// CMD24: write one block
pub const WRITE_BLOCK: Command = Command(24);
/// CMD55: next command is an application command
pub const APP_CMD: Command = Command(55);
/// CMD58: read the operating-condition register
pub const READ_OCR: Command = Command(58);
/// ACMD41: start initialization (SD)
pub const SD_SEND_OP_COND: Command = Command(APP_FLAG | 41);

/// `SEND_IF_COND` argument: 2.7-3.6 V range and check pattern `0xAA`.
pub const IF_COND_CHECK: u32 = 0x1AA;

/// `SD_SEND_OP_COND` argument bit announcing high-capacity support.
pub const HCS: u32 = 1 << 30;

/// R1: card is in idle state.
pub const R1_IDLE: u8 = 0x01;

/// OCR byte 0: card capacity status (high capacity).
pub const OCR_CCS: u8 = 0x40;

/// Start token of a single-block data packet.
pub const DATA_START: u8 = 0xFE;

/// Data-response status for an accepted write.
pub const DATA_ACCEPTED: u8 = 0x05;

/// Check byte sent with `command`.
pub const fn check_byte(command: Command, arg: u32) -> u8 {
    match command.0 {
        0 => 0x95,
        1 => 0xF9,
        8 => 0x87,
        55 => 0x65,
        58 => 0x6F,
        c if c == SD_SEND_OP_COND.0 => {
            if arg != 0 {
                0x77
            } else {
                0xE5
            }
        }
        _ => 0x01,
    }
}

/// Encode the 6-byte frame for `command`.
pub const fn frame(command: Command, arg: u32) -> [u8; 6] {
    let [a3, a2, a1, a0] = arg.to_be_bytes();
    [
        0x40 | command.index(),
        a3,
        a2,
        a1,
        a0,
        check_byte(command, arg),
    ]
}
