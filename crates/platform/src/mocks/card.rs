//! Simulated SD/MMC card in SPI mode.

use std::collections::{BTreeMap, VecDeque};

const BLOCK_LEN: usize = 512;

/// Card generation presented by a [`SimCard`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimCardKind {
    /// MultiMediaCard: answers `SEND_OP_COND`, rejects the app commands
    Mmc,
    /// SD version 1: rejects `SEND_IF_COND`
    SdV1,
    /// SD version 2, standard capacity (byte addressed)
    SdV2Standard,
    /// SD version 2, high capacity (block addressed)
    SdV2HighCapacity,
}

impl SimCardKind {
    fn is_v2(self) -> bool {
        matches!(self, Self::SdV2Standard | Self::SdV2HighCapacity)
    }

    fn block_addressed(self) -> bool {
        matches!(self, Self::SdV2HighCapacity)
    }
}

/// A command frame as received by the card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardCommand {
    /// Command index (0..=63)
    pub index: u8,
    /// Received right after `APP_CMD`
    pub app: bool,
    /// Argument
    pub arg: u32,
    /// Check byte as sent
    pub crc: u8,
}

enum Receive {
    Command,
    WriteData { block: u32, started: bool, buf: Vec<u8> },
}

/// Byte-level simulation of a card on the SPI bus.
pub struct SimCard {
    kind: Option<SimCardKind>,
    blocks: u32,
    data: BTreeMap<u32, Box<[u8; BLOCK_LEN]>>,
    init_polls: u32,
    init_remaining: u32,
    write_busy_bytes: usize,
    powered_clocks: usize,
    idle_clocks: usize,
    in_idle: bool,
    app: bool,
    frame: Vec<u8>,
    tx: VecDeque<u8>,
    receive: Receive,
    log: Vec<CardCommand>,
    fail_reads: bool,
    ignore_write_token: bool,
}

impl SimCard {
    fn build(kind: Option<SimCardKind>) -> Self {
        Self {
            kind,
            blocks: 2048,
            data: BTreeMap::new(),
            init_polls: 3,
            init_remaining: 3,
            write_busy_bytes: 4,
            powered_clocks: 0,
            idle_clocks: 0,
            in_idle: false,
            app: false,
            frame: Vec::new(),
            tx: VecDeque::new(),
            receive: Receive::Command,
            log: Vec::new(),
            fail_reads: false,
            ignore_write_token: false,
        }
    }

    /// A card of generation `kind` with 2048 blank blocks.
    pub fn new(kind: SimCardKind) -> Self {
        Self::build(Some(kind))
    }

    /// An empty slot: nothing ever drives MISO.
    pub fn absent() -> Self {
        Self::build(None)
    }

    /// Set the capacity in blocks (multiple of 1024).
    #[must_use]
    pub fn with_blocks(mut self, blocks: u32) -> Self {
        self.blocks = blocks;
        self
    }

    /// Set how many operating-condition polls the card stays idle for.
    #[must_use]
    pub fn with_init_polls(mut self, polls: u32) -> Self {
        self.init_polls = polls;
        self.init_remaining = polls;
        self
    }

    /// Make block reads never produce a data token.
    pub fn set_fail_reads(&mut self, fail: bool) {
        self.fail_reads = fail;
    }

    /// Make block writes never report a data response.
    pub fn set_ignore_write_token(&mut self, ignore: bool) {
        self.ignore_write_token = ignore;
    }

    /// Store `bytes` starting at block `block`.
    pub fn load(&mut self, block: u32, bytes: &[u8]) {
        for (i, chunk) in bytes.chunks(BLOCK_LEN).enumerate() {
            let mut sector = [0u8; BLOCK_LEN];
            sector[..chunk.len()].copy_from_slice(chunk);
            self.data.insert(block + i as u32, Box::new(sector));
        }
    }

    /// Contents of block `block`.
    pub fn block(&self, block: u32) -> [u8; BLOCK_LEN] {
        self.data.get(&block).map_or([0; BLOCK_LEN], |b| **b)
    }

    /// Every command frame received, in order.
    pub fn commands(&self) -> &[CardCommand] {
        &self.log
    }

    /// Bytes clocked while deselected since the last command.
    pub fn idle_clocks(&self) -> usize {
        self.idle_clocks
    }

    pub(super) fn select(&mut self) {
        self.frame.clear();
    }

    pub(super) fn deselect(&mut self) {
        self.frame.clear();
        self.tx.clear();
        self.receive = Receive::Command;
    }

    pub(super) fn idle_clock(&mut self) {
        self.powered_clocks += 1;
        self.idle_clocks += 1;
    }

    pub(super) fn exchange(&mut self, mosi: u8) -> u8 {
        let Some(kind) = self.kind else {
            return 0xFF;
        };
        let out = self.tx.pop_front().unwrap_or(0xFF);
        match &mut self.receive {
            Receive::Command => {
                if self.frame.is_empty() {
                    if mosi & 0xC0 == 0x40 {
                        self.frame.push(mosi);
                    }
                } else {
                    self.frame.push(mosi);
                    if self.frame.len() == 6 {
                        let frame = std::mem::take(&mut self.frame);
                        self.execute(kind, &frame);
                    }
                }
            }
            Receive::WriteData {
                block,
                started,
                buf,
            } => {
                if !*started {
                    *started = mosi == 0xFE;
                } else {
                    buf.push(mosi);
                    if buf.len() == BLOCK_LEN + 2 {
                        let block = *block;
                        let mut sector = [0u8; BLOCK_LEN];
                        sector.copy_from_slice(&buf[..BLOCK_LEN]);
                        self.receive = Receive::Command;
                        if !self.ignore_write_token {
                            self.data.insert(block, Box::new(sector));
                            self.tx.push_back(0xE5);
                            self.tx.extend(std::iter::repeat(0x00).take(self.write_busy_bytes));
                        }
                    }
                }
            }
        }
        out
    }

    fn respond(&mut self, bytes: &[u8]) {
        self.tx.push_back(0xFF);
        self.tx.extend(bytes.iter().copied());
    }

    fn r1(&self) -> u8 {
        u8::from(self.in_idle)
    }

    fn block_for(&self, kind: SimCardKind, arg: u32) -> Option<u32> {
        let block = if kind.block_addressed() {
            arg
        } else {
            if arg % BLOCK_LEN as u32 != 0 {
                return None;
            }
            arg / BLOCK_LEN as u32
        };
        (block < self.blocks).then_some(block)
    }

    fn execute(&mut self, kind: SimCardKind, frame: &[u8]) {
        let index = frame[0] & 0x3F;
        let arg = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]);
        let crc = frame[5];
        let app = std::mem::take(&mut self.app);
        self.log.push(CardCommand {
            index,
            app,
            arg,
            crc,
        });

        // At least 74 clocks with CS high are required before the first command.
        if self.powered_clocks < 10 {
            return;
        }
        self.idle_clocks = 0;

        match (index, app) {
            (0, _) => {
                if crc != 0x95 {
                    self.respond(&[0x09]);
                    return;
                }
                self.in_idle = true;
                self.init_remaining = self.init_polls;
                self.respond(&[0x01]);
            }
            (8, false) => {
                if !kind.is_v2() {
                    self.respond(&[0x05]);
                } else if crc != 0x87 {
                    self.respond(&[0x09]);
                } else {
                    let [_, _, voltage, pattern] = arg.to_be_bytes();
                    self.respond(&[self.r1(), 0x00, 0x00, voltage & 0x0F, pattern]);
                }
            }
            (55, false) => {
                self.app = true;
                let r1 = self.r1();
                self.respond(&[r1]);
            }
            (41, true) => {
                let stuck = kind.block_addressed() && arg & (1 << 30) == 0;
                if kind == SimCardKind::Mmc {
                    self.respond(&[0x05]);
                } else {
                    self.poll_init(stuck);
                }
            }
            (1, false) => {
                if kind == SimCardKind::Mmc {
                    self.poll_init(false);
                } else {
                    self.respond(&[0x05]);
                }
            }
            (58, false) => {
                let mut ocr0 = if self.in_idle { 0x00 } else { 0x80 };
                if kind.block_addressed() && !self.in_idle {
                    ocr0 |= 0x40;
                }
                let r1 = self.r1();
                self.respond(&[r1, ocr0, 0xFF, 0x80, 0x00]);
            }
            (16, false) => {
                let r1 = self.r1();
                self.respond(&[if arg == BLOCK_LEN as u32 { r1 } else { r1 | 0x40 }]);
            }
            (9, false) => {
                let csd = self.csd(kind);
                let r1 = self.r1();
                self.respond(&[r1, 0xFF, 0xFE]);
                self.tx.extend(csd);
                self.tx.extend([0x00, 0x00]);
            }
            (17, false) if !self.in_idle => match self.block_for(kind, arg) {
                None => self.respond(&[0x20]),
                Some(_) if self.fail_reads => self.respond(&[0x00]),
                Some(block) => {
                    let sector = self.block(block);
                    self.respond(&[0x00, 0xFF, 0xFF, 0xFE]);
                    self.tx.extend(sector);
                    self.tx.extend([0x00, 0x00]);
                }
            },
            (24, false) if !self.in_idle => match self.block_for(kind, arg) {
                None => self.respond(&[0x20]),
                Some(block) => {
                    self.respond(&[0x00]);
                    self.receive = Receive::WriteData {
                        block,
                        started: false,
                        buf: Vec::with_capacity(BLOCK_LEN + 2),
                    };
                }
            },
            _ => {
                let r1 = self.r1();
                self.respond(&[r1 | 0x04]);
            }
        }
    }

    fn poll_init(&mut self, stuck: bool) {
        if !self.in_idle {
            self.respond(&[0x00]);
            return;
        }
        if stuck || self.init_remaining > 0 {
            self.init_remaining = self.init_remaining.saturating_sub(1);
            self.respond(&[0x01]);
            return;
        }
        self.in_idle = false;
        self.respond(&[0x00]);
    }

    fn csd(&self, kind: SimCardKind) -> [u8; 16] {
        let mut csd = [0u8; 16];
        if kind.is_v2() {
            let c_size = self.blocks / 1024 - 1;
            csd[0] = 0x40;
            csd[5] = 0x59;
            csd[7] = ((c_size >> 16) & 0x3F) as u8;
            csd[8] = (c_size >> 8) as u8;
            csd[9] = c_size as u8;
        } else {
            // READ_BL_LEN = 9, C_SIZE_MULT = 7: 512 blocks per C_SIZE unit.
            let c_size = self.blocks / 512 - 1;
            csd[0] = if kind == SimCardKind::Mmc { 0x80 } else { 0x00 };
            csd[5] = 0x59;
            csd[6] = ((c_size >> 10) & 0x03) as u8;
            csd[7] = (c_size >> 2) as u8;
            csd[8] = ((c_size & 0x03) << 6) as u8;
            csd[9] = 0x03;
            csd[10] = 0x80;
        }
        csd
    }
}
