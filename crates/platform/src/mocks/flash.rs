//! Simulated SPI NOR flash.

const PAGE_LEN: usize = 256;
const BLOCK_LEN: usize = 64 * 1024;

/// A command executed by the simulated flash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashOp {
    /// `0x06`
    WriteEnable,
    /// `0xD8` with the block base address
    BlockErase(u32),
    /// `0x02` with start address and data length
    PageProgram {
        /// Start address
        address: u32,
        /// Bytes programmed
        len: usize,
    },
    /// `0x03` from address
    Read(u32),
    /// `0xB9`
    DeepSleep,
    /// `0xAB`
    Wake,
}

/// Byte-level simulation of a NOR flash on the SPI bus.
///
/// Erase sets bytes to `0xFF`; program can only clear bits. Commands that
/// arrive while the part is busy, asleep, or without the write-enable latch
/// are ignored and recorded as violations.
pub struct SimFlash {
    memory: Vec<u8>,
    write_enabled: bool,
    busy_polls: u32,
    erase_busy_polls: u32,
    program_busy_polls: u32,
    asleep: bool,
    command: Vec<u8>,
    ops: Vec<FlashOp>,
    violations: Vec<&'static str>,
}

impl SimFlash {
    /// An erased part of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            memory: vec![0xFF; capacity],
            write_enabled: false,
            busy_polls: 0,
            erase_busy_polls: 3,
            program_busy_polls: 1,
            asleep: false,
            command: Vec::new(),
            ops: Vec::new(),
            violations: Vec::new(),
        }
    }

    /// A part of `capacity` bytes holding `contents` at address 0.
    pub fn with_contents(capacity: usize, contents: &[u8]) -> Self {
        let mut flash = Self::new(capacity);
        flash.memory[..contents.len()].copy_from_slice(contents);
        flash
    }

    /// Status polls that report busy after an erase and after a program.
    #[must_use]
    pub fn with_busy_polls(mut self, erase: u32, program: u32) -> Self {
        self.erase_busy_polls = erase;
        self.program_busy_polls = program;
        self
    }

    /// Start in deep power-down.
    #[must_use]
    pub fn asleep(mut self) -> Self {
        self.asleep = true;
        self
    }

    /// Memory contents.
    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    /// Overwrite memory directly, bypassing the command set.
    pub fn poke(&mut self, address: usize, bytes: &[u8]) {
        self.memory[address..address + bytes.len()].copy_from_slice(bytes);
    }

    /// Executed commands, in order.
    pub fn ops(&self) -> &[FlashOp] {
        &self.ops
    }

    /// Forget the command history.
    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }

    /// Addresses of every block erase, in order.
    pub fn erases(&self) -> Vec<u32> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                FlashOp::BlockErase(address) => Some(*address),
                _ => None,
            })
            .collect()
    }

    /// Protocol misuse observed so far.
    pub fn violations(&self) -> &[&'static str] {
        &self.violations
    }

    /// Whether the part is in deep power-down.
    pub fn is_asleep(&self) -> bool {
        self.asleep
    }

    pub(super) fn select(&mut self) {
        self.command.clear();
    }

    pub(super) fn exchange(&mut self, mosi: u8) -> u8 {
        let position = self.command.len();
        self.command.push(mosi);
        if self.asleep {
            return 0xFF;
        }
        match self.command[0] {
            0x05 if position >= 1 => self.status(),
            0x03 if position >= 4 => {
                let address = address_of(&self.command) as usize + (position - 4);
                self.memory[address % self.memory.len()]
            }
            _ => 0xFF,
        }
    }

    pub(super) fn deselect(&mut self) {
        let command = std::mem::take(&mut self.command);
        let Some(&opcode) = command.first() else {
            return;
        };
        if self.asleep {
            if opcode == 0xAB {
                self.asleep = false;
                self.ops.push(FlashOp::Wake);
            }
            return;
        }
        if self.busy_polls > 0 && opcode != 0x05 {
            self.violations.push("command while busy");
            return;
        }
        match opcode {
            0x06 => {
                self.write_enabled = true;
                self.ops.push(FlashOp::WriteEnable);
            }
            0x04 => self.write_enabled = false,
            0xD8 if command.len() >= 4 => {
                if !std::mem::take(&mut self.write_enabled) {
                    self.violations.push("erase without write enable");
                    return;
                }
                let base = address_of(&command) as usize & !(BLOCK_LEN - 1);
                if base >= self.memory.len() {
                    self.violations.push("erase out of range");
                    return;
                }
                let end = (base + BLOCK_LEN).min(self.memory.len());
                self.memory[base..end].fill(0xFF);
                self.busy_polls = self.erase_busy_polls;
                self.ops.push(FlashOp::BlockErase(base as u32));
            }
            0x02 if command.len() >= 4 => {
                if !std::mem::take(&mut self.write_enabled) {
                    self.violations.push("program without write enable");
                    return;
                }
                let address = address_of(&command) as usize;
                let page = address & !(PAGE_LEN - 1);
                let data = &command[4..];
                for (i, byte) in data.iter().enumerate() {
                    let offset = (address + i) % PAGE_LEN;
                    let cell = (page + offset) % self.memory.len();
                    self.memory[cell] &= byte;
                }
                self.busy_polls = self.program_busy_polls;
                self.ops.push(FlashOp::PageProgram {
                    address: address as u32,
                    len: data.len(),
                });
            }
            0x03 if command.len() >= 4 => self.ops.push(FlashOp::Read(address_of(&command))),
            0xB9 => {
                self.asleep = true;
                self.ops.push(FlashOp::DeepSleep);
            }
            0xAB => self.ops.push(FlashOp::Wake),
            _ => {}
        }
    }

    fn status(&mut self) -> u8 {
        let wel = if self.write_enabled { 0x02 } else { 0x00 };
        if self.busy_polls > 0 {
            self.busy_polls -= 1;
            wel | 0x01
        } else {
            wel
        }
    }
}

fn address_of(command: &[u8]) -> u32 {
    u32::from_be_bytes([0, command[1], command[2], command[3]])
}
