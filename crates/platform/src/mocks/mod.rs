//! Mock implementations for testing
//!
//! Host-side stand-ins for every platform seam. The SPI pieces are
//! simulators rather than scripted mocks: [`SimCard`] and [`SimFlash`]
//! speak their protocols byte by byte, and [`sim_bus`] routes each clocked
//! byte to whichever chip select is low, so the real drivers run unmodified
//! against them.
//!
//! Use `embedded-hal-mock` instead where an exact transaction sequence is the
//! thing under test.

#![cfg(any(test, feature = "std"))]
#![allow(clippy::arithmetic_side_effects)]
#![allow(clippy::indexing_slicing)]
#![allow(clippy::cast_possible_truncation)]

mod card;
mod clock;
mod flash;
mod outputs;
mod storage;

use std::cell::RefCell;
use std::convert::Infallible;
use std::rc::Rc;

use embedded_hal::digital::{ErrorType as DigitalErrorType, OutputPin};
use embedded_hal::spi::{ErrorType as SpiErrorType, SpiBus};

use crate::peripheral::{Chip, SpiClock};

pub use card::{CardCommand, SimCard, SimCardKind};
pub use clock::{MockClock, ScriptedButton};
pub use flash::{FlashOp, SimFlash};
pub use outputs::{MockDac, MockLine, MockPower, MockPowerControl, Recording};
pub use storage::{MemoryStorage, MemoryStorageError};

struct BusState {
    card: SimCard,
    flash: SimFlash,
    card_selected: bool,
    flash_selected: bool,
    frequencies: Vec<u32>,
    contention: bool,
    disabled: bool,
}

impl BusState {
    fn exchange(&mut self, mosi: u8) -> u8 {
        if self.disabled {
            return 0xFF;
        }
        match (self.card_selected, self.flash_selected) {
            (true, false) => self.card.exchange(mosi),
            (false, true) => self.flash.exchange(mosi),
            (false, false) => {
                self.card.idle_clock();
                0xFF
            }
            (true, true) => {
                self.contention = true;
                0xFF
            }
        }
    }
}

/// Test-side handle on a simulated bus.
#[derive(Clone)]
pub struct SimBus {
    state: Rc<RefCell<BusState>>,
}

impl SimBus {
    /// Whether the card chip select is low.
    pub fn card_selected(&self) -> bool {
        self.state.borrow().card_selected
    }

    /// Whether the flash chip select is low.
    pub fn flash_selected(&self) -> bool {
        self.state.borrow().flash_selected
    }

    /// Whether both chips were ever selected at once.
    pub fn contention(&self) -> bool {
        self.state.borrow().contention
    }

    /// Last clock rate programmed, or 0 if none.
    pub fn frequency(&self) -> u32 {
        self.state.borrow().frequencies.last().copied().unwrap_or(0)
    }

    /// Whether the peripheral has been switched off.
    pub fn spi_disabled(&self) -> bool {
        self.state.borrow().disabled
    }

    /// Every clock rate programmed, in order.
    pub fn frequencies(&self) -> Vec<u32> {
        self.state.borrow().frequencies.clone()
    }

    /// Inspect or adjust the simulated card.
    pub fn card<R>(&self, f: impl FnOnce(&mut SimCard) -> R) -> R {
        f(&mut self.state.borrow_mut().card)
    }

    /// Inspect or adjust the simulated flash.
    pub fn flash<R>(&self, f: impl FnOnce(&mut SimFlash) -> R) -> R {
        f(&mut self.state.borrow_mut().flash)
    }
}

/// SPI peripheral side of a simulated bus.
pub struct MockSpi {
    state: Rc<RefCell<BusState>>,
}

impl SpiErrorType for MockSpi {
    type Error = Infallible;
}

impl SpiBus<u8> for MockSpi {
    fn read(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        let mut state = self.state.borrow_mut();
        for word in words {
            *word = state.exchange(0xFF);
        }
        Ok(())
    }

    fn write(&mut self, words: &[u8]) -> Result<(), Self::Error> {
        let mut state = self.state.borrow_mut();
        for &word in words {
            state.exchange(word);
        }
        Ok(())
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Self::Error> {
        let mut state = self.state.borrow_mut();
        let len = read.len().max(write.len());
        for i in 0..len {
            let out = write.get(i).copied().unwrap_or(0xFF);
            let received = state.exchange(out);
            if let Some(slot) = read.get_mut(i) {
                *slot = received;
            }
        }
        Ok(())
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        let mut state = self.state.borrow_mut();
        for word in words {
            *word = state.exchange(*word);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl SpiClock for MockSpi {
    fn set_frequency(&mut self, hz: u32) {
        self.state.borrow_mut().frequencies.push(hz);
    }

    fn disable(&mut self) {
        self.state.borrow_mut().disabled = true;
    }
}

/// Chip-select line of a simulated bus.
pub struct MockCs {
    state: Rc<RefCell<BusState>>,
    chip: Chip,
}

impl DigitalErrorType for MockCs {
    type Error = Infallible;
}

impl OutputPin for MockCs {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        let mut state = self.state.borrow_mut();
        match self.chip {
            Chip::Card => {
                if !state.card_selected {
                    state.card_selected = true;
                    state.card.select();
                }
            }
            Chip::Flash => {
                if !state.flash_selected {
                    state.flash_selected = true;
                    state.flash.select();
                }
            }
        }
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        let mut state = self.state.borrow_mut();
        match self.chip {
            Chip::Card => {
                if state.card_selected {
                    state.card_selected = false;
                    state.card.deselect();
                }
            }
            Chip::Flash => {
                if state.flash_selected {
                    state.flash_selected = false;
                    state.flash.deselect();
                }
            }
        }
        Ok(())
    }
}

/// Build a simulated bus with `card` and `flash` attached.
///
/// Returns the SPI peripheral, the card and flash chip selects, and a
/// handle for inspecting the simulated devices.
pub fn sim_bus(card: SimCard, flash: SimFlash) -> (MockSpi, MockCs, MockCs, SimBus) {
    let state = Rc::new(RefCell::new(BusState {
        card,
        flash,
        card_selected: false,
        flash_selected: false,
        frequencies: Vec::new(),
        contention: false,
        disabled: false,
    }));
    (
        MockSpi {
            state: Rc::clone(&state),
        },
        MockCs {
            state: Rc::clone(&state),
            chip: Chip::Card,
        },
        MockCs {
            state: Rc::clone(&state),
            chip: Chip::Flash,
        },
        SimBus { state },
    )
}
