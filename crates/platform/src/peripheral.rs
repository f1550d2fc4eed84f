//! Shared SPI bus
//!
//! The card and the serial flash hang off one SPI bus with one chip-select
//! line each. [`SpiBus`] owns the bus and both lines and guarantees that at
//! most one peripheral is selected at any time: selecting one deselects the
//! other first.
//!
//! Both drivers hold a `&SharedBus` and borrow it per operation, the way
//! `embedded-hal-bus`'s `RefCellDevice` arbitrates a bus on a single core.
//! The bus is only ever touched from thread mode; the panel interrupt never
//! borrows it.

use core::cell::RefCell;
use core::ops::{Deref, DerefMut};

use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus as HalSpiBus;

/// Peripheral on the shared bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Chip {
    /// microSD / MMC card
    Card,
    /// Serial NOR flash
    Flash,
}

/// Bus errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusError {
    /// The SPI peripheral reported a transfer error
    Spi,
    /// A chip-select line could not be driven
    ChipSelect,
    /// The bus is already borrowed by another driver
    Busy,
}

impl core::fmt::Display for BusError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Spi => write!(f, "SPI transfer failed"),
            Self::ChipSelect => write!(f, "Chip-select line could not be driven"),
            Self::Busy => write!(f, "SPI bus already in use"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for BusError {}

/// Clock control for the SPI peripheral.
///
/// The card must be brought up at a low clock; everything else runs at
/// [`crate::config::SPI_HZ`].
pub trait SpiClock {
    /// Reprogram the bus clock.
    fn set_frequency(&mut self, hz: u32);

    /// Stop the peripheral and gate its clock.
    fn disable(&mut self);
}

/// Bus shared by the card and flash drivers.
pub type SharedBus<SPI, CS> = RefCell<SpiBus<SPI, CS>>;

/// SPI bus with the card and flash chip-select lines.
pub struct SpiBus<SPI, CS> {
    spi: SPI,
    card_cs: CS,
    flash_cs: CS,
    selected: Option<Chip>,
}

impl<SPI, CS> SpiBus<SPI, CS>
where
    SPI: HalSpiBus<u8>,
    CS: OutputPin,
{
    /// Take ownership of the bus and drive both chip selects high.
    pub fn new(spi: SPI, card_cs: CS, flash_cs: CS) -> Result<Self, BusError> {
        let mut bus = Self {
            spi,
            card_cs,
            flash_cs,
            selected: None,
        };
        bus.deselect()?;
        Ok(bus)
    }

    /// Wrap the bus for sharing between drivers.
    pub fn into_shared(self) -> SharedBus<SPI, CS> {
        RefCell::new(self)
    }

    /// Select `chip`, deselecting the other peripheral first.
    pub fn select(&mut self, chip: Chip) -> Result<(), BusError> {
        if self.selected == Some(chip) {
            return Ok(());
        }
        self.deselect()?;
        let line = match chip {
            Chip::Card => &mut self.card_cs,
            Chip::Flash => &mut self.flash_cs,
        };
        line.set_low().map_err(|_| BusError::ChipSelect)?;
        self.selected = Some(chip);
        Ok(())
    }

    /// Finish any in-flight transfer and raise both chip selects.
    pub fn deselect(&mut self) -> Result<(), BusError> {
        self.spi.flush().map_err(|_| BusError::Spi)?;
        self.card_cs.set_high().map_err(|_| BusError::ChipSelect)?;
        self.flash_cs.set_high().map_err(|_| BusError::ChipSelect)?;
        self.selected = None;
        Ok(())
    }

    /// Currently selected peripheral.
    pub fn selected(&self) -> Option<Chip> {
        self.selected
    }

    /// Select `chip` for the lifetime of the returned guard.
    ///
    /// The guard deselects on drop, including on early `?` returns.
    pub fn scoped(&mut self, chip: Chip) -> Result<Selected<'_, SPI, CS>, BusError> {
        self.select(chip)?;
        Ok(Selected { bus: self })
    }

    /// Clock one byte out and return the byte clocked in.
    pub fn exchange(&mut self, byte: u8) -> Result<u8, BusError> {
        let mut word = [byte];
        self.spi
            .transfer_in_place(&mut word)
            .map_err(|_| BusError::Spi)?;
        let [received] = word;
        Ok(received)
    }

    /// Clock out `bytes`, discarding what comes back.
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), BusError> {
        self.spi.write(bytes).map_err(|_| BusError::Spi)
    }

    /// Deselect everything and clock `count` filler bytes.
    ///
    /// The card needs this idle pattern at power-up and before power-down.
    pub fn idle_clocks(&mut self, count: usize) -> Result<(), BusError> {
        self.deselect()?;
        for _ in 0..count {
            self.exchange(0xFF)?;
        }
        Ok(())
    }

}

impl<SPI, CS> SpiBus<SPI, CS>
where
    SPI: HalSpiBus<u8> + SpiClock,
    CS: OutputPin,
{
    /// Reprogram the bus clock.
    pub fn set_frequency(&mut self, hz: u32) {
        self.spi.set_frequency(hz);
    }

    /// Deselect both peripherals and switch the bus off.
    ///
    /// Chip selects stay high. Nothing re-enables the peripheral short of a
    /// reset, so this is for power-down only.
    pub fn disable(&mut self) -> Result<(), BusError> {
        let deselected = self.deselect();
        self.spi.disable();
        deselected
    }
}

/// Borrow a shared bus, failing instead of panicking when it is taken.
pub fn borrow_bus<SPI, CS>(
    bus: &SharedBus<SPI, CS>,
) -> Result<core::cell::RefMut<'_, SpiBus<SPI, CS>>, BusError> {
    bus.try_borrow_mut().map_err(|_| BusError::Busy)
}

/// A selected peripheral; deselects on drop.
pub struct Selected<'a, SPI, CS>
where
    SPI: HalSpiBus<u8>,
    CS: OutputPin,
{
    bus: &'a mut SpiBus<SPI, CS>,
}

impl<SPI, CS> Deref for Selected<'_, SPI, CS>
where
    SPI: HalSpiBus<u8>,
    CS: OutputPin,
{
    type Target = SpiBus<SPI, CS>;

    fn deref(&self) -> &Self::Target {
        self.bus
    }
}

impl<SPI, CS> DerefMut for Selected<'_, SPI, CS>
where
    SPI: HalSpiBus<u8>,
    CS: OutputPin,
{
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.bus
    }
}

impl<SPI, CS> Drop for Selected<'_, SPI, CS>
where
    SPI: HalSpiBus<u8>,
    CS: OutputPin,
{
    fn drop(&mut self) {
        // Nothing useful can be done with a failure here; the next select()
        // drives both lines again.
        let _ = self.bus.deselect();
    }
}
