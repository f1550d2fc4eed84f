//! STM32H7 bindings for the platform seams.
//!
//! # Pin assignments
//!
//! | Signal            | MCU pin | Notes                                  |
//! |-------------------|---------|----------------------------------------|
//! | SPI1 SCK          | PA5     | Card and flash share the bus           |
//! | SPI1 MISO         | PA6     |                                        |
//! | SPI1 MOSI         | PA7     |                                        |
//! | Card CS           | PD14    | Active low                             |
//! | Flash CS          | PD15    | Active low                             |
//! | DAC1 OUT1         | PA4     | 8-bit right-aligned                    |
//! | Legs              | PE0     | Actuator bit 0                         |
//! | Mouth             | PE1     | Actuator bit 1                         |
//! | Left eye          | PE2     | Actuator bit 2, transfer indicator     |
//! | Right eye         | PE3     | Actuator bit 3, transfer indicator     |
//! | Mode button       | PC13    | Active low, pull-up, EXTI13            |

use cortex_m::peripheral::{DCB, DWT, SCB};
use embassy_stm32::dac::{DacCh1, Value};
use embassy_stm32::dma::NoDma;
use embassy_stm32::pac;
use embassy_stm32::peripherals::{DAC1, SPI1};
use embassy_stm32::spi::{Config as SpiConfig, Error as SpiError, Spi};
use embassy_stm32::time::Hertz;
use embedded_hal::delay::DelayNs;
use embedded_hal::spi::{ErrorType, SpiBus};
use platform::{Dac, PowerManager, SleepMode, SpiClock, StepTimer};

/// Core clock after `embassy_stm32::init` with the default configuration
/// (HSI, no PLL).
pub const CORE_CLOCK_HZ: u32 = 64_000_000;

// Longest single wait; keeps every deadline within half the counter range.
const MAX_WAIT_TICKS: u64 = 1 << 30;

/// SPI1 in blocking mode with run-time clock changes.
pub struct BoardSpi {
    spi: Spi<'static, SPI1, NoDma, NoDma>,
}

impl BoardSpi {
    /// Wrap a blocking SPI1 driver.
    pub fn new(spi: Spi<'static, SPI1, NoDma, NoDma>) -> Self {
        Self { spi }
    }
}

impl ErrorType for BoardSpi {
    type Error = SpiError;
}

impl SpiBus<u8> for BoardSpi {
    fn read(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        SpiBus::read(&mut self.spi, words)
    }

    fn write(&mut self, words: &[u8]) -> Result<(), Self::Error> {
        SpiBus::write(&mut self.spi, words)
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Self::Error> {
        SpiBus::transfer(&mut self.spi, read, write)
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        SpiBus::transfer_in_place(&mut self.spi, words)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        SpiBus::<u8>::flush(&mut self.spi)
    }
}

impl SpiClock for BoardSpi {
    fn set_frequency(&mut self, hz: u32) {
        let mut config = SpiConfig::default();
        config.frequency = Hertz(hz);
        if self.spi.set_config(&config).is_err() {
            defmt::warn!("spi: clock {=u32} Hz rejected", hz);
        }
    }

    fn disable(&mut self) {
        // The blocking driver has no off switch: clear SPE, then gate the
        // kernel clock.
        pac::SPI1.cr1().modify(|w| w.set_spe(false));
        pac::RCC.apb2enr().modify(|w| w.set_spi1en(false));
    }
}

/// Step timer on the Cortex-M cycle counter.
///
/// Copies share the one hardware counter, so the panel handler and the main
/// loop can each hold one.
#[derive(Clone, Copy)]
pub struct CycleTimer {
    frequency: u32,
}

impl CycleTimer {
    /// Start the cycle counter running at `frequency` Hz.
    pub fn new(dcb: &mut DCB, dwt: &mut DWT, frequency: u32) -> Self {
        dcb.enable_trace();
        dwt.enable_cycle_counter();
        Self { frequency }
    }
}

impl StepTimer for CycleTimer {
    fn frequency(&self) -> u32 {
        self.frequency
    }

    fn now(&self) -> u32 {
        DWT::cycle_count()
    }
}

impl DelayNs for CycleTimer {
    fn delay_ns(&mut self, ns: u32) {
        let ticks = (u64::from(ns).saturating_mul(u64::from(self.frequency)))
            .div_ceil(1_000_000_000)
            .min(MAX_WAIT_TICKS);
        let ticks = u32::try_from(ticks).unwrap_or(u32::MAX);
        let deadline = self.now().wrapping_add(ticks);
        self.delay_until(deadline);
    }
}

/// DAC1 channel 1 in 8-bit mode.
pub struct BoardDac {
    channel: DacCh1<'static, DAC1, NoDma>,
}

impl BoardDac {
    /// Wrap an enabled DAC channel.
    pub fn new(channel: DacCh1<'static, DAC1, NoDma>) -> Self {
        Self { channel }
    }
}

impl Dac for BoardDac {
    fn write(&mut self, code: u8) {
        // No trigger is configured, so the level takes effect at once.
        self.channel.set(Value::Bit8(code));
    }

    fn disable(&mut self) {
        self.channel.disable();
        defmt::debug!("dac: off");
    }
}

/// Sleep entry through WFI.
pub struct BoardPower {
    scb: SCB,
}

impl BoardPower {
    /// Take the system control block.
    pub fn new(scb: SCB) -> Self {
        Self { scb }
    }
}

impl PowerManager for BoardPower {
    fn enter_sleep(&mut self, mode: SleepMode) {
        match mode {
            SleepMode::Idle => {
                self.scb.clear_sleepdeep();
                cortex_m::asm::wfi();
            }
            SleepMode::PowerDown => {
                defmt::info!("power down");
                cortex_m::interrupt::disable();
                self.scb.set_sleepdeep();
                // Only a reset leaves this state.
                loop {
                    cortex_m::asm::wfi();
                }
            }
        }
    }
}
