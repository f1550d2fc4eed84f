//! Animatronic player firmware - main entry point
//!
//! Hardware-only entry point for STM32H743ZI.
//!
//! Thread mode runs the [`Player`] loop and owns the shared SPI bus. The mode
//! button is served by a task on a higher-priority interrupt executor, so a
//! press preempts transfer and playback; it only ever talks to the loop
//! through [`CONTROL`] and the shared actuator.

#![no_std]
#![no_main]

use cortex_m::Peripherals as CorePeripherals;
use embassy_executor::{InterruptExecutor, Spawner};
use embassy_stm32::dac::DacCh1;
use embassy_stm32::dma::NoDma;
use embassy_stm32::exti::ExtiInput;
use embassy_stm32::gpio::{AnyPin, Input, Level, Output, Pin, Pull, Speed};
use embassy_stm32::interrupt;
use embassy_stm32::interrupt::{InterruptExt, Priority};
use embassy_stm32::peripherals::PC13;
use embassy_stm32::spi::{Config as SpiConfig, Spi};
use embassy_stm32::time::Hertz;
use embassy_time::Delay;
use static_cell::StaticCell;

use firmware::fat::{FatStorage, NoClock};
use firmware::front_panel::FrontPanel;
use firmware::hardware::{BoardDac, BoardPower, BoardSpi, CycleTimer, CORE_CLOCK_HZ};
use firmware::player::{Outcome, Player};
use flash::NorFlash;
use platform::config::{APP_NAME, APP_VERSION, SPI_HZ};
use platform::{Actuator, ControlState, SharedActuator, SpiBus};
use sdcard::SdCard;

use {defmt_rtt as _, panic_probe as _};

type Line = Output<'static, AnyPin>;

/// Flags shared between the panel handler and the main loop.
static CONTROL: ControlState = ControlState::new();

static ACTUATOR: StaticCell<SharedActuator<Actuator<Line>>> = StaticCell::new();

static PANEL_EXECUTOR: InterruptExecutor = InterruptExecutor::new();

#[interrupt]
unsafe fn UART4() {
    // SAFETY: UART4 is otherwise unused; its vector only drives the panel executor.
    unsafe { PANEL_EXECUTOR.on_interrupt() }
}

#[embassy_executor::task]
async fn front_panel(
    mut button: ExtiInput<'static, PC13>,
    actuator: &'static SharedActuator<Actuator<Line>>,
    timer: CycleTimer,
) {
    let mut panel = FrontPanel::new(timer, actuator, &CONTROL, &CONTROL);
    loop {
        button.wait_for_falling_edge().await;
        match panel.on_falling_edge(&mut button) {
            Ok(action) => defmt::info!("panel: {}", action),
            Err(err) => defmt::warn!("panel: {}", err),
        }
    }
}

#[embassy_executor::main]
async fn main(_spawner: Spawner) {
    defmt::info!("{=str} v{=str}", APP_NAME, APP_VERSION);
    let p = embassy_stm32::init(embassy_stm32::Config::default());
    let mut core = defmt::unwrap!(CorePeripherals::take());
    let timer = CycleTimer::new(&mut core.DCB, &mut core.DWT, CORE_CLOCK_HZ);

    // Outputs first: the lines must be low before the button can fire.
    let lines = [
        Output::new(p.PE0.degrade(), Level::Low, Speed::Low),
        Output::new(p.PE1.degrade(), Level::Low, Speed::Low),
        Output::new(p.PE2.degrade(), Level::Low, Speed::Low),
        Output::new(p.PE3.degrade(), Level::Low, Speed::Low),
    ];
    let actuator: &'static SharedActuator<Actuator<Line>> =
        ACTUATOR.init(SharedActuator::new(defmt::unwrap!(Actuator::new(lines))));
    let dac = BoardDac::new(DacCh1::new(p.DAC1, NoDma, p.PA4));

    let mut spi_config = SpiConfig::default();
    spi_config.frequency = Hertz(SPI_HZ);
    let spi = BoardSpi::new(Spi::new_blocking(p.SPI1, p.PA5, p.PA7, p.PA6, spi_config));
    let card_cs = Output::new(p.PD14.degrade(), Level::High, Speed::VeryHigh);
    let flash_cs = Output::new(p.PD15.degrade(), Level::High, Speed::VeryHigh);
    let bus = defmt::unwrap!(SpiBus::new(spi, card_cs, flash_cs)).into_shared();

    let card = SdCard::new(&bus, Delay);
    let storage = FatStorage::new(&card, NoClock);
    let mut player = Player::new(
        NorFlash::new(&bus),
        &card,
        storage,
        dac,
        actuator,
        timer,
        BoardPower::new(core.SCB),
        &CONTROL,
    );
    if let Err(err) = player.boot() {
        defmt::warn!("{}", err);
    }

    let button = ExtiInput::new(Input::new(p.PC13, Pull::Up), p.EXTI13);
    interrupt::UART4.set_priority(Priority::P6);
    let panel = PANEL_EXECUTOR.start(interrupt::UART4);
    if panel.spawn(front_panel(button, actuator, timer)).is_err() {
        defmt::error!("front panel task could not start");
    }

    loop {
        match player.run_once() {
            Outcome::PoweredDown => break,
            outcome => defmt::debug!("loop: {}", outcome),
        }
    }
}
