//! Main loop orchestration
//!
//! [`Player`] owns the thread-mode side of the device: the card, the flash,
//! the DAC and the step timer. Each [`Player::run_once`] does one unit of
//! work (play, transfer, or sleep until the next interrupt) and picks the
//! next one from its outcome and the shared [`ControlState`].
//!
//! ```text
//!            ┌──────── restart ────────┐
//!            ▼                         │
//! boot ─→ Play ── Incomplete, nothing selected ─→ Transfer(1) ─→ Play
//!           │                                       ▲
//!           └─ finished ─→ Idle ─── restart ────────┘
//! ```
//!
//! A card that was missing or unreadable at boot is brought up again at the
//! start of the next transfer, so inserting one and pressing the button is
//! enough to recover.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus as HalSpiBus;
use flash::{transfer_track, FlashError, NorFlash, TransferError, TransferObserver};
use platform::peripheral::borrow_bus;
use platform::{
    Actuator, ActuatorLine, CardSession, ControlState, Dac, LineError, PinState, PowerManager,
    SharedActuator, SleepMode, SpiClock, StepTimer, Storage, INDICATOR_MASK,
};
use playback::{play_track, PlaybackError};
use sdcard::{CardError, SdCard};
use track::{TrackHeader, TrackId};

use crate::feedback::{beep_track_number, soft_start};

/// Boot and card bring-up failures. None stop the player: a committed image
/// in flash still plays without a card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PlayerError {
    /// Card bring-up failed
    Card(CardError),
    /// The card holds no readable volume
    Mount,
    /// The flash did not wake
    Flash(FlashError),
}

impl From<CardError> for PlayerError {
    fn from(err: CardError) -> Self {
        Self::Card(err)
    }
}

impl From<FlashError> for PlayerError {
    fn from(err: FlashError) -> Self {
        Self::Flash(err)
    }
}

impl core::fmt::Display for PlayerError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Card(err) => write!(f, "Card bring-up failed: {err}"),
            Self::Mount => write!(f, "Card volume could not be mounted"),
            Self::Flash(err) => write!(f, "Flash did not wake: {err}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for PlayerError {}

/// Work picked for the next iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum Next {
    Play,
    Transfer(TrackId),
    Idle,
}

/// Result of one main-loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Outcome {
    /// The image played to the end; this many samples
    Played(u32),
    /// Playback or transfer stopped on the restart signal
    Interrupted,
    /// Flash holds no committed image
    Incomplete,
    /// The track was copied and committed
    Transferred(TrackHeader),
    /// The copy failed; flash is left uncommitted
    TransferFailed(TransferError),
    /// No transfer: the card could not be brought up or mounted
    CardUnavailable(PlayerError),
    /// Playback failed on the flash or the outputs
    PlaybackFailed(PlaybackError),
    /// Slept until the next interrupt
    Idle,
    /// The device was shut down
    PoweredDown,
}

/// Thread-mode devices and the loop state.
pub struct Player<'a, SPI, CS, CD, S, D, P, T, M> {
    flash: NorFlash<'a, SPI, CS>,
    card: &'a SdCard<'a, SPI, CS, CD>,
    storage: S,
    dac: D,
    actuator: &'a SharedActuator<Actuator<P>>,
    timer: T,
    power: M,
    control: &'a ControlState,
    next: Next,
}

impl<'a, SPI, CS, CD, S, D, P, T, M> Player<'a, SPI, CS, CD, S, D, P, T, M>
where
    SPI: HalSpiBus<u8> + SpiClock,
    CS: OutputPin,
    CD: DelayNs,
    S: Storage,
    D: Dac,
    P: OutputPin,
    T: StepTimer + DelayNs,
    M: PowerManager,
{
    /// Assemble the player. `flash` and `card` share one bus; `storage`
    /// must read from `card`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        flash: NorFlash<'a, SPI, CS>,
        card: &'a SdCard<'a, SPI, CS, CD>,
        storage: S,
        dac: D,
        actuator: &'a SharedActuator<Actuator<P>>,
        timer: T,
        power: M,
        control: &'a ControlState,
    ) -> Self {
        Self {
            flash,
            card,
            storage,
            dac,
            actuator,
            timer,
            power,
            control,
            next: Next::Play,
        }
    }

    /// Soft-start the DAC, wake the flash, bring up the card and record
    /// which tracks it holds.
    pub fn boot(&mut self) -> Result<(), PlayerError> {
        soft_start(&mut self.dac, &mut self.timer);
        self.flash.wake()?;
        self.open_card()
    }

    /// Initialize the card, mount its volume and rebuild the catalog.
    fn open_card(&mut self) -> Result<(), PlayerError> {
        self.control.set_card_session(CardSession::Uninitialized);
        let info = self.card.initialize()?;
        #[cfg(feature = "defmt")]
        defmt::info!("card {} ({})", info.kind, info.addressing);
        #[cfg(not(feature = "defmt"))]
        let _ = info;

        self.storage.mount().map_err(|_| PlayerError::Mount)?;
        self.control.set_card_session(CardSession::Mounted);

        let mut catalog = 0u16;
        for track in TrackId::all() {
            if matches!(self.storage.exists(track.file_name().as_str()), Ok(true)) {
                catalog |= track.catalog_bit();
            }
        }
        self.control.set_catalog(catalog);
        #[cfg(feature = "defmt")]
        defmt::info!("catalog {=u16:#b}", catalog);
        Ok(())
    }

    /// One pass of the main loop.
    pub fn run_once(&mut self) -> Outcome {
        if self.control.power_down_requested() {
            self.shutdown();
            return Outcome::PoweredDown;
        }
        if self.control.take_restart() {
            let track = self
                .control
                .selected_track()
                .and_then(TrackId::new)
                .unwrap_or(TrackId::FIRST);
            self.next = Next::Transfer(track);
        }

        match self.next {
            Next::Play => self.play(),
            Next::Transfer(track) => self.transfer(track),
            Next::Idle => {
                self.power.enter_sleep(SleepMode::Idle);
                Outcome::Idle
            }
        }
    }

    fn play(&mut self) -> Outcome {
        match play_track(
            &self.flash,
            &mut self.dac,
            self.actuator,
            &mut self.timer,
            self.control,
        ) {
            Ok(samples) => {
                self.next = Next::Idle;
                Outcome::Played(samples)
            }
            // The restart signal is still raised; the next pass consumes it.
            Err(PlaybackError::Interrupted) => Outcome::Interrupted,
            Err(PlaybackError::Incomplete) => {
                self.next = if self.control.selected_track().is_none() {
                    self.control.set_selected_track(TrackId::FIRST.get());
                    Next::Transfer(TrackId::FIRST)
                } else {
                    Next::Idle
                };
                Outcome::Incomplete
            }
            Err(err) => {
                self.next = Next::Idle;
                Outcome::PlaybackFailed(err)
            }
        }
    }

    fn transfer(&mut self, track: TrackId) -> Outcome {
        if self.control.card_session() == CardSession::Uninitialized {
            if let Err(err) = self.open_card() {
                #[cfg(feature = "defmt")]
                defmt::warn!("no card for track {}: {}", track.get(), err);
                self.next = Next::Idle;
                return Outcome::CardUnavailable(err);
            }
        }
        if !beep_track_number(&mut self.dac, &mut self.timer, track, self.control) {
            return Outcome::Interrupted;
        }

        self.control.set_card_session(CardSession::FileOpen);
        let mut indicator = Indicator::new(self.actuator);
        let result = transfer_track(
            &self.flash,
            &mut self.storage,
            track,
            self.control,
            &mut indicator,
        );
        self.control.set_card_session(CardSession::Mounted);

        match result {
            Ok(header) => {
                self.next = Next::Play;
                Outcome::Transferred(header)
            }
            Err(TransferError::Interrupted) => Outcome::Interrupted,
            Err(err) => {
                #[cfg(feature = "defmt")]
                defmt::warn!("transfer of track {} failed: {}", track.get(), err);
                self.next = Next::Idle;
                Outcome::TransferFailed(err)
            }
        }
    }

    /// Put the flash to sleep, release the card, switch off the bus and the
    /// DAC, clear the outputs and enter the lowest-power state.
    ///
    /// On hardware this does not return.
    pub fn shutdown(&mut self) {
        #[cfg(feature = "defmt")]
        defmt::info!("shutdown");
        if let Err(_err) = self.flash.deep_sleep() {
            #[cfg(feature = "defmt")]
            defmt::warn!("shutdown: flash did not sleep: {}", _err);
        }
        if let Err(_err) = self.card.idle(&mut self.storage) {
            #[cfg(feature = "defmt")]
            defmt::warn!("shutdown: card idle failed: {}", _err);
        }
        self.control.set_card_session(CardSession::Uninitialized);
        if let Err(_err) = borrow_bus(self.flash.bus()).and_then(|mut bus| bus.disable()) {
            #[cfg(feature = "defmt")]
            defmt::warn!("shutdown: bus not released cleanly: {}", _err);
        }
        self.dac.disable();
        if let Err(_err) = self.actuator.with(Actuator::clear) {
            #[cfg(feature = "defmt")]
            defmt::warn!("shutdown: lines not cleared: {}", _err);
        }
        self.power.enter_sleep(SleepMode::PowerDown);
    }

    /// The shared control state.
    pub fn control(&self) -> &ControlState {
        self.control
    }
}

/// Transfer progress on the indicator lines: right eye high while copying,
/// left eye toggling per erased block, both toggling per chunk written.
struct Indicator<'a, P> {
    actuator: &'a SharedActuator<Actuator<P>>,
}

impl<'a, P: OutputPin> Indicator<'a, P> {
    fn new(actuator: &'a SharedActuator<Actuator<P>>) -> Self {
        Self { actuator }
    }

    fn drive(&self, f: impl FnOnce(&mut Actuator<P>) -> Result<(), LineError>) {
        // Progress display only; a stuck line must not fail the copy.
        if let Err(_err) = self.actuator.with(f) {
            #[cfg(feature = "defmt")]
            defmt::warn!("transfer indicator: {}", _err);
        }
    }
}

impl<P: OutputPin> TransferObserver for Indicator<'_, P> {
    fn on_start(&mut self, _header: TrackHeader) {
        self.drive(|lines| {
            lines.set(ActuatorLine::LeftEye.mask(), PinState::Low)?;
            lines.set(ActuatorLine::RightEye.mask(), PinState::High)
        });
    }

    fn on_block_erased(&mut self, _block: u32) {
        self.drive(|lines| lines.toggle(ActuatorLine::LeftEye.mask()));
    }

    fn on_chunk_written(&mut self, _len: usize) {
        self.drive(|lines| lines.toggle(INDICATOR_MASK));
    }

    fn on_commit(&mut self) {
        self.drive(|lines| lines.set(INDICATOR_MASK, PinState::Low));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use platform::mocks::{MockLine, Recording};

    #[test]
    fn indicator_follows_transfer_phases() {
        let rec = Recording::new();
        let actuator = SharedActuator::new(Actuator::<MockLine>::new(rec.lines()).unwrap());
        let mut indicator = Indicator::new(&actuator);

        indicator.on_start(TrackHeader::for_payload(10));
        assert_eq!(rec.line_state(), 0b1000);
        indicator.on_block_erased(0);
        assert_eq!(rec.line_state(), 0b1100);
        indicator.on_erase_complete();
        indicator.on_chunk_written(1024);
        assert_eq!(rec.line_state(), 0b0000);
        indicator.on_chunk_written(1024);
        assert_eq!(rec.line_state(), 0b1100);
        indicator.on_commit();
        assert_eq!(rec.line_state(), 0);
    }

    /// Drives low but refuses to go high.
    struct StuckLow;

    #[derive(Debug)]
    struct Stuck;

    impl embedded_hal::digital::Error for Stuck {
        fn kind(&self) -> embedded_hal::digital::ErrorKind {
            embedded_hal::digital::ErrorKind::Other
        }
    }

    impl embedded_hal::digital::ErrorType for StuckLow {
        type Error = Stuck;
    }

    impl OutputPin for StuckLow {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            Err(Stuck)
        }
    }

    #[test]
    fn stuck_indicator_line_does_not_stop_the_copy() {
        let actuator = SharedActuator::new(Actuator::new([StuckLow, StuckLow, StuckLow, StuckLow]).unwrap());
        let mut indicator = Indicator::new(&actuator);

        indicator.on_start(TrackHeader::for_payload(10));
        indicator.on_chunk_written(1024);
        indicator.on_commit();

        assert_eq!(actuator.with(|lines| lines.state()), 0);
    }

    #[test]
    fn card_errors_display() {
        assert_eq!(PlayerError::Mount.to_string(), "Card volume could not be mounted");
        assert_eq!(
            PlayerError::Card(CardError::NoDisk).to_string(),
            "Card bring-up failed: No card present"
        );
    }
}
