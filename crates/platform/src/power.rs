//! Power management abstraction
//!
//! Two seams: [`PowerManager`] enters a sleep state from thread mode, and
//! [`PowerControl`] lets the front-panel handler ask for power-off without
//! touching the shared bus itself.

/// Sleep modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SleepMode {
    /// CPU stopped until the next interrupt
    Idle,
    /// Lowest-power state; only a reset leaves it
    PowerDown,
}

/// Power management interface
pub trait PowerManager {
    /// Enter `mode`.
    ///
    /// On hardware [`SleepMode::PowerDown`] does not return; host
    /// implementations record the request and return.
    fn enter_sleep(&mut self, mode: SleepMode);
}

/// Power-off hand-off used by the front panel.
pub trait PowerControl {
    /// Request an orderly power-down.
    fn power_down(&self);
}
