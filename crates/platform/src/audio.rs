//! 8-bit DAC output
//!
//! Track images carry unsigned 8-bit samples; the DAC reproduces each byte
//! as a level with [`crate::config::DAC_MID_SCALE`] as silence.

/// Single-channel 8-bit DAC.
///
/// Writes are infallible: the converter register is always writable once
/// the peripheral is enabled.
pub trait Dac {
    /// Output `code` as the new level.
    fn write(&mut self, code: u8);

    /// Stop driving the output. The next [`write`](Self::write) after a
    /// reset is the first one honoured.
    fn disable(&mut self);
}

impl<T: Dac + ?Sized> Dac for &mut T {
    fn write(&mut self, code: u8) {
        (**self).write(code);
    }

    fn disable(&mut self) {
        (**self).disable();
    }
}
