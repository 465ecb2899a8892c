//! Device interfaces used by the trap layer
//!
//! The drivers themselves live with the board support code. The trap layer
//! only needs a byte console and a way to power the machine off.

/// Console device behind handles 0 and 1.
pub trait Console: Send + Sync {
    /// Write `bytes` to the console output stream, in one piece.
    fn put_bytes(&self, bytes: &[u8]);

    /// Block until a key is available and return it.
    fn get_byte(&self) -> u8;
}

/// Machine power control.
pub trait PowerControl: Send + Sync {
    /// Power the machine off. On real hardware this does not return; the
    /// trap layer reports `TrapOutcome::Halted` either way.
    fn power_off(&self);
}
