//! Syscall trap entry
//!
//! The architecture glue saves the user context into a `TrapFrame`, calls
//! `Kernel::handle_trap` on the trapping process's kernel thread and acts on
//! the returned `TrapOutcome`.
//!
//! # Calling Convention
//! - `esp`: user stack pointer; the request block starts here
//! - `eax`: return value, written before the process resumes
//!
//! # Security Considerations
//! - Nothing in the frame is trusted; `esp` goes through the validator
//!   like any other user pointer

use alloc::sync::Arc;

use static_assertions::const_assert_eq;

use crate::kernel::Kernel;
use crate::process::Process;
use crate::syscall;

/// User registers saved on a syscall trap.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrapFrame {
    /// User stack pointer.
    pub esp: u32,
    /// Return value register.
    pub eax: u32,
}

const_assert_eq!(core::mem::size_of::<TrapFrame>(), 8);

/// What the glue does after a trap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapOutcome {
    /// Return to user mode with `eax` set.
    Resume,
    /// The process terminated with this status. Its thread must not
    /// return to user mode.
    Exited(i32),
    /// Power-off was requested.
    Halted,
}

impl TrapFrame {
    pub const fn new(esp: u32) -> Self {
        Self { esp, eax: 0 }
    }
}

impl Kernel {
    /// Handle a syscall trap from `process`.
    ///
    /// A process that has already terminated is not dispatched again: the
    /// frame is left untouched and its recorded status is reported.
    pub fn handle_trap(&self, process: &Arc<Process>, frame: &mut TrapFrame) -> TrapOutcome {
        if let Some(status) = process.exit_status() {
            log::warn!("[TRAP] {} trapped after exit({})", process.pid(), status);
            return TrapOutcome::Exited(status);
        }
        syscall::dispatch(self, process, frame)
    }
}
