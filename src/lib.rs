//! usergate - syscall trap layer for a small teaching kernel
//!
//! The trusted boundary between an unprivileged process and kernel-owned
//! resources: a request crossing from user mode is decoded, every address
//! it references is proven mapped into the caller, and only then is it
//! dispatched to a privileged operation.
//!
//! # Components
//! - `syscall::validate`: user memory validation
//! - `syscall`: request dispatch through a static table
//! - `fd`: per-process open-file handles
//! - `fs`: the filesystem gate serializing access to the file store
//! - `process`: process control blocks, exec/exit/wait bookkeeping
//!
//! # Integration
//! The page tables, scheduler, file store, console and loader are provided
//! by the embedding kernel through the traits in `mm`, `process`, `fs` and
//! `drivers`, bundled into `Collaborators` and handed to `Kernel::new`.
//! The trap glue then calls `Kernel::handle_trap` for every syscall.
//!
//! # Security Features
//! - No user pointer is dereferenced before validation
//! - Protection violations terminate the offending process only
//! - Wait is restricted to direct children, once per child

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

extern crate alloc;

pub mod drivers;
pub mod fd;
pub mod fs;
pub mod kernel;
pub mod mm;
pub mod process;
pub mod syscall;
pub mod trap;

#[cfg(test)]
mod testing;

pub use kernel::{Collaborators, Kernel};
pub use process::{Pid, Process};
pub use trap::{TrapFrame, TrapOutcome};
