//! System Call Dispatcher
//!
//! Decodes a trapped request and routes it through the syscall table.
//!
//! # Security Considerations
//! - The argument block is validated before any word of it is read
//! - Each table entry declares which arguments are strings or buffers; the
//!   dispatcher validates all of them before the handler runs
//! - Unknown syscall numbers terminate the caller
//! - Any `Fault` terminates the caller with `EXIT_FAULT`

use alloc::sync::Arc;
use alloc::vec::Vec;

use log::{debug, error, warn};

use crate::kernel::Kernel;
use crate::mm::{AddressSpace, VirtAddr};
use crate::process::{Process, EXIT_FAULT};
use crate::trap::{TrapFrame, TrapOutcome};

use super::validate::{
    self, copy_words, validate_cstring, Fault, UserBuffer, UserBufferMut,
};
use super::{file, process};

/// System call numbers
pub mod numbers {
    pub const SYS_HALT: u32 = 0;
    pub const SYS_EXIT: u32 = 1;
    pub const SYS_EXEC: u32 = 2;
    pub const SYS_WAIT: u32 = 3;
    pub const SYS_CREATE: u32 = 4;
    pub const SYS_REMOVE: u32 = 5;
    pub const SYS_OPEN: u32 = 6;
    pub const SYS_FILESIZE: u32 = 7;
    pub const SYS_READ: u32 = 8;
    pub const SYS_WRITE: u32 = 9;
    pub const SYS_SEEK: u32 = 10;
    pub const SYS_TELL: u32 = 11;
    pub const SYS_CLOSE: u32 = 12;
    pub const SYS_PRACTICE: u32 = 13;
}

/// Argument words following the syscall number in the fixed block.
pub const ARG_WORDS: usize = 3;

/// Return value reporting a failed request (-1 in the caller's view).
pub const FAILED: u32 = -1i32 as u32;

/// How the dispatcher must treat an argument word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgKind {
    /// Plain integer.
    Int,
    /// Pointer to a NUL-terminated string.
    Str,
    /// Pointer to a buffer the kernel reads; its size is argument `len`.
    Buf { len: usize },
    /// Pointer to a buffer the kernel writes; its size is argument `len`.
    BufMut { len: usize },
}

/// A decoded, validated argument.
#[derive(Debug)]
pub enum Arg {
    Int(u32),
    Str(Vec<u8>),
    Buf(UserBuffer),
    BufMut(UserBufferMut),
}

/// What the dispatcher does after a handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    /// Resume the caller with this value in its return slot.
    Return(u32),
    /// Terminate the caller.
    Exit(i32),
    /// Power the machine off.
    Halt,
}

pub(crate) type Handler = fn(&Kernel, &Arc<Process>, &[Arg]) -> Result<Flow, Fault>;

/// One row of the syscall table.
pub struct SyscallEntry {
    pub number: u32,
    pub name: &'static str,
    pub args: &'static [ArgKind],
    handler: Handler,
}

impl core::fmt::Debug for SyscallEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SyscallEntry")
            .field("number", &self.number)
            .field("name", &self.name)
            .field("args", &self.args)
            .finish()
    }
}

use numbers::*;
use ArgKind::{Buf, BufMut, Int, Str};

/// Indexed by syscall number.
static TABLE: [SyscallEntry; 14] = [
    SyscallEntry { number: SYS_HALT, name: "halt", args: &[], handler: process::sys_halt },
    SyscallEntry { number: SYS_EXIT, name: "exit", args: &[Int], handler: process::sys_exit },
    SyscallEntry { number: SYS_EXEC, name: "exec", args: &[Str], handler: process::sys_exec },
    SyscallEntry { number: SYS_WAIT, name: "wait", args: &[Int], handler: process::sys_wait },
    SyscallEntry { number: SYS_CREATE, name: "create", args: &[Str, Int], handler: file::sys_create },
    SyscallEntry { number: SYS_REMOVE, name: "remove", args: &[Str], handler: file::sys_remove },
    SyscallEntry { number: SYS_OPEN, name: "open", args: &[Str], handler: file::sys_open },
    SyscallEntry { number: SYS_FILESIZE, name: "filesize", args: &[Int], handler: file::sys_filesize },
    SyscallEntry { number: SYS_READ, name: "read", args: &[Int, BufMut { len: 2 }, Int], handler: file::sys_read },
    SyscallEntry { number: SYS_WRITE, name: "write", args: &[Int, Buf { len: 2 }, Int], handler: file::sys_write },
    SyscallEntry { number: SYS_SEEK, name: "seek", args: &[Int, Int], handler: file::sys_seek },
    SyscallEntry { number: SYS_TELL, name: "tell", args: &[Int], handler: file::sys_tell },
    SyscallEntry { number: SYS_CLOSE, name: "close", args: &[Int], handler: file::sys_close },
    SyscallEntry { number: SYS_PRACTICE, name: "practice", args: &[Int], handler: process::sys_practice },
];

/// Find the table entry for `number`.
pub fn lookup(number: u32) -> Option<&'static SyscallEntry> {
    TABLE
        .get(number as usize)
        .filter(|entry| entry.number == number)
}

/// Read and validate the arguments of the request at `sp`.
///
/// Returns `Ok(Err(number))` for an unknown syscall number.
fn decode(
    space: &dyn AddressSpace,
    sp: VirtAddr,
) -> Result<Result<(&'static SyscallEntry, Vec<Arg>), u32>, Fault> {
    let block: [u32; 1 + ARG_WORDS] = copy_words(space, sp)?;
    let words = &block[1..];

    let Some(entry) = lookup(block[0]) else {
        return Ok(Err(block[0]));
    };

    let mut args = Vec::with_capacity(entry.args.len());
    for (word, kind) in words.iter().zip(entry.args) {
        let addr = VirtAddr::new(*word);
        let arg = match *kind {
            Int => Arg::Int(*word),
            Str => Arg::Str(validate_cstring(space, addr)?),
            Buf { len } => Arg::Buf(validate::validate_user_read(space, addr, words[len])?),
            BufMut { len } => Arg::BufMut(validate::validate_user_write(space, addr, words[len])?),
        };
        args.push(arg);
    }
    Ok(Ok((entry, args)))
}

/// Dispatch the system call trapped in `frame`.
///
/// # Returns
/// What the trap glue must do next. For `Resume`, the result has already
/// been written to `frame.eax`.
pub fn dispatch(kernel: &Kernel, process: &Arc<Process>, frame: &mut TrapFrame) -> TrapOutcome {
    let decoded = process
        .with_space(|space| decode(space, VirtAddr::new(frame.esp)))
        .and_then(|decoded| decoded);

    let (entry, args) = match decoded {
        Ok(Ok(request)) => request,
        Ok(Err(number)) => {
            warn!("[SYSCALL] {}: unknown syscall {}", process.pid(), number);
            return terminate(kernel, process, frame, EXIT_FAULT);
        }
        Err(fault) => {
            warn!("[SYSCALL] {}: {}", process.pid(), fault);
            return terminate(kernel, process, frame, EXIT_FAULT);
        }
    };

    debug!("[SYSCALL] {}: {}{:?}", process.pid(), entry.name, args);

    match (entry.handler)(kernel, process, &args) {
        Ok(Flow::Return(value)) => {
            frame.eax = value;
            TrapOutcome::Resume
        }
        Ok(Flow::Exit(status)) => terminate(kernel, process, frame, status),
        Ok(Flow::Halt) => {
            kernel.power.power_off();
            TrapOutcome::Halted
        }
        Err(fault) => {
            warn!("[SYSCALL] {}: {} during {}", process.pid(), fault, entry.name);
            terminate(kernel, process, frame, EXIT_FAULT)
        }
    }
}

fn terminate(kernel: &Kernel, process: &Process, frame: &mut TrapFrame, status: i32) -> TrapOutcome {
    frame.eax = status as u32;
    kernel.exit_process(process, status);
    TrapOutcome::Exited(status)
}

/// Handler arguments did not match the table. Only a kernel bug gets here.
pub(crate) fn malformed(name: &str, args: &[Arg]) -> Result<Flow, Fault> {
    error!("[SYSCALL] {}: arguments {:?} do not match the table", name, args);
    Ok(Flow::Exit(EXIT_FAULT))
}
