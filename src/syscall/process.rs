//! Process control syscalls: halt, exit, exec, wait, practice.

use alloc::sync::Arc;

use log::debug;

use crate::kernel::Kernel;
use crate::process::{Pid, Process};

use super::handler::{malformed, Arg, Flow, FAILED};
use super::validate::Fault;

/// Halt system call
///
/// Powers the machine off. No exit message is printed.
pub(super) fn sys_halt(_kernel: &Kernel, _process: &Arc<Process>, _args: &[Arg]) -> Result<Flow, Fault> {
    Ok(Flow::Halt)
}

/// Exit system call
///
/// Terminates the calling process.
///
/// # Arguments
/// * `status` - Exit status, reported to a waiting parent
///
/// # Security
/// No validation needed - any status code is acceptable
pub(super) fn sys_exit(_kernel: &Kernel, _process: &Arc<Process>, args: &[Arg]) -> Result<Flow, Fault> {
    let [Arg::Int(status)] = args else {
        return malformed("exit", args);
    };
    Ok(Flow::Exit(*status as i32))
}

/// Exec system call
///
/// Loads a program from a command line and starts it as a child.
///
/// # Arguments
/// * `cmdline` - Validated command line; the first word names the program
///
/// # Returns
/// The child's pid, or -1 if it cannot be loaded or started
///
/// # Security
/// The child is recorded before it can run, so only this process may
/// wait for it
pub(super) fn sys_exec(kernel: &Kernel, process: &Arc<Process>, args: &[Arg]) -> Result<Flow, Fault> {
    let [Arg::Str(cmdline)] = args else {
        return malformed("exec", args);
    };
    let Ok(cmdline) = core::str::from_utf8(cmdline) else {
        return Ok(Flow::Return(FAILED));
    };

    let result = kernel
        .spawn(cmdline, Some(process))
        .map_or(FAILED, Pid::as_u32);
    Ok(Flow::Return(result))
}

/// Wait system call
///
/// Blocks until a direct child exits and collects its status.
///
/// # Arguments
/// * `pid` - A pid this process received from `exec`
///
/// # Returns
/// The child's exit status, or -1 for a pid that is not a direct child
/// or was already waited for
///
/// # Security
/// The pid is only a lookup key into this process's own children
pub(super) fn sys_wait(kernel: &Kernel, process: &Arc<Process>, args: &[Arg]) -> Result<Flow, Fault> {
    let [Arg::Int(pid)] = args else {
        return malformed("wait", args);
    };
    let pid = Pid::from_raw(*pid);

    match process.children().wait(pid, &*kernel.scheduler) {
        Ok(status) => Ok(Flow::Return(status as u32)),
        Err(err) => {
            debug!("[SYSCALL] {}: wait({}) refused: {}", process.pid(), pid, err);
            Ok(Flow::Return(FAILED))
        }
    }
}

/// Returns its argument plus one, wrapping.
pub(super) fn sys_practice(_kernel: &Kernel, _process: &Arc<Process>, args: &[Arg]) -> Result<Flow, Fault> {
    let [Arg::Int(n)] = args else {
        return malformed("practice", args);
    };
    Ok(Flow::Return(n.wrapping_add(1)))
}
