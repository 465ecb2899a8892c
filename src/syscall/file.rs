//! File syscalls: create, remove, open, filesize, read, write, seek, tell,
//! close.
//!
//! Every call into the store happens inside `kernel.fs`. A bad handle is
//! the caller's problem, not a protection violation: the call fails with
//! -1 (or does nothing, for `seek` and `close`) and the process continues.

use alloc::sync::Arc;
use alloc::vec;

use log::debug;

use crate::fd::{Fd, FdError};
use crate::kernel::Kernel;
use crate::process::Process;

use super::handler::{malformed, Arg, Flow, FAILED};
use super::validate::Fault;

/// Decode a file name. Empty or non-UTF-8 names are invalid.
fn file_name(bytes: &[u8]) -> Option<&str> {
    match core::str::from_utf8(bytes) {
        Ok(name) if !name.is_empty() => Some(name),
        _ => None,
    }
}

fn refuse(process: &Process, call: &str, fd: Fd, err: FdError) -> Flow {
    debug!("[SYSCALL] {}: {}({}) refused: {}", process.pid(), call, fd, err);
    Flow::Return(FAILED)
}

/// Like `refuse`, for calls with no result to report.
fn ignore(process: &Process, call: &str, fd: Fd, err: FdError) -> Flow {
    debug!("[SYSCALL] {}: {}({}) ignored: {}", process.pid(), call, fd, err);
    Flow::Return(0)
}

/// Create system call
///
/// Creates a file of `initial_size` zero bytes.
///
/// # Arguments
/// * `name` - Validated file name
/// * `initial_size` - Size in bytes
///
/// # Returns
/// 1 if the file was created, 0 if the name is invalid or taken
///
/// # Security
/// The name was copied into kernel memory by the dispatcher
pub(super) fn sys_create(kernel: &Kernel, _process: &Arc<Process>, args: &[Arg]) -> Result<Flow, Fault> {
    let [Arg::Str(name), Arg::Int(initial_size)] = args else {
        return malformed("create", args);
    };
    let Some(name) = file_name(name) else {
        return Ok(Flow::Return(0));
    };

    let created = kernel.fs.with(|store| store.create(name, *initial_size));
    Ok(Flow::Return(created as u32))
}

/// Remove system call
///
/// Unlinks a file. Handles already open on it stay usable.
///
/// # Returns
/// 1 on success, 0 otherwise
pub(super) fn sys_remove(kernel: &Kernel, _process: &Arc<Process>, args: &[Arg]) -> Result<Flow, Fault> {
    let [Arg::Str(name)] = args else {
        return malformed("remove", args);
    };
    let Some(name) = file_name(name) else {
        return Ok(Flow::Return(0));
    };

    let removed = kernel.fs.with(|store| store.remove(name));
    Ok(Flow::Return(removed as u32))
}

/// Open system call
///
/// Opens a file and binds it to the next free handle.
///
/// # Arguments
/// * `name` - Validated file name
///
/// # Returns
/// The new handle (2 or above), or -1 if the file cannot be opened
///
/// # Security
/// - Handles are per process and never reused
/// - A file that cannot be bound is closed inside the gate
pub(super) fn sys_open(kernel: &Kernel, process: &Arc<Process>, args: &[Arg]) -> Result<Flow, Fault> {
    let [Arg::Str(name)] = args else {
        return malformed("open", args);
    };
    let Some(name) = file_name(name) else {
        return Ok(Flow::Return(FAILED));
    };

    let mut files = process.files();
    let mut store = kernel.fs.lock();
    let Some(file) = store.open(name) else {
        return Ok(Flow::Return(FAILED));
    };

    match files.insert(file) {
        Ok(fd) => Ok(Flow::Return(fd.as_u32())),
        Err((err, file)) => {
            // Closed while still inside the gate.
            drop(file);
            drop(store);
            debug!("[SYSCALL] {}: open({}) refused: {}", process.pid(), name, err);
            Ok(Flow::Return(FAILED))
        }
    }
}

/// Size in bytes of the file behind a handle, or -1.
pub(super) fn sys_filesize(kernel: &Kernel, process: &Arc<Process>, args: &[Arg]) -> Result<Flow, Fault> {
    let [Arg::Int(fd)] = args else {
        return malformed("filesize", args);
    };
    let fd = Fd::from_raw(*fd);

    let mut files = process.files();
    let _store = kernel.fs.lock();
    match files.lookup(fd) {
        Ok(file) => Ok(Flow::Return(file.length())),
        Err(err) => Ok(refuse(process, "filesize", fd, err)),
    }
}

/// Read system call
///
/// Reads into a user buffer. Handle 0 reads the keyboard.
///
/// # Arguments
/// * `fd` - Handle; 0 for the console, 2 and up for files
/// * `buf` - User buffer, validated writable before this runs
/// * `len` - Buffer length
///
/// # Returns
/// Bytes read, or -1 for handle 1 or an unbound handle
///
/// # Security
/// - File data lands in a kernel buffer first; the gate is not held while
///   copying out
/// - The copy never exceeds the validated length
pub(super) fn sys_read(kernel: &Kernel, process: &Arc<Process>, args: &[Arg]) -> Result<Flow, Fault> {
    let [Arg::Int(fd), Arg::BufMut(buffer), Arg::Int(_)] = args else {
        return malformed("read", args);
    };
    let fd = Fd::from_raw(*fd);

    let mut data = vec![0u8; buffer.len() as usize];
    let count = if fd == Fd::STDIN {
        for byte in data.iter_mut() {
            *byte = kernel.console.get_byte();
        }
        data.len()
    } else if fd == Fd::STDOUT {
        return Ok(refuse(process, "read", fd, FdError::Reserved));
    } else {
        let mut files = process.files();
        let _store = kernel.fs.lock();
        match files.lookup(fd) {
            Ok(file) => file.read(&mut data),
            Err(err) => return Ok(refuse(process, "read", fd, err)),
        }
    };

    let copied = process.with_space(|space| buffer.copy_out(space, &data[..count]))?;
    Ok(Flow::Return(copied as u32))
}

/// Write system call
///
/// Writes a user buffer. Handle 1 writes to the console in one piece.
///
/// # Arguments
/// * `fd` - Handle; 1 for the console, 2 and up for files
/// * `buf` - User buffer, validated readable before this runs
/// * `len` - Buffer length
///
/// # Returns
/// Bytes written, or -1 for handle 0 or an unbound handle
///
/// # Security
/// The buffer is copied into kernel memory before the gate is entered
pub(super) fn sys_write(kernel: &Kernel, process: &Arc<Process>, args: &[Arg]) -> Result<Flow, Fault> {
    let [Arg::Int(fd), Arg::Buf(buffer), Arg::Int(_)] = args else {
        return malformed("write", args);
    };
    let fd = Fd::from_raw(*fd);

    if fd == Fd::STDIN {
        return Ok(refuse(process, "write", fd, FdError::Reserved));
    }

    let data = process.with_space(|space| buffer.copy_in(space))?;

    if fd == Fd::STDOUT {
        kernel.console.put_bytes(&data);
        return Ok(Flow::Return(data.len() as u32));
    }

    let mut files = process.files();
    let _store = kernel.fs.lock();
    match files.lookup(fd) {
        Ok(file) => Ok(Flow::Return(file.write(&data) as u32)),
        Err(err) => Ok(refuse(process, "write", fd, err)),
    }
}

/// Move the position of an open file. Does nothing for an unbound handle.
pub(super) fn sys_seek(kernel: &Kernel, process: &Arc<Process>, args: &[Arg]) -> Result<Flow, Fault> {
    let [Arg::Int(fd), Arg::Int(position)] = args else {
        return malformed("seek", args);
    };
    let fd = Fd::from_raw(*fd);

    let mut files = process.files();
    let _store = kernel.fs.lock();
    match files.lookup(fd) {
        Ok(file) => {
            file.seek(*position);
            Ok(Flow::Return(0))
        }
        Err(err) => Ok(ignore(process, "seek", fd, err)),
    }
}

/// Current position of an open file, or -1.
pub(super) fn sys_tell(kernel: &Kernel, process: &Arc<Process>, args: &[Arg]) -> Result<Flow, Fault> {
    let [Arg::Int(fd)] = args else {
        return malformed("tell", args);
    };
    let fd = Fd::from_raw(*fd);

    let mut files = process.files();
    let _store = kernel.fs.lock();
    match files.lookup(fd) {
        Ok(file) => Ok(Flow::Return(file.tell())),
        Err(err) => Ok(refuse(process, "tell", fd, err)),
    }
}

/// Close system call
///
/// Unbinds a handle and closes its file inside the gate. Closing an
/// unbound handle does nothing.
///
/// # Returns
/// Always 0
pub(super) fn sys_close(kernel: &Kernel, process: &Arc<Process>, args: &[Arg]) -> Result<Flow, Fault> {
    let [Arg::Int(fd)] = args else {
        return malformed("close", args);
    };
    let fd = Fd::from_raw(*fd);

    let removed = process.files().remove(fd);
    match removed {
        Ok(file) => {
            let _store = kernel.fs.lock();
            drop(file);
            Ok(Flow::Return(0))
        }
        Err(err) => Ok(ignore(process, "close", fd, err)),
    }
}
