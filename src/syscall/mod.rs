//! System Call Interface
//!
//! The boundary between user processes and kernel-owned resources.
//!
//! # Security Model
//! - Whitelist approach: only requests listed in the syscall table exist
//! - Every pointer argument is validated against the caller's address space
//!   before the handler runs
//! - A protection violation terminates the caller; bad handles and bad
//!   names only fail the request
//! - Invalid inputs never panic
//!
//! # Syscalls
//! - 0: halt()
//! - 1: exit(status)
//! - 2: exec(cmdline)
//! - 3: wait(pid)
//! - 4: create(name, initial_size)
//! - 5: remove(name)
//! - 6: open(name)
//! - 7: filesize(fd)
//! - 8: read(fd, buf, len)
//! - 9: write(fd, buf, len)
//! - 10: seek(fd, position)
//! - 11: tell(fd)
//! - 12: close(fd)
//! - 13: practice(n)

mod file;
mod handler;
mod process;
pub mod validate;

pub use handler::{dispatch, lookup, numbers, ArgKind, SyscallEntry, ARG_WORDS};
pub use validate::{Fault, UserBuffer, UserBufferMut};
