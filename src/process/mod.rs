//! Process control blocks
//!
//! A `Process` is shared as `Arc<Process>` between the scheduler thread that
//! runs it and the kernel. It owns its address space, its open files and the
//! records of its direct children. Its link to its parent is a `Weak` to the
//! record the parent owns, so a parent that has exited leaves nothing behind
//! for the child to post into.
//!
//! # Collaborators
//! - `Scheduler`: thread identity, block/unblock and starting new processes
//! - `Loader`: builds an address space from an executable in the file store

pub mod relation;

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::{Arc, Weak};
use core::fmt;

use spin::{Mutex, MutexGuard, Once};
use static_assertions::assert_impl_all;

use crate::fd::FdTable;
use crate::fs::{FileStore, FsGate};
use crate::mm::AddressSpace;
use crate::syscall::Fault;

pub use relation::{ChildRecord, ChildState, Children, WaitError};

/// Exit status of a process killed for a protection violation.
pub const EXIT_FAULT: i32 = -1;

/// A process identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(transparent)]
pub struct Pid(u32);

impl Pid {
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A scheduler thread identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ThreadId(pub u64);

/// The scheduler, as seen by the trap layer.
pub trait Scheduler: Send + Sync {
    /// The thread executing the current syscall.
    fn current(&self) -> ThreadId;

    /// Suspend the current thread until `unblock` is called for it.
    ///
    /// An `unblock` that arrives before `block` is not lost: `block` then
    /// returns immediately. Callers re-check their condition either way.
    fn block(&self);

    /// Make `thread` runnable again.
    fn unblock(&self, thread: ThreadId);

    /// Create a thread that enters user mode as `process`.
    fn start(&self, process: Arc<Process>) -> bool;
}

/// Process image loader.
pub trait Loader: Send + Sync {
    /// Load the executable named by the first word of `cmdline` and set up
    /// its initial stack. Runs inside the filesystem gate.
    fn load(&self, store: &mut dyn FileStore, cmdline: &str) -> Option<Box<dyn AddressSpace>>;
}

/// Process control block.
pub struct Process {
    pid: Pid,
    name: String,
    space: Mutex<Option<Box<dyn AddressSpace>>>,
    /// Only touched by this process's own thread during a syscall.
    files: Mutex<FdTable>,
    children: Children,
    parent: Weak<ChildRecord>,
    /// Set once, by the first termination.
    exit_status: Once<i32>,
}

assert_impl_all!(Process: Send, Sync);

impl Process {
    pub(crate) fn new(
        pid: Pid,
        name: &str,
        space: Box<dyn AddressSpace>,
        parent: Weak<ChildRecord>,
    ) -> Self {
        Self {
            pid,
            name: String::from(name),
            space: Mutex::new(Some(space)),
            files: Mutex::new(FdTable::new()),
            children: Children::new(),
            parent,
            exit_status: Once::new(),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_exited(&self) -> bool {
        self.exit_status.is_completed()
    }

    /// The status this process terminated with, if it has.
    pub fn exit_status(&self) -> Option<i32> {
        self.exit_status.get().copied()
    }

    /// Number of open file handles.
    pub fn open_files(&self) -> usize {
        self.files.lock().len()
    }

    /// Run `f` against this process's address space.
    pub fn with_space<R>(&self, f: impl FnOnce(&mut dyn AddressSpace) -> R) -> Result<R, Fault> {
        let mut guard = self.space.lock();
        let space = guard.as_mut().ok_or(Fault::NoAddressSpace)?;
        Ok(f(&mut **space))
    }

    pub(crate) fn files(&self) -> MutexGuard<'_, FdTable> {
        self.files.lock()
    }

    pub(crate) fn children(&self) -> &Children {
        &self.children
    }

    /// Tear the process down and hand `status` to the parent.
    ///
    /// Files are closed inside the gate and the address space is released
    /// before the status is posted, so a parent returning from `wait` never
    /// sees a child that still holds resources. Returns false if the
    /// process had already exited.
    pub(crate) fn terminate(&self, status: i32, gate: &FsGate, scheduler: &dyn Scheduler) -> bool {
        let mut first = false;
        self.exit_status.call_once(|| {
            first = true;
            status
        });
        if !first {
            return false;
        }

        let files = self.files.lock().drain();
        if !files.is_empty() {
            let _store = gate.lock();
            drop(files);
        }

        drop(self.space.lock().take());

        let orphans = self.children.release_all();
        if !orphans.is_empty() {
            log::debug!("[PROCESS] {} leaves {} orphan(s)", self.pid, orphans.len());
        }

        match self.parent.upgrade() {
            Some(record) => record.post_exit(status, scheduler),
            None => log::debug!("[PROCESS] {} has no parent waiting, status dropped", self.pid),
        }
        true
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.pid)
            .field("name", &self.name)
            .field("exited", &self.has_exited())
            .finish()
    }
}
