//! Per-process handle table
//!
//! Maps small integer handles to open files.
//!
//! # Design
//! - Live files are keyed by handle; a counter hands out the next one
//! - Every access checks the handle was allocated and is still open
//! - Handles are allocated monotonically and never reused
//! - `MAX_HANDLES` bounds the files open at once, not the opens over the
//!   process's life

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::fmt;

use crate::fs::File;

/// Most files one process may hold open at once.
pub const MAX_HANDLES: usize = 1024;

/// A handle number as seen by user code.
///
/// This is a newtype to prevent using arbitrary integers as slot indices.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
#[repr(transparent)]
pub struct Fd(u32);

impl Fd {
    /// Console input.
    pub const STDIN: Self = Self(0);

    /// Console output.
    pub const STDOUT: Self = Self(1);

    /// First handle bound to a file.
    pub const FIRST_FILE: Self = Self(2);

    /// Wrap a raw argument word.
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// True for the console handles, which never name a file.
    #[inline]
    pub const fn is_reserved(self) -> bool {
        self.0 < Self::FIRST_FILE.0
    }
}

impl fmt::Display for Fd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fd {}", self.0)
    }
}

/// Error type for handle table operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdError {
    /// Handle 0 or 1.
    Reserved,
    /// The handle was never allocated by this process.
    OutOfRange,
    /// The handle was allocated and has since been closed.
    Closed,
    /// Too many open files, or the handle space is used up.
    TableFull,
}

impl fmt::Display for FdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reserved => write!(f, "reserved console handle"),
            Self::OutOfRange => write!(f, "handle never allocated"),
            Self::Closed => write!(f, "handle already closed"),
            Self::TableFull => write!(f, "handle table full"),
        }
    }
}

/// Open files of one process.
pub struct FdTable {
    open: BTreeMap<u32, Box<dyn File>>,
    /// Next handle to hand out.
    next: u32,
}

impl FdTable {
    pub const fn new() -> Self {
        Self {
            open: BTreeMap::new(),
            next: Fd::FIRST_FILE.0,
        }
    }

    /// Why `fd` has no file bound to it.
    fn unbound(&self, fd: Fd) -> FdError {
        if fd.is_reserved() {
            FdError::Reserved
        } else if fd.0 >= self.next {
            FdError::OutOfRange
        } else {
            FdError::Closed
        }
    }

    /// Bind `file` to the next handle.
    ///
    /// On failure the file is handed back so the caller decides where it
    /// gets dropped.
    pub fn insert(&mut self, file: Box<dyn File>) -> Result<Fd, (FdError, Box<dyn File>)> {
        if self.open.len() >= MAX_HANDLES {
            return Err((FdError::TableFull, file));
        }
        let Some(next) = self.next.checked_add(1) else {
            return Err((FdError::TableFull, file));
        };
        let fd = Fd(self.next);
        self.next = next;
        self.open.insert(fd.0, file);
        Ok(fd)
    }

    /// Look up the file bound to `fd`.
    pub fn lookup(&mut self, fd: Fd) -> Result<&mut dyn File, FdError> {
        let unbound = self.unbound(fd);
        match self.open.get_mut(&fd.0) {
            Some(file) => Ok(&mut **file),
            None => Err(unbound),
        }
    }

    /// Unbind `fd` and return its file.
    pub fn remove(&mut self, fd: Fd) -> Result<Box<dyn File>, FdError> {
        match self.open.remove(&fd.0) {
            Some(file) => Ok(file),
            None => Err(self.unbound(fd)),
        }
    }

    /// Unbind every live handle, in handle order.
    pub fn drain(&mut self) -> Vec<Box<dyn File>> {
        core::mem::take(&mut self.open).into_values().collect()
    }

    /// Number of live handles.
    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FdTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FdTable")
            .field("next", &self.next)
            .field("live", &self.len())
            .finish()
    }
}
