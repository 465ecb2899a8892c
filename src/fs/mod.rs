//! Filesystem gate
//!
//! The file store behind this layer is not reentrant. Every call into it,
//! including calls through an already open `File`, happens while holding
//! the single `FsGate` lock.
//!
//! # Design
//! - The gate is a service object owned by the kernel, not a global
//! - `FsGate::lock` returns a guard; dropping it releases the store on every
//!   path, early returns included

use alloc::boxed::Box;
use core::ops::{Deref, DerefMut};

use spin::{Mutex, MutexGuard};

/// An open file. Dropping it closes the file.
pub trait File: Send {
    /// Size of the file in bytes.
    fn length(&self) -> u32;

    /// Read from the current position, returning the bytes read.
    fn read(&mut self, buf: &mut [u8]) -> usize;

    /// Write at the current position, returning the bytes written.
    fn write(&mut self, buf: &[u8]) -> usize;

    /// Move the position. Seeking past the end is allowed.
    fn seek(&mut self, position: u32);

    /// Current position.
    fn tell(&self) -> u32;
}

/// The named-file store.
pub trait FileStore: Send {
    /// Create `name` with `initial_size` zero bytes. False if it exists.
    fn create(&mut self, name: &str, initial_size: u32) -> bool;

    /// Unlink `name`. Files already open under that name stay usable.
    fn remove(&mut self, name: &str) -> bool;

    fn open(&mut self, name: &str) -> Option<Box<dyn File>>;
}

/// Mutual exclusion around the file store.
pub struct FsGate {
    store: Mutex<Box<dyn FileStore>>,
}

impl FsGate {
    pub fn new(store: Box<dyn FileStore>) -> Self {
        Self {
            store: Mutex::new(store),
        }
    }

    /// Enter the gate, blocking while another process is inside.
    pub fn lock(&self) -> FsGuard<'_> {
        FsGuard(self.store.lock())
    }

    /// Run `f` inside the gate.
    pub fn with<R>(&self, f: impl FnOnce(&mut dyn FileStore) -> R) -> R {
        let mut guard = self.lock();
        f(&mut *guard)
    }
}

/// Proof of being inside the gate. Derefs to the store.
pub struct FsGuard<'a>(MutexGuard<'a, Box<dyn FileStore>>);

impl Deref for FsGuard<'_> {
    type Target = dyn FileStore;

    fn deref(&self) -> &Self::Target {
        &**self.0
    }
}

impl DerefMut for FsGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut **self.0
    }
}
