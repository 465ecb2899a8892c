//! System Call Input Validation
//!
//! Every address a syscall receives from user mode passes through here
//! before the kernel touches it.
//!
//! # Security Principles
//! - Validate ALL inputs before use
//! - Fail-secure: deny by default
//! - Check every page a range touches, not just its endpoints
//! - Copy into kernel memory; handlers never hold raw user pointers
//!
//! A failed check is a `Fault`. The dispatcher answers a fault by
//! terminating the calling process, so nothing here returns a sentinel.

use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use crate::mm::address::WORD_SIZE;
use crate::mm::{AddressSpace, PageFlags, VirtAddr};

/// A protection violation by the calling process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Null pointer.
    Null,
    /// Address at or above the user/kernel split.
    KernelAddress(VirtAddr),
    /// Page not mapped for user access.
    Unmapped(VirtAddr),
    /// Kernel asked to write into a page the process cannot write.
    ReadOnly(VirtAddr),
    /// `addr + len` wraps the 32-bit address space.
    Overflow { addr: VirtAddr, len: u32 },
    /// The process no longer has an address space.
    NoAddressSpace,
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null pointer"),
            Self::KernelAddress(addr) => write!(f, "kernel address {}", addr),
            Self::Unmapped(addr) => write!(f, "unmapped address {}", addr),
            Self::ReadOnly(addr) => write!(f, "read-only page at {}", addr),
            Self::Overflow { addr, len } => {
                write!(f, "range {} + {:#x} overflows", addr, len)
            }
            Self::NoAddressSpace => write!(f, "address space already released"),
        }
    }
}

/// Check the page holding `addr` grants `required`.
fn check_page(space: &dyn AddressSpace, addr: VirtAddr, required: PageFlags) -> Result<(), Fault> {
    if addr.is_null() {
        return Err(Fault::Null);
    }
    if !addr.is_user() {
        return Err(Fault::KernelAddress(addr));
    }
    let flags = space.lookup(addr).ok_or(Fault::Unmapped(addr))?;
    if !flags.contains(PageFlags::USER) {
        return Err(Fault::Unmapped(addr));
    }
    if !flags.contains(required) {
        return Err(Fault::ReadOnly(addr));
    }
    Ok(())
}

/// True iff `addr` is non-null, a user address, and mapped for user access.
///
/// Never dereferences `addr`.
pub fn validate_address(space: &dyn AddressSpace, addr: VirtAddr) -> bool {
    check_page(space, addr, PageFlags::USER).is_ok()
}

/// Validate every byte of `[addr, addr + len)`.
///
/// Mappings change at page granularity, so the first byte of every page the
/// range touches is checked. A zero-length range is always valid.
pub fn validate_range(
    space: &dyn AddressSpace,
    addr: VirtAddr,
    len: u32,
    required: PageFlags,
) -> Result<(), Fault> {
    if len == 0 {
        return Ok(());
    }

    let last = addr
        .checked_add(len - 1)
        .ok_or(Fault::Overflow { addr, len })?;

    let mut page = addr;
    loop {
        check_page(space, page, required)?;
        match page.next_page() {
            Some(next) if next <= last => page = next,
            _ => return Ok(()),
        }
    }
}

/// Validate and copy a NUL-terminated string.
///
/// Walks from `addr` one byte at a time and validates each byte before it
/// is read; a single page lookup covers every byte of that page. Returns the
/// bytes without the terminator. Running into an invalid byte before the
/// terminator rejects the whole string.
pub fn validate_cstring(space: &dyn AddressSpace, addr: VirtAddr) -> Result<Vec<u8>, Fault> {
    let mut bytes = Vec::new();
    let mut cursor = addr;
    let mut checked_page = None;

    loop {
        if checked_page != Some(cursor.page_number()) {
            check_page(space, cursor, PageFlags::USER)?;
            checked_page = Some(cursor.page_number());
        }

        let mut byte = [0u8; 1];
        space.read(cursor, &mut byte);
        if byte[0] == 0 {
            return Ok(bytes);
        }
        bytes.push(byte[0]);

        cursor = cursor
            .checked_add(1)
            .ok_or(Fault::Overflow { addr, len: u32::MAX })?;
    }
}

/// Validate and copy `N` little-endian words starting at `addr`.
pub fn copy_words<const N: usize>(
    space: &dyn AddressSpace,
    addr: VirtAddr,
) -> Result<[u32; N], Fault> {
    let len = N as u32 * WORD_SIZE;
    validate_range(space, addr, len, PageFlags::USER)?;

    let mut raw = vec![0u8; len as usize];
    space.read(addr, &mut raw);

    let mut words = [0u32; N];
    for (word, chunk) in words.iter_mut().zip(raw.chunks_exact(WORD_SIZE as usize)) {
        *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    Ok(words)
}

/// A validated user-space buffer the kernel reads from.
///
/// Only constructed by `validate_user_read`, so holding one proves every
/// byte was mapped when the syscall was decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserBuffer {
    addr: VirtAddr,
    len: u32,
}

impl UserBuffer {
    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copy the buffer into kernel memory.
    ///
    /// `space` must be the address space the buffer was validated against.
    pub fn copy_in(&self, space: &dyn AddressSpace) -> Vec<u8> {
        let mut data = vec![0u8; self.len as usize];
        if !self.is_empty() {
            space.read(self.addr, &mut data);
        }
        data
    }
}

/// A validated user-space buffer the kernel writes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserBufferMut {
    addr: VirtAddr,
    len: u32,
}

impl UserBufferMut {
    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copy `data` out to user memory, truncated to the buffer length.
    ///
    /// Returns the number of bytes written.
    pub fn copy_out(&self, space: &mut dyn AddressSpace, data: &[u8]) -> usize {
        if self.is_empty() {
            return 0;
        }
        let n = data.len().min(self.len as usize);
        if n > 0 {
            space.write(self.addr, &data[..n]);
        }
        n
    }
}

/// Validate a user-space buffer the kernel will read.
///
/// # Security Checks
/// 1. Pointer is non-null and below the kernel split
/// 2. Pointer + length doesn't overflow
/// 3. Every touched page is mapped for user access
pub fn validate_user_read(
    space: &dyn AddressSpace,
    addr: VirtAddr,
    len: u32,
) -> Result<UserBuffer, Fault> {
    validate_range(space, addr, len, PageFlags::USER)?;
    Ok(UserBuffer { addr, len })
}

/// Validate a user-space buffer the kernel will write.
///
/// Same as read validation, plus every touched page must be writable.
pub fn validate_user_write(
    space: &dyn AddressSpace,
    addr: VirtAddr,
    len: u32,
) -> Result<UserBufferMut, Fault> {
    validate_range(space, addr, len, PageFlags::USER | PageFlags::WRITABLE)?;
    Ok(UserBufferMut { addr, len })
}
