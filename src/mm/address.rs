//! User Virtual Address Type
//!
//! Type-safe wrapper for addresses that arrive from user mode, either in the
//! saved stack pointer or as syscall argument words.
//!
//! # Security Properties
//! - A `VirtAddr` is only a number: it cannot be dereferenced
//! - Arithmetic is checked so a range can never wrap around the address space
//! - The user/kernel split is a single constant, checked in one place

use core::fmt;

/// Page size (4 KiB)
pub const PAGE_SIZE: u32 = 4096;
/// Page size mask
pub const PAGE_MASK: u32 = PAGE_SIZE - 1;
/// Bits to shift for page number
pub const PAGE_SHIFT: u32 = 12;

/// First address above user space. Everything from here up belongs to the
/// kernel and is never valid as a syscall argument.
pub const USER_TOP: u32 = 0xC000_0000;

/// Size in bytes of one argument word on the user stack.
pub const WORD_SIZE: u32 = 4;

/// A user virtual address.
///
/// The user ABI is 32-bit, so addresses are `u32`. Nothing about a
/// `VirtAddr` says whether it is mapped; see `syscall::validate`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct VirtAddr(u32);

impl VirtAddr {
    /// The null address.
    pub const NULL: Self = Self(0);

    #[inline]
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    /// Get the raw address value.
    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Align the address down to the start of its page.
    #[inline]
    pub const fn align_down(self) -> Self {
        Self(self.0 & !PAGE_MASK)
    }

    /// Get the page offset (lowest 12 bits).
    #[inline]
    pub const fn page_offset(self) -> u32 {
        self.0 & PAGE_MASK
    }

    /// Get the virtual page number.
    #[inline]
    pub const fn page_number(self) -> u32 {
        self.0 >> PAGE_SHIFT
    }

    /// Add an offset, returning `None` on overflow.
    #[inline]
    pub const fn checked_add(self, offset: u32) -> Option<Self> {
        match self.0.checked_add(offset) {
            Some(addr) => Some(Self(addr)),
            None => None,
        }
    }

    /// Start of the following page, or `None` for the last page.
    #[inline]
    pub const fn next_page(self) -> Option<Self> {
        self.align_down().checked_add(PAGE_SIZE)
    }

    /// Check if this is a user address (below the kernel split).
    #[inline]
    pub const fn is_user(self) -> bool {
        self.0 < USER_TOP
    }
}

impl fmt::Debug for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtAddr({:#010x})", self.0)
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}
