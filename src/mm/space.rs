//! Process Address Space Interface
//!
//! The page-table subsystem lives outside this crate. The trap layer only
//! needs three things from it: "what are the permissions of this page",
//! and byte copies to and from addresses that have already been validated.
//!
//! # Security Properties
//! - `lookup` never faults; it only inspects the page tables
//! - `read`/`write` are only reached through validated user buffers
//! - Dropping the address space releases every frame it maps

use bitflags::bitflags;

use super::address::VirtAddr;

bitflags! {
    /// Permissions of a mapped user page.
    ///
    /// A page that is not mapped at all has no flags; `AddressSpace::lookup`
    /// returns `None` for it.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct PageFlags: u32 {
        /// Accessible from user mode.
        const USER = 1 << 0;
        /// Writable.
        const WRITABLE = 1 << 1;
        /// Executable.
        const EXECUTABLE = 1 << 2;

        /// User data: readable and writable by user.
        const USER_DATA = Self::USER.bits() | Self::WRITABLE.bits();
        /// User code: readable and executable, not writable.
        const USER_CODE = Self::USER.bits() | Self::EXECUTABLE.bits();
    }
}

/// A process's virtual address space, as seen by the trap layer.
pub trait AddressSpace: Send {
    /// Permissions of the page containing `addr`, or `None` if unmapped.
    fn lookup(&self, addr: VirtAddr) -> Option<PageFlags>;

    /// Copy `dst.len()` bytes starting at `addr` into `dst`.
    ///
    /// Callers guarantee every byte of the range was validated.
    fn read(&self, addr: VirtAddr, dst: &mut [u8]);

    /// Copy `src` into user memory starting at `addr`.
    ///
    /// Callers guarantee every byte of the range was validated writable.
    fn write(&mut self, addr: VirtAddr, src: &[u8]);
}
