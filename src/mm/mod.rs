//! Memory management interface
//!
//! Provides:
//! - User virtual address type and layout constants
//! - The address-space interface the page-table subsystem implements
//!
//! # Security Principles
//! - User addresses are plain numbers until validated
//! - The user/kernel split is checked before any page lookup

pub mod address;
mod space;

pub use address::{VirtAddr, PAGE_SIZE, USER_TOP};
pub use space::{AddressSpace, PageFlags};
