//! Open-file handles
//!
//! Each process owns one `FdTable`. Handles are small integers handed to
//! user code; the table is the only way back from a handle to a file.
//!
//! # Security Properties
//! - Handles are checked on every access, never used as raw indices
//! - Console handles 0 and 1 are never bound to files
//! - A closed handle stays invalid for the life of the process

mod table;

pub use table::{Fd, FdError, FdTable, MAX_HANDLES};
