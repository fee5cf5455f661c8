//! Error taxonomy at the crate boundary.
//!
//! Every fallible entry point returns `Result<T, Error>`. There is no
//! journaling or crash recovery, so a failure here either reflects a
//! transient device error or a caller mistake; it never leaves on-disk
//! metadata in a torn state thanks to the allocators' rollback guards.

use core::fmt;

/// Errors surfaced across the driver boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The inode or data-block bitmap has no free bit.
    NoSpace,
    /// A block device read/write failed, including a buffer that is still
    /// not up-to-date after a synchronous flush.
    Io,
    /// A logical block index is out of the representable range in a
    /// non-create lookup, or a dentry slot index lies beyond its page.
    InvalidArg,
    /// A directory already has an entry with the requested name.
    Exists,
    /// A dentry name is longer than `DENTRY_NAME_LEN`.
    NameTooLong,
    /// Allocating the in-memory inode-cache extension failed.
    OutOfMemory,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::NoSpace => "no space left on device",
            Error::Io => "I/O error",
            Error::InvalidArg => "invalid argument",
            Error::Exists => "file exists",
            Error::NameTooLong => "name too long",
            Error::OutOfMemory => "out of memory",
        };
        f.write_str(msg)
    }
}

pub type Result<T> = core::result::Result<T, Error>;
