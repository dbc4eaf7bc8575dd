//! Broker status codes.
//!
//! Every fallible broker operation reports one of the NT-style status
//! values below. The same values travel on the wire in
//! [`ReplyHeader::error`](crate::protocol::ReplyHeader), so the enum doubles
//! as the client-visible error taxonomy.

use std::io;

use thiserror::Error;

/// A status reported by the broker.
///
/// Most variants are errors. [`Status::Pending`], [`Status::Alerted`] and
/// [`Status::Cancelled`] are informational codes used by the async I/O
/// protocol; they never come out of a `Result::Err` of a request handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum Status {
    #[error("operation is pending")]
    Pending,

    #[error("operation was alerted")]
    Alerted,

    #[error("operation was cancelled")]
    Cancelled,

    #[error("unsuccessful")]
    Unsuccessful,

    #[error("not implemented")]
    NotImplemented,

    #[error("invalid handle")]
    InvalidHandle,

    #[error("invalid parameter")]
    InvalidParameter,

    #[error("not enough memory")]
    NoMemory,

    #[error("access denied")]
    AccessDenied,

    #[error("object type mismatch")]
    ObjectTypeMismatch,

    #[error("disk full")]
    DiskFull,

    #[error("bad device type")]
    BadDeviceType,

    #[error("too many opened files")]
    TooManyOpenedFiles,
}

/// Result type used throughout the broker.
pub type Result<T> = std::result::Result<T, Status>;

/// Wire value reported for a successful request.
pub const STATUS_SUCCESS: u32 = 0;

impl Status {
    /// Returns the 32-bit NT status value for this status.
    pub const fn code(self) -> u32 {
        match self {
            Status::Pending => 0x0000_0103,
            Status::Alerted => 0x0000_0101,
            Status::Cancelled => 0xc000_0120,
            Status::Unsuccessful => 0xc000_0001,
            Status::NotImplemented => 0xc000_0002,
            Status::InvalidHandle => 0xc000_0008,
            Status::InvalidParameter => 0xc000_000d,
            Status::NoMemory => 0xc000_0017,
            Status::AccessDenied => 0xc000_0022,
            Status::ObjectTypeMismatch => 0xc000_0024,
            Status::DiskFull => 0xc000_007f,
            Status::BadDeviceType => 0xc000_00cb,
            Status::TooManyOpenedFiles => 0xc000_011f,
        }
    }

    /// Maps a wire value back to a status.
    ///
    /// Returns `None` for [`STATUS_SUCCESS`] and for codes the broker never
    /// produces.
    pub fn from_code(code: u32) -> Option<Self> {
        const ALL: [Status; 13] = [
            Status::Pending,
            Status::Alerted,
            Status::Cancelled,
            Status::Unsuccessful,
            Status::NotImplemented,
            Status::InvalidHandle,
            Status::InvalidParameter,
            Status::NoMemory,
            Status::AccessDenied,
            Status::ObjectTypeMismatch,
            Status::DiskFull,
            Status::BadDeviceType,
            Status::TooManyOpenedFiles,
        ];

        ALL.into_iter().find(|s| s.code() == code)
    }

    /// Translates a Unix `errno` value.
    pub fn from_errno(errno: i32) -> Self {
        match errno {
            libc::EBADF => Status::InvalidHandle,
            libc::EACCES | libc::EPERM | libc::EROFS => Status::AccessDenied,
            libc::ENOMEM => Status::NoMemory,
            libc::ENOSPC | libc::EDQUOT => Status::DiskFull,
            libc::EINVAL => Status::InvalidParameter,
            libc::EMFILE | libc::ENFILE => Status::TooManyOpenedFiles,
            libc::ENOSYS | libc::EOPNOTSUPP => Status::NotImplemented,
            _ => Status::Unsuccessful,
        }
    }
}

impl From<io::Error> for Status {
    fn from(err: io::Error) -> Self {
        match err.raw_os_error() {
            Some(errno) => Status::from_errno(errno),
            None => match err.kind() {
                io::ErrorKind::PermissionDenied => Status::AccessDenied,
                io::ErrorKind::InvalidInput => Status::InvalidParameter,
                io::ErrorKind::OutOfMemory => Status::NoMemory,
                io::ErrorKind::Unsupported => Status::NotImplemented,
                _ => Status::Unsuccessful,
            },
        }
    }
}
