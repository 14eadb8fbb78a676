//! Errors raised by [`RemoteMemoryStream`](crate::RemoteMemoryStream).

use std::fmt;
use std::io;
use thiserror::Error;

/// Which primitive a [`Error::MemoryAccess`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Read => "read",
            Operation::Write => "write",
        })
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// The stream has been closed.
    #[error("stream has been closed")]
    Disposed,

    /// The operation can never succeed on a remote memory stream.
    #[error("{0} is not supported")]
    Unsupported(&'static str),

    /// The native primitive failed, or moved fewer bytes than requested.
    #[error("failed to {operation} {requested} bytes at {address:#x} ({transferred} transferred): {source}")]
    MemoryAccess {
        operation: Operation,
        address: u64,
        requested: usize,
        transferred: usize,
        #[source]
        source: io::Error,
    },

    /// Moving the position would leave the 64-bit address space.
    #[error("address {position:#x} cannot be moved by {offset}")]
    AddressOverflow { position: u64, offset: i128 },

    /// Releasing an owned handle failed.
    #[error("failed to release process handle: {0}")]
    Release(#[source] io::Error),
}

impl Error {
    /// The raw OS error code behind a failed memory access or release, if the OS reported one.
    ///
    /// Partial transfers carry no code: the primitive itself succeeded.
    #[must_use]
    pub fn os_error(&self) -> Option<i32> {
        match self {
            Error::MemoryAccess { source, .. } | Error::Release(source) => source.raw_os_error(),
            _ => None,
        }
    }

    pub(crate) fn partial(
        operation: Operation,
        address: u64,
        requested: usize,
        transferred: usize,
    ) -> Error {
        let kind = match operation {
            Operation::Read => io::ErrorKind::UnexpectedEof,
            Operation::Write => io::ErrorKind::WriteZero,
        };
        Error::MemoryAccess {
            operation,
            address,
            requested,
            transferred,
            source: io::Error::new(kind, "partial copy"),
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> io::Error {
        let kind = match &err {
            Error::Disposed => io::ErrorKind::Other,
            Error::Unsupported(_) => io::ErrorKind::Unsupported,
            Error::MemoryAccess { source, .. } | Error::Release(source) => source.kind(),
            Error::AddressOverflow { .. } => io::ErrorKind::InvalidInput,
        };
        io::Error::new(kind, err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
