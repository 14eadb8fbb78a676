//! The OS-level calls a [`RemoteMemoryStream`](crate::RemoteMemoryStream) is built on.

use std::io;

/// Raw access to another process's address space through a process handle.
///
/// Implementors report how many bytes actually moved; the stream decides what a short
/// transfer means. Errors should carry the OS error code (`io::Error::last_os_error()` or
/// `From<Errno>`) so callers can diagnose them.
///
/// The handle type itself must not release anything on `Drop`: the stream only gives it
/// up through [`close`](NativeMemory::close) when it owns it, and simply forgets it when
/// it is borrowed.
pub trait NativeMemory {
    /// Copy `buf.len()` bytes starting at `address` in the target into `buf`.
    fn read_memory(&self, address: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Copy `buf` into the target starting at `address`.
    fn write_memory(&self, address: u64, buf: &[u8]) -> io::Result<usize>;

    /// Release the handle.
    fn close(self) -> io::Result<()>;
}

pub(crate) fn address_to_usize(address: u64) -> io::Result<usize> {
    usize::try_from(address).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("address {address:#x} does not fit this platform's pointer width"),
        )
    })
}
