use crate::access::{self, Access};
use crate::error::{Error, Operation, Result};
use crate::native::NativeMemory;
use debug_ignore::DebugIgnore;
use flagset::FlagSet;
use std::io::{self, SeekFrom};

/// Where a new stream points before the first seek.
pub const DEFAULT_BASE_ADDRESS: u64 = 0x40_0000;

/// Size of the scratch buffer a new stream starts with.
pub const INITIAL_SCRATCH_CAPACITY: usize = 0x100;

/// Whether closing the stream releases its process handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// The stream releases the handle when it is closed or dropped.
    Owned,
    /// The caller keeps the handle; the stream never releases it.
    Borrowed,
}

/// Random-access byte stream over another process's address space.
///
/// The position is an absolute virtual address in the target, not an offset. Nothing is
/// checked against the target's mappings: reading or writing an unmapped address is
/// reported by the OS as a failed [`Error::MemoryAccess`].
///
/// Transfers are all-or-nothing. A primitive that moves fewer bytes than requested is an
/// error, never a short read, and the position only advances on success.
///
/// Every transfer is staged through one internal scratch buffer, so all operations take
/// `&mut self`. Share a stream between threads behind a `Mutex`, or open one stream per
/// thread; separate streams over the same process do not interfere.
///
/// The handle is released by [`close`](RemoteMemoryStream::close), or on drop if the
/// caller never closed it. Only `close` reports a failed release.
#[derive(Debug)]
pub struct RemoteMemoryStream<H: NativeMemory> {
    handle: Option<DebugIgnore<H>>,
    access: FlagSet<Access>,
    ownership: Ownership,
    position: u64,
    scratch: DebugIgnore<Vec<u8>>,
    disposed: bool,
}

impl<H: NativeMemory> RemoteMemoryStream<H> {
    pub fn new(handle: H, access: impl Into<FlagSet<Access>>, ownership: Ownership) -> Self {
        let access = access.into();
        log::debug!(
            "opening {} stream over {:?} process handle",
            access::describe(access),
            ownership
        );
        RemoteMemoryStream {
            handle: Some(DebugIgnore(handle)),
            access,
            ownership,
            position: DEFAULT_BASE_ADDRESS,
            scratch: DebugIgnore(vec![0; INITIAL_SCRATCH_CAPACITY]),
            disposed: false,
        }
    }

    /// A stream that releases `handle` when closed.
    pub fn owned(handle: H, access: impl Into<FlagSet<Access>>) -> Self {
        Self::new(handle, access, Ownership::Owned)
    }

    /// A stream over a handle the caller keeps ownership of.
    pub fn borrowed(handle: H, access: impl Into<FlagSet<Access>>) -> Self {
        Self::new(handle, access, Ownership::Borrowed)
    }

    #[must_use]
    pub fn with_position(mut self, address: u64) -> Self {
        self.position = address;
        self
    }

    pub fn can_read(&self) -> bool {
        self.handle.is_some() && self.access.contains(Access::Read)
    }

    pub fn can_write(&self) -> bool {
        self.handle.is_some() && self.access.contains(Access::Write)
    }

    pub fn can_seek(&self) -> bool {
        self.handle.is_some()
    }

    /// Transfers block until the OS call returns; there is no timeout to configure.
    pub fn can_timeout(&self) -> bool {
        false
    }

    pub fn access(&self) -> FlagSet<Access> {
        self.access
    }

    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn set_position(&mut self, address: u64) -> Result<()> {
        self.check_disposed()?;
        self.position = address;
        Ok(())
    }

    pub fn scratch_capacity(&self) -> usize {
        self.scratch.len()
    }

    /// Always fails: the extent of the remote address space is not tracked.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> Result<u64> {
        Err(Error::Unsupported("length"))
    }

    /// Always fails once the disposed check passes.
    pub fn set_len(&mut self, _len: u64) -> Result<()> {
        self.check_disposed()?;
        Err(Error::Unsupported("set_len"))
    }

    /// Fill `buf` from the current address and advance past it.
    ///
    /// Returns `buf.len()`; anything less is reported as [`Error::MemoryAccess`].
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.check_disposed()?;
        if !self.access.contains(Access::Read) {
            return Err(Error::Unsupported("reading without read access"));
        }
        let count = buf.len();
        if count == 0 {
            return Ok(0);
        }
        let end = self.advance(count)?;
        self.reserve(count);

        let address = self.position;
        let handle = self.handle.as_deref().ok_or(Error::Disposed)?;
        let scratch = &mut self.scratch.0[..count];
        let transferred = handle
            .read_memory(address, scratch)
            .map_err(|source| Error::MemoryAccess {
                operation: Operation::Read,
                address,
                requested: count,
                transferred: 0,
                source,
            })?;
        if transferred != count {
            return Err(Error::partial(Operation::Read, address, count, transferred));
        }

        buf.copy_from_slice(scratch);
        log::trace!("read {} bytes at {:#x}", count, address);
        self.position = end;
        Ok(count)
    }

    pub fn read_byte(&mut self) -> Result<u8> {
        let mut byte = [0];
        self.read(&mut byte)?;
        Ok(byte[0])
    }

    /// Write all of `buf` at the current address and advance past it.
    pub fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.check_disposed()?;
        if !self.access.contains(Access::Write) {
            return Err(Error::Unsupported("writing without write access"));
        }
        let count = buf.len();
        if count == 0 {
            return Ok(());
        }
        let end = self.advance(count)?;
        self.reserve(count);

        let address = self.position;
        let handle = self.handle.as_deref().ok_or(Error::Disposed)?;
        let scratch = &mut self.scratch.0[..count];
        scratch.copy_from_slice(buf);
        let transferred = handle
            .write_memory(address, scratch)
            .map_err(|source| Error::MemoryAccess {
                operation: Operation::Write,
                address,
                requested: count,
                transferred: 0,
                source,
            })?;
        if transferred != count {
            return Err(Error::partial(Operation::Write, address, count, transferred));
        }

        log::trace!("wrote {} bytes at {:#x}", count, address);
        self.position = end;
        Ok(())
    }

    pub fn write_byte(&mut self, value: u8) -> Result<()> {
        self.write(&[value])
    }

    /// Move to an absolute address, or relative to the current one.
    ///
    /// `SeekFrom::End` is rejected as unsupported since the stream has no end.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.check_disposed()?;
        let position = match pos {
            SeekFrom::Start(address) => address,
            SeekFrom::Current(offset) => self.position.checked_add_signed(offset).ok_or(
                Error::AddressOverflow {
                    position: self.position,
                    offset: offset.into(),
                },
            )?,
            SeekFrom::End(_) => return Err(Error::Unsupported("seeking from the end")),
        };
        log::debug!("seek {:#x} -> {:#x}", self.position, position);
        self.position = position;
        Ok(position)
    }

    /// Nothing is buffered between calls, so this only checks the stream is open.
    pub fn flush(&mut self) -> Result<()> {
        self.check_disposed()
    }

    /// Release the handle if owned and mark the stream closed.
    ///
    /// Only the first call does anything; later calls return `Ok(())`.
    pub fn close(&mut self) -> Result<()> {
        if self.disposed {
            return Ok(());
        }
        self.disposed = true;
        self.release().map_err(Error::Release)
    }

    /// Close the stream and hand the process handle back without releasing it, whatever
    /// the ownership mode. Returns `None` if the stream was already closed.
    pub fn into_inner(mut self) -> Option<H> {
        self.disposed = true;
        self.handle.take().map(|handle| handle.0)
    }

    fn check_disposed(&self) -> Result<()> {
        if self.disposed {
            Err(Error::Disposed)
        } else {
            Ok(())
        }
    }

    fn advance(&self, count: usize) -> Result<u64> {
        u64::try_from(count)
            .ok()
            .and_then(|count| self.position.checked_add(count))
            .ok_or(Error::AddressOverflow {
                position: self.position,
                offset: count as i128,
            })
    }

    fn reserve(&mut self, count: usize) {
        if self.scratch.len() < count {
            log::debug!("growing scratch buffer {} -> {}", self.scratch.len(), count);
            self.scratch.0 = vec![0; count];
        }
    }

    fn release(&mut self) -> io::Result<()> {
        let Some(DebugIgnore(handle)) = self.handle.take() else {
            return Ok(());
        };
        match self.ownership {
            Ownership::Owned => {
                log::debug!("releasing process handle");
                handle.close()
            }
            Ownership::Borrowed => Ok(()),
        }
    }
}

impl<H: NativeMemory> Drop for RemoteMemoryStream<H> {
    fn drop(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        if let Err(err) = self.release() {
            log::warn!("failed to release process handle on drop: {}", err);
        }
    }
}

impl<H: NativeMemory> io::Read for RemoteMemoryStream<H> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(RemoteMemoryStream::read(self, buf)?)
    }
}

impl<H: NativeMemory> io::Write for RemoteMemoryStream<H> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        RemoteMemoryStream::write(self, buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(RemoteMemoryStream::flush(self)?)
    }
}

impl<H: NativeMemory> io::Seek for RemoteMemoryStream<H> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        Ok(RemoteMemoryStream::seek(self, pos)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    const BASE: u64 = 0x1000;

    #[derive(Default)]
    struct Target {
        memory: RefCell<Vec<u8>>,
        /// Bytes the next transfers should fall short by.
        short_by: Cell<usize>,
        calls: Cell<usize>,
        last_len: Cell<usize>,
        closes: Cell<usize>,
        /// OS code `close` should fail with.
        close_error: Cell<Option<i32>>,
    }

    struct Handle(Rc<Target>);

    impl Handle {
        fn range(&self, address: u64, len: usize) -> io::Result<std::ops::Range<usize>> {
            let size = self.0.memory.borrow().len() as u64;
            if address < BASE || address + len as u64 > BASE + size {
                return Err(io::Error::from_raw_os_error(14));
            }
            let start = (address - BASE) as usize;
            Ok(start..start + len - self.0.short_by.get().min(len))
        }
    }

    impl NativeMemory for Handle {
        fn read_memory(&self, address: u64, buf: &mut [u8]) -> io::Result<usize> {
            self.0.calls.set(self.0.calls.get() + 1);
            self.0.last_len.set(buf.len());
            let range = self.range(address, buf.len())?;
            let n = range.len();
            buf[..n].copy_from_slice(&self.0.memory.borrow()[range]);
            Ok(n)
        }

        fn write_memory(&self, address: u64, buf: &[u8]) -> io::Result<usize> {
            self.0.calls.set(self.0.calls.get() + 1);
            self.0.last_len.set(buf.len());
            let range = self.range(address, buf.len())?;
            let n = range.len();
            self.0.memory.borrow_mut()[range].copy_from_slice(&buf[..n]);
            Ok(n)
        }

        fn close(self) -> io::Result<()> {
            self.0.closes.set(self.0.closes.get() + 1);
            match self.0.close_error.get() {
                Some(code) => Err(io::Error::from_raw_os_error(code)),
                None => Ok(()),
            }
        }
    }

    fn target(size: usize) -> Rc<Target> {
        let target = Rc::new(Target::default());
        *target.memory.borrow_mut() = (0..size).map(|i| i as u8).collect();
        target
    }

    fn stream(target: &Rc<Target>, access: Access) -> RemoteMemoryStream<Handle> {
        RemoteMemoryStream::owned(Handle(Rc::clone(target)), access).with_position(BASE)
    }

    #[test]
    fn starts_at_default_base() {
        let target = target(16);
        let stream = RemoteMemoryStream::owned(Handle(target), Access::Read);
        assert_eq!(stream.position(), DEFAULT_BASE_ADDRESS);
        assert_eq!(stream.scratch_capacity(), INITIAL_SCRATCH_CAPACITY);
    }

    #[test]
    fn read_advances_by_count() {
        let target = target(64);
        let mut stream = stream(&target, Access::Read);
        let mut buf = [0; 4];
        assert_eq!(stream.read(&mut buf).unwrap(), 4);
        assert_eq!(buf, [0, 1, 2, 3]);
        assert_eq!(stream.position(), BASE + 4);
        assert_eq!(stream.read_byte().unwrap(), 4);
        assert_eq!(stream.position(), BASE + 5);
    }

    #[test]
    fn scratch_grows_to_exact_count_and_never_shrinks() {
        let target = target(0x400);
        let mut stream = stream(&target, Access::ReadWrite);
        let mut big = vec![0; 0x300];
        stream.read(&mut big).unwrap();
        assert_eq!(stream.scratch_capacity(), 0x300);
        assert_eq!(big[0x2ff], 0xff);

        stream.seek(SeekFrom::Start(BASE + 8)).unwrap();
        let mut small = [0; 2];
        stream.read(&mut small).unwrap();
        assert_eq!(small, [8, 9]);
        assert_eq!(stream.scratch_capacity(), 0x300);
        assert_eq!(target.last_len.get(), 2);
    }

    #[test]
    fn partial_read_is_an_error() {
        let target = target(64);
        target.short_by.set(1);
        let mut stream = stream(&target, Access::Read);
        let mut buf = [0xaa; 4];
        let err = stream.read(&mut buf).unwrap_err();
        assert!(matches!(
            err,
            Error::MemoryAccess {
                operation: Operation::Read,
                requested: 4,
                transferred: 3,
                ..
            }
        ));
        assert_eq!(buf, [0xaa; 4]);
        assert_eq!(stream.position(), BASE);
    }

    #[test]
    fn partial_write_is_an_error() {
        let target = target(64);
        target.short_by.set(2);
        let mut stream = stream(&target, Access::Write);
        let err = stream.write(&[1, 2, 3]).unwrap_err();
        assert!(matches!(
            err,
            Error::MemoryAccess {
                operation: Operation::Write,
                transferred: 1,
                ..
            }
        ));
        assert_eq!(stream.position(), BASE);
    }

    #[test]
    fn unmapped_address_carries_os_code() {
        let target = target(16);
        let mut stream = stream(&target, Access::Read).with_position(0x10);
        let err = stream.read_byte().unwrap_err();
        assert_eq!(err.os_error(), Some(14));
        assert_eq!(stream.position(), 0x10);
    }

    #[test]
    fn empty_transfers_skip_the_primitive() {
        let target = target(16);
        let mut stream = stream(&target, Access::ReadWrite);
        assert_eq!(stream.read(&mut []).unwrap(), 0);
        stream.write(&[]).unwrap();
        assert_eq!(target.calls.get(), 0);
        assert_eq!(stream.position(), BASE);
    }

    #[test]
    fn rights_are_checked_before_the_primitive() {
        let target = target(16);
        let mut reader = stream(&target, Access::Read);
        assert!(matches!(reader.write_byte(1), Err(Error::Unsupported(_))));
        assert!(!reader.can_write());
        let mut writer = stream(&target, Access::Write);
        assert!(matches!(writer.read_byte(), Err(Error::Unsupported(_))));
        assert!(!writer.can_read());
        assert_eq!(target.calls.get(), 0);
    }

    #[test]
    fn seek_end_is_unsupported() {
        let target = target(16);
        let mut stream = stream(&target, Access::Read);
        assert!(matches!(
            stream.seek(SeekFrom::End(4)),
            Err(Error::Unsupported(_))
        ));
        assert_eq!(stream.position(), BASE);
    }

    #[test]
    fn seek_does_not_wrap() {
        let target = target(16);
        let mut stream = stream(&target, Access::Read).with_position(2);
        assert!(matches!(
            stream.seek(SeekFrom::Current(-3)),
            Err(Error::AddressOverflow { position: 2, offset: -3 })
        ));
        assert_eq!(stream.seek(SeekFrom::Current(-2)).unwrap(), 0);

        let mut stream = stream.with_position(u64::MAX - 1);
        assert!(matches!(
            stream.read(&mut [0; 4]),
            Err(Error::AddressOverflow { .. })
        ));
        assert_eq!(target.calls.get(), 0);
    }

    #[test]
    fn into_inner_skips_release() {
        let target = target(16);
        let stream = stream(&target, Access::Read);
        let handle = stream.into_inner().unwrap();
        assert_eq!(target.closes.get(), 0);
        handle.close().unwrap();
        assert_eq!(target.closes.get(), 1);
    }

    #[test]
    fn drop_releases_owned_handle_once() {
        let target = target(16);
        let mut stream = stream(&target, Access::Read);
        stream.read_byte().unwrap();
        drop(stream);
        assert_eq!(target.closes.get(), 1);

        let mut stream = RemoteMemoryStream::owned(Handle(Rc::clone(&target)), Access::Read);
        stream.close().unwrap();
        drop(stream);
        assert_eq!(target.closes.get(), 2);
    }

    #[test]
    fn failed_release_is_reported_once() {
        let target = target(16);
        target.close_error.set(Some(9));
        let mut stream = stream(&target, Access::Read);

        let err = stream.close().unwrap_err();
        assert!(matches!(err, Error::Release(_)));
        assert_eq!(err.os_error(), Some(9));
        assert!(stream.is_disposed());
        assert!(!stream.can_read());
        assert!(matches!(stream.read_byte(), Err(Error::Disposed)));

        stream.close().unwrap();
        drop(stream);
        assert_eq!(target.closes.get(), 1);
    }

    #[test]
    fn failed_release_on_drop_is_swallowed() {
        let target = target(16);
        target.close_error.set(Some(9));
        drop(stream(&target, Access::Read));
        assert_eq!(target.closes.get(), 1);
    }
}
