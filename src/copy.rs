use crate::native::{address_to_usize, NativeMemory};
use read_process_memory::CopyAddress;
use std::io;

/// Granularity at which the OS maps memory; a copy inside one page is all-or-nothing.
const PAGE_SIZE: usize = 0x1000;

/// Read-only adapter over anything `read_process_memory` can copy from.
///
/// Works on every platform that crate supports, including macOS where there is no write
/// backend. `copy_address` can succeed after copying only a prefix of a range that runs
/// into unmapped memory, so reads are split at page boundaries and only pages that copied
/// are counted. Writes always fail with `ErrorKind::Unsupported`.
///
/// The wrapped value is dropped with the adapter, in both ownership modes.
#[derive(Debug)]
pub struct CopyHandle<T>(T);

impl<T: CopyAddress> CopyHandle<T> {
    pub fn new(inner: T) -> CopyHandle<T> {
        CopyHandle(inner)
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T: CopyAddress> NativeMemory for CopyHandle<T> {
    fn read_memory(&self, address: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut address = address_to_usize(address)?;
        let mut copied = 0;
        while copied < buf.len() {
            let chunk = (PAGE_SIZE - address % PAGE_SIZE).min(buf.len() - copied);
            if let Err(err) = self.0.copy_address(address, &mut buf[copied..copied + chunk]) {
                if copied == 0 {
                    return Err(err);
                }
                log::trace!("copy stopped at {:#x}: {}", address, err);
                break;
            }
            copied += chunk;
            address = address.wrapping_add(chunk);
        }
        Ok(copied)
    }

    fn write_memory(&self, _address: u64, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "read_process_memory handles cannot write",
        ))
    }

    fn close(self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Access, Error, RemoteMemoryStream};
    use std::cell::Cell;
    use std::io::SeekFrom;

    /// Memory where each byte holds its address's low byte, mapped up to `end`.
    ///
    /// Like `process_vm_readv`, a copy that starts in mapped memory succeeds even when it
    /// runs off the end; only a copy starting past `end` fails.
    struct Pages {
        end: usize,
        calls: Cell<usize>,
    }

    impl Pages {
        fn mapped_until(end: usize) -> Pages {
            Pages {
                end,
                calls: Cell::new(0),
            }
        }
    }

    impl CopyAddress for Pages {
        fn copy_address(&self, addr: usize, buf: &mut [u8]) -> io::Result<()> {
            self.calls.set(self.calls.get() + 1);
            if addr == 0 || addr >= self.end {
                return Err(io::Error::from_raw_os_error(14));
            }
            let mapped = (self.end - addr).min(buf.len());
            for (i, byte) in buf[..mapped].iter_mut().enumerate() {
                *byte = (addr + i) as u8;
            }
            Ok(())
        }
    }

    fn stream(end: usize) -> RemoteMemoryStream<CopyHandle<Pages>> {
        RemoteMemoryStream::owned(CopyHandle::new(Pages::mapped_until(end)), Access::Read)
    }

    #[test]
    fn reads_through_copy_address() {
        let mut stream = stream(0x3000).with_position(0x10);
        let mut buf = [0; 3];
        stream.read(&mut buf).unwrap();
        assert_eq!(buf, [0x10, 0x11, 0x12]);
        assert_eq!(stream.position(), 0x13);
    }

    #[test]
    fn reads_across_mapped_pages() {
        let mut stream = stream(0x3000).with_position(0x1ff8);
        let mut buf = [0; 16];
        stream.read(&mut buf).unwrap();
        let expected: Vec<u8> = (0x1ff8..0x2008).map(|a: usize| a as u8).collect();
        assert_eq!(buf[..], expected[..]);
        assert_eq!(stream.position(), 0x2008);
    }

    #[test]
    fn read_into_unmapped_page_is_partial() {
        let mut stream = stream(0x2000);
        stream.seek(SeekFrom::Start(0x1ff0)).unwrap();
        let mut primed = [0; 16];
        stream.read(&mut primed).unwrap();

        stream.seek(SeekFrom::Start(0x1ff8)).unwrap();
        let mut buf = [0xab; 16];
        let err = stream.read(&mut buf).unwrap_err();
        assert!(matches!(
            err,
            Error::MemoryAccess {
                requested: 16,
                transferred: 8,
                ..
            }
        ));
        assert_eq!(buf, [0xab; 16]);
        assert_eq!(stream.position(), 0x1ff8);
    }

    #[test]
    fn page_sized_reads_copy_once_per_page() {
        let handle = CopyHandle::new(Pages::mapped_until(0x4000));
        let mut buf = vec![0; 2 * PAGE_SIZE];
        assert_eq!(handle.read_memory(0x1000, &mut buf).unwrap(), 2 * PAGE_SIZE);
        assert_eq!(handle.into_inner().calls.get(), 2);
    }

    #[test]
    fn failures_keep_the_os_code() {
        let mut stream = stream(0x3000).with_position(0);
        assert_eq!(stream.read_byte().unwrap_err().os_error(), Some(14));
    }

    #[test]
    fn writes_are_rejected_by_the_backend() {
        let handle = CopyHandle::new(Pages::mapped_until(0x3000));
        let mut stream = RemoteMemoryStream::owned(handle, Access::ReadWrite);
        match stream.write_byte(1).unwrap_err() {
            Error::MemoryAccess { source, .. } => {
                assert_eq!(source.kind(), io::ErrorKind::Unsupported);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
