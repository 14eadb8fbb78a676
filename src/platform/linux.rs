#![cfg(target_os = "linux")]

use crate::native::{address_to_usize, NativeMemory};
use nix::sys::signal::kill;
use nix::sys::uio::{process_vm_readv, process_vm_writev, RemoteIoVec};
use nix::unistd::Pid;
use std::io::{self, IoSlice, IoSliceMut};

/// A target process addressed by pid through `process_vm_readv(2)` and `process_vm_writev(2)`.
///
/// The kernel checks ptrace access on every call, so the caller needs `CAP_SYS_PTRACE` or
/// a target it may trace (a child, or any process when `kernel.yama.ptrace_scope` is 0).
/// There is no kernel object behind a pid, so releasing the handle does nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessHandle(Pid);

impl ProcessHandle {
    /// Check that `pid` names a live process we can signal, and address it.
    pub fn open(pid: read_process_memory::Pid) -> io::Result<ProcessHandle> {
        let pid = Pid::from_raw(pid);
        kill(pid, None)?;
        Ok(ProcessHandle(pid))
    }

    /// The calling process itself.
    pub fn current() -> ProcessHandle {
        ProcessHandle(Pid::this())
    }

    pub fn pid(&self) -> read_process_memory::Pid {
        self.0.as_raw()
    }
}

impl NativeMemory for ProcessHandle {
    fn read_memory(&self, address: u64, buf: &mut [u8]) -> io::Result<usize> {
        let remote = [RemoteIoVec {
            base: address_to_usize(address)?,
            len: buf.len(),
        }];
        Ok(process_vm_readv(self.0, &mut [IoSliceMut::new(buf)], &remote)?)
    }

    fn write_memory(&self, address: u64, buf: &[u8]) -> io::Result<usize> {
        let remote = [RemoteIoVec {
            base: address_to_usize(address)?,
            len: buf.len(),
        }];
        Ok(process_vm_writev(self.0, &[IoSlice::new(buf)], &remote)?)
    }

    fn close(self) -> io::Result<()> {
        log::trace!("nothing to release for pid {}", self.0);
        Ok(())
    }
}
