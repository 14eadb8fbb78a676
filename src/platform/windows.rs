#![cfg(windows)]

use crate::native::{address_to_usize, NativeMemory};
use std::ffi::c_void;
use std::io;
use windows::Win32::Foundation::{CloseHandle, FALSE, HANDLE};
use windows::Win32::System::Diagnostics::Debug::{ReadProcessMemory, WriteProcessMemory};
use windows::Win32::System::Threading::{
    OpenProcess, PROCESS_QUERY_INFORMATION, PROCESS_VM_OPERATION, PROCESS_VM_READ,
    PROCESS_VM_WRITE,
};

/// A raw Win32 process handle.
///
/// Dropping this value does not close the handle; an owning stream closes it through
/// [`NativeMemory::close`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessHandle(HANDLE);

impl ProcessHandle {
    /// Open `pid` with the rights both reads and writes need.
    pub fn open(pid: u32) -> io::Result<ProcessHandle> {
        let handle = unsafe {
            OpenProcess(
                PROCESS_QUERY_INFORMATION
                    | PROCESS_VM_OPERATION
                    | PROCESS_VM_READ
                    | PROCESS_VM_WRITE,
                FALSE,
                pid,
            )
        }
        .map_err(|_| io::Error::last_os_error())?;
        Ok(ProcessHandle(handle))
    }

    /// Wrap a handle opened elsewhere.
    ///
    /// # Safety
    ///
    /// `handle` must be a valid process handle with `PROCESS_VM_READ` and/or
    /// `PROCESS_VM_WRITE | PROCESS_VM_OPERATION`, and must stay open for as long as any
    /// stream uses it.
    pub unsafe fn from_raw(handle: HANDLE) -> ProcessHandle {
        ProcessHandle(handle)
    }

    pub fn as_raw(&self) -> HANDLE {
        self.0
    }
}

impl NativeMemory for ProcessHandle {
    fn read_memory(&self, address: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut number_of_bytes_read: usize = 0;
        unsafe {
            ReadProcessMemory(
                self.0,
                address_to_usize(address)? as *const c_void,
                buf.as_mut_ptr() as *mut c_void,
                buf.len(),
                Some(&mut number_of_bytes_read),
            )
        }
        .map_err(|_| io::Error::last_os_error())?;
        Ok(number_of_bytes_read)
    }

    fn write_memory(&self, address: u64, buf: &[u8]) -> io::Result<usize> {
        let mut number_of_bytes_written: usize = 0;
        unsafe {
            WriteProcessMemory(
                self.0,
                address_to_usize(address)? as *const c_void,
                buf.as_ptr() as *const c_void,
                buf.len(),
                Some(&mut number_of_bytes_written),
            )
        }
        .map_err(|_| io::Error::last_os_error())?;
        Ok(number_of_bytes_written)
    }

    fn close(self) -> io::Result<()> {
        unsafe { CloseHandle(self.0) }.map_err(|_| io::Error::last_os_error())
    }
}
