//! Seekable byte-stream access to the memory of another running process.
//!
//! [`RemoteMemoryStream`] wraps a process handle and treats the target's address space as
//! one long stream: the position is an absolute virtual address, and every read or write
//! either moves exactly the requested bytes or fails. The OS calls sit behind
//! [`NativeMemory`], implemented here by [`ProcessHandle`] (Linux and Windows) and by the
//! read-only [`CopyHandle`] adapter.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

mod access;
mod copy;
mod error;
mod native;
mod platform;
mod stream;

pub use crate::access::Access;
pub use crate::copy::CopyHandle;
pub use crate::error::{Error, Operation, Result};
pub use crate::native::NativeMemory;
#[cfg(any(target_os = "linux", windows))]
pub use crate::platform::ProcessHandle;
pub use crate::stream::{
    Ownership, RemoteMemoryStream, DEFAULT_BASE_ADDRESS, INITIAL_SCRATCH_CAPACITY,
};
pub use flagset::FlagSet;

/// Parse an address or count given as `0x`-prefixed hex or plain decimal.
pub fn parse_number(s: &str) -> std::result::Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16),
        None => s.replace('_', "").parse(),
    };
    parsed.map_err(|err| format!("invalid number {s:?}: {err}"))
}
