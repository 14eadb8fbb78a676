mod linux;
mod windows;

#[cfg(target_os = "linux")]
pub use linux::ProcessHandle;

#[cfg(windows)]
pub use self::windows::ProcessHandle;
