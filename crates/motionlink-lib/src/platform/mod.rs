//! OS I/O boundary — non-blocking report reads/writes and waitable completions.
//!
//! The engine never touches OS handles directly. Everything it needs from the
//! operating system goes through [`Platform`]: opening a channel, issuing a
//! read or write that may complete immediately or later, checking a pending
//! operation without blocking, cancelling, and bounded waits on completion
//! primitives.
//!
//! Buffers passed to `start_read`/`start_write` are owned by the engine and
//! stay alive and unmoved until the operation resolves or has been cancelled
//! and settled with [`Platform::settle`].

use std::fmt;
use std::time::Duration;

#[doc(hidden)]
pub mod mock;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub use linux::LinuxPlatform;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use self::windows::WindowsPlatform;

/// Platform backend for the current target.
#[cfg(windows)]
pub type NativePlatform = WindowsPlatform;
#[cfg(target_os = "linux")]
pub type NativePlatform = LinuxPlatform;
#[cfg(not(any(windows, target_os = "linux")))]
pub type NativePlatform = UnsupportedPlatform;

/// OS failure, reduced to what the engine distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsError {
    /// The device went away (unplugged, driver unloaded).
    Disconnected,
    /// The operation was cancelled.
    Aborted,
    /// Any other OS error code.
    Code(i32),
}

impl fmt::Display for OsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OsError::Disconnected => write!(f, "device not connected"),
            OsError::Aborted => write!(f, "operation aborted"),
            OsError::Code(c) => write!(f, "OS error {c}"),
        }
    }
}

/// State of an issued or polled operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStatus {
    /// Finished; carries the number of bytes transferred.
    Complete(usize),
    /// Still in flight (would block / I/O pending / incomplete).
    Pending,
}

/// Outcome of a bounded wait on completion primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Signaled,
    TimedOut,
    Failed,
}

/// Raw identity of a waitable OS object (event handle, file descriptor).
///
/// This is what the event-loop bridge hands to the embedding application so
/// it can add the object to its own wait set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Primitive(isize);

impl Primitive {
    pub fn from_raw(raw: isize) -> Self {
        Primitive(raw)
    }

    pub fn as_raw(self) -> isize {
        self.0
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A waitable completion object owned by a channel (reads) or a send slot.
pub trait Completion {
    fn primitive(&self) -> Primitive;
}

pub trait Platform {
    /// Open OS handle for one report channel. Dropping it closes the handle.
    type Handle;
    /// Completion primitive plus per-operation OS state. Dropping it releases both.
    type Completion: Completion;

    /// Open a channel for fixed-size, non-blocking report I/O.
    fn open_channel(&self, path: &str) -> Result<Self::Handle, OsError>;

    /// Set the host-side input report queue depth.
    fn set_input_buffers(&self, handle: &Self::Handle, count: u32) -> Result<(), OsError>;

    fn create_read_completion(&self, handle: &Self::Handle) -> Result<Self::Completion, OsError>;

    fn create_send_completion(&self) -> Result<Self::Completion, OsError>;

    /// Issue a read of `buf.len()` bytes.
    fn start_read(
        &self,
        handle: &Self::Handle,
        op: &mut Self::Completion,
        buf: &mut [u8],
    ) -> Result<IoStatus, OsError>;

    /// Check a pending read without blocking.
    fn poll_read(
        &self,
        handle: &Self::Handle,
        op: &mut Self::Completion,
        buf: &mut [u8],
    ) -> Result<IoStatus, OsError>;

    /// Issue a write of the whole report.
    fn start_write(
        &self,
        handle: &Self::Handle,
        op: &mut Self::Completion,
        report: &[u8],
    ) -> Result<IoStatus, OsError>;

    /// Check a pending write without blocking.
    fn poll_write(
        &self,
        handle: &Self::Handle,
        op: &mut Self::Completion,
        report: &[u8],
    ) -> Result<IoStatus, OsError>;

    /// Cancel every outstanding operation on the handle, reads and writes alike.
    fn cancel_io(&self, handle: &Self::Handle);

    /// Block until a cancelled operation on `op` has fully resolved.
    fn settle(&self, handle: &Self::Handle, op: &mut Self::Completion);

    fn wait_one(&self, op: &Self::Completion, timeout: Duration) -> WaitOutcome;

    /// Wait until any of `ops` is signalled.
    fn wait_any(&self, ops: &[&Self::Completion], timeout: Duration) -> WaitOutcome;
}

/// Clamp a duration to the millisecond range OS wait calls accept.
pub(crate) fn timeout_millis(timeout: Duration) -> u32 {
    u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX - 1)
}

// ── Fallback for targets without a backend ──

#[cfg(not(any(windows, target_os = "linux")))]
pub use unsupported::UnsupportedPlatform;

#[cfg(not(any(windows, target_os = "linux")))]
mod unsupported {
    use super::*;

    /// Backend for targets without HID report support; every open fails.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct UnsupportedPlatform;

    pub struct NoCompletion;

    impl Completion for NoCompletion {
        fn primitive(&self) -> Primitive {
            Primitive::from_raw(-1)
        }
    }

    const UNSUPPORTED: OsError = OsError::Code(-1);

    impl Platform for UnsupportedPlatform {
        type Handle = ();
        type Completion = NoCompletion;

        fn open_channel(&self, _path: &str) -> Result<(), OsError> {
            Err(UNSUPPORTED)
        }
        fn set_input_buffers(&self, _handle: &(), _count: u32) -> Result<(), OsError> {
            Err(UNSUPPORTED)
        }
        fn create_read_completion(&self, _handle: &()) -> Result<NoCompletion, OsError> {
            Err(UNSUPPORTED)
        }
        fn create_send_completion(&self) -> Result<NoCompletion, OsError> {
            Err(UNSUPPORTED)
        }
        fn start_read(&self, _: &(), _: &mut NoCompletion, _: &mut [u8]) -> Result<IoStatus, OsError> {
            Err(UNSUPPORTED)
        }
        fn poll_read(&self, _: &(), _: &mut NoCompletion, _: &mut [u8]) -> Result<IoStatus, OsError> {
            Err(UNSUPPORTED)
        }
        fn start_write(&self, _: &(), _: &mut NoCompletion, _: &[u8]) -> Result<IoStatus, OsError> {
            Err(UNSUPPORTED)
        }
        fn poll_write(&self, _: &(), _: &mut NoCompletion, _: &[u8]) -> Result<IoStatus, OsError> {
            Err(UNSUPPORTED)
        }
        fn cancel_io(&self, _handle: &()) {}
        fn settle(&self, _handle: &(), _op: &mut NoCompletion) {}
        fn wait_one(&self, _op: &NoCompletion, _timeout: Duration) -> WaitOutcome {
            WaitOutcome::Failed
        }
        fn wait_any(&self, _ops: &[&NoCompletion], _timeout: Duration) -> WaitOutcome {
            WaitOutcome::Failed
        }
    }
}
