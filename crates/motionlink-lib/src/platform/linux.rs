//! Linux backend — hidraw nodes in non-blocking mode.
//!
//! hidraw has no kernel-side asynchronous I/O, so "pending" means the last
//! attempt returned `EAGAIN` and polling re-attempts it. A read completion's
//! primitive is a duplicate of the hidraw descriptor (readable when a report
//! is queued). A send completion's primitive is an eventfd that is raised
//! while a deferred write is waiting to be retried.
//!
//! Cancellation is an epoch bump on the handle: operations issued before the
//! bump report `Aborted` on their next poll.

use std::cell::Cell;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::time::Duration;

use super::{Completion, IoStatus, OsError, Platform, Primitive, WaitOutcome, timeout_millis};

#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxPlatform;

pub struct LinuxHandle {
    file: File,
    epoch: Cell<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Read,
    Send,
}

struct InFlight {
    epoch: u32,
    /// Descriptor to watch for writability while a write is deferred.
    writer: Option<File>,
}

pub struct LinuxCompletion {
    event: OwnedFd,
    kind: Kind,
    in_flight: Option<InFlight>,
}

impl Completion for LinuxCompletion {
    fn primitive(&self) -> Primitive {
        Primitive::from_raw(self.event.as_raw_fd() as isize)
    }
}

impl LinuxCompletion {
    /// Descriptor and poll events a wait on this completion watches.
    fn watch(&self) -> (RawFd, libc::c_short) {
        match (self.kind, &self.in_flight) {
            (Kind::Send, Some(InFlight { writer: Some(w), .. })) => (w.as_raw_fd(), libc::POLLOUT),
            _ => (self.event.as_raw_fd(), libc::POLLIN),
        }
    }

    fn raise(&self) {
        let one: u64 = 1;
        // SAFETY: `event` is an open eventfd and `one` outlives the call; eventfd
        // writes are exactly eight bytes.
        let rc = unsafe {
            libc::write(
                self.event.as_raw_fd(),
                &one as *const u64 as *const libc::c_void,
                8,
            )
        };
        if rc < 0 {
            log::trace!("eventfd raise failed: {}", io::Error::last_os_error());
        }
    }

    fn lower(&self) {
        let mut counter: u64 = 0;
        // SAFETY: `event` is an open eventfd and `counter` is a valid eight-byte
        // destination for the duration of the call.
        let rc = unsafe {
            libc::read(
                self.event.as_raw_fd(),
                &mut counter as *mut u64 as *mut libc::c_void,
                8,
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::WouldBlock {
                log::trace!("eventfd lower failed: {err}");
            }
        }
    }

    /// Whether the operation in flight was cancelled since it was issued.
    fn aborted(&self, handle: &LinuxHandle) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|f| f.epoch != handle.epoch.get())
    }
}

/// Map an errno to an `OsError`.
///
/// hidraw fails reads with `EIO` once the device is gone and writes with
/// `ENODEV`, so `EIO` counts as a disconnect only for reads.
fn classify(errno: Option<i32>, kind: Kind) -> OsError {
    match errno {
        Some(libc::ENODEV) | Some(libc::EPIPE) => OsError::Disconnected,
        Some(libc::EIO) if kind == Kind::Read => OsError::Disconnected,
        Some(libc::ECANCELED) => OsError::Aborted,
        Some(code) => OsError::Code(code),
        None => OsError::Code(-1),
    }
}

fn last_error() -> OsError {
    classify(io::Error::last_os_error().raw_os_error(), Kind::Send)
}

/// Classify a `read(2)`/`write(2)` return value.
fn io_status(rc: isize, kind: Kind) -> Result<IoStatus, OsError> {
    if rc >= 0 {
        return Ok(IoStatus::Complete(rc as usize));
    }
    let err = io::Error::last_os_error();
    match err.kind() {
        io::ErrorKind::WouldBlock => Ok(IoStatus::Pending),
        _ => Err(classify(err.raw_os_error(), kind)),
    }
}

fn read_once(handle: &LinuxHandle, buf: &mut [u8]) -> Result<IoStatus, OsError> {
    // SAFETY: `buf` is a live, writable slice of `buf.len()` bytes and the
    // descriptor stays open while `handle` is borrowed.
    let rc = unsafe {
        libc::read(
            handle.file.as_raw_fd(),
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
        )
    };
    io_status(rc, Kind::Read)
}

fn write_once(handle: &LinuxHandle, report: &[u8]) -> Result<IoStatus, OsError> {
    // SAFETY: `report` is a live slice of `report.len()` bytes and the
    // descriptor stays open while `handle` is borrowed.
    let rc = unsafe {
        libc::write(
            handle.file.as_raw_fd(),
            report.as_ptr() as *const libc::c_void,
            report.len(),
        )
    };
    io_status(rc, Kind::Send)
}

impl Platform for LinuxPlatform {
    type Handle = LinuxHandle;
    type Completion = LinuxCompletion;

    fn open_channel(&self, path: &str) -> Result<LinuxHandle, OsError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .map_err(|e| match e.raw_os_error() {
                Some(libc::ENODEV) | Some(libc::ENXIO) => OsError::Disconnected,
                Some(code) => OsError::Code(code),
                None => OsError::Code(-1),
            })?;
        Ok(LinuxHandle {
            file,
            epoch: Cell::new(0),
        })
    }

    fn set_input_buffers(&self, _handle: &LinuxHandle, count: u32) -> Result<(), OsError> {
        log::debug!("hidraw: input queue depth is fixed by the kernel, ignoring request for {count}");
        Ok(())
    }

    fn create_read_completion(&self, handle: &LinuxHandle) -> Result<LinuxCompletion, OsError> {
        let dup = handle.file.try_clone().map_err(|_| last_error())?;
        Ok(LinuxCompletion {
            event: OwnedFd::from(dup),
            kind: Kind::Read,
            in_flight: None,
        })
    }

    fn create_send_completion(&self) -> Result<LinuxCompletion, OsError> {
        // SAFETY: eventfd takes no pointers; a negative return is handled below.
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(last_error());
        }
        Ok(LinuxCompletion {
            // SAFETY: `fd` is a freshly created descriptor owned by nobody else.
            event: unsafe { OwnedFd::from_raw_fd(fd) },
            kind: Kind::Send,
            in_flight: None,
        })
    }

    fn start_read(
        &self,
        handle: &LinuxHandle,
        op: &mut LinuxCompletion,
        buf: &mut [u8],
    ) -> Result<IoStatus, OsError> {
        let status = read_once(handle, buf)?;
        op.in_flight = match status {
            IoStatus::Pending => Some(InFlight {
                epoch: handle.epoch.get(),
                writer: None,
            }),
            IoStatus::Complete(_) => None,
        };
        Ok(status)
    }

    fn poll_read(
        &self,
        handle: &LinuxHandle,
        op: &mut LinuxCompletion,
        buf: &mut [u8],
    ) -> Result<IoStatus, OsError> {
        if op.aborted(handle) {
            op.in_flight = None;
            return Err(OsError::Aborted);
        }
        let status = read_once(handle, buf);
        if !matches!(status, Ok(IoStatus::Pending)) {
            op.in_flight = None;
        }
        status
    }

    fn start_write(
        &self,
        handle: &LinuxHandle,
        op: &mut LinuxCompletion,
        report: &[u8],
    ) -> Result<IoStatus, OsError> {
        let status = write_once(handle, report)?;
        if status == IoStatus::Pending {
            let writer = handle.file.try_clone().map_err(|_| last_error())?;
            op.in_flight = Some(InFlight {
                epoch: handle.epoch.get(),
                writer: Some(writer),
            });
            op.raise();
        }
        Ok(status)
    }

    fn poll_write(
        &self,
        handle: &LinuxHandle,
        op: &mut LinuxCompletion,
        report: &[u8],
    ) -> Result<IoStatus, OsError> {
        if op.aborted(handle) {
            op.in_flight = None;
            op.lower();
            return Err(OsError::Aborted);
        }
        let status = write_once(handle, report);
        if !matches!(status, Ok(IoStatus::Pending)) {
            op.in_flight = None;
            op.lower();
        }
        status
    }

    fn cancel_io(&self, handle: &LinuxHandle) {
        handle.epoch.set(handle.epoch.get().wrapping_add(1));
    }

    fn settle(&self, _handle: &LinuxHandle, op: &mut LinuxCompletion) {
        if op.in_flight.take().is_some() && op.kind == Kind::Send {
            op.lower();
        }
    }

    fn wait_one(&self, op: &LinuxCompletion, timeout: Duration) -> WaitOutcome {
        self.wait_any(&[op], timeout)
    }

    fn wait_any(&self, ops: &[&LinuxCompletion], timeout: Duration) -> WaitOutcome {
        let mut fds: Vec<libc::pollfd> = ops
            .iter()
            .map(|op| {
                let (fd, events) = op.watch();
                libc::pollfd {
                    fd,
                    events,
                    revents: 0,
                }
            })
            .collect();
        if fds.is_empty() {
            return WaitOutcome::Failed;
        }
        let millis = timeout_millis(timeout).min(libc::c_int::MAX as u32) as libc::c_int;
        // SAFETY: `fds` holds `fds.len()` initialised entries and outlives the call.
        let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, millis) };
        match rc {
            0 => WaitOutcome::TimedOut,
            n if n > 0 => WaitOutcome::Signaled,
            _ => {
                log::warn!("poll failed: {}", io::Error::last_os_error());
                WaitOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn null_handle() -> LinuxHandle {
        LinuxPlatform.open_channel("/dev/null").unwrap()
    }

    #[test]
    fn missing_node_fails_to_open() {
        assert_eq!(
            LinuxPlatform.open_channel("/dev/hidraw-does-not-exist").err(),
            Some(OsError::Code(libc::ENOENT))
        );
    }

    #[test]
    fn input_buffers_are_accepted() {
        assert!(LinuxPlatform.set_input_buffers(&null_handle(), 128).is_ok());
    }

    #[test]
    fn immediate_write_completes() {
        let h = null_handle();
        let mut op = LinuxPlatform.create_send_completion().unwrap();
        assert_eq!(
            LinuxPlatform.start_write(&h, &mut op, &[1, 2, 3]),
            Ok(IoStatus::Complete(3))
        );
    }

    #[test]
    fn immediate_read_completes() {
        let h = null_handle();
        let mut op = LinuxPlatform.create_read_completion(&h).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(
            LinuxPlatform.start_read(&h, &mut op, &mut buf),
            Ok(IoStatus::Complete(0))
        );
    }

    #[test]
    fn cancellation_aborts_older_operations() {
        let h = null_handle();
        let mut op = LinuxPlatform.create_send_completion().unwrap();
        op.in_flight = Some(InFlight {
            epoch: h.epoch.get(),
            writer: None,
        });
        LinuxPlatform.cancel_io(&h);
        assert_eq!(
            LinuxPlatform.poll_write(&h, &mut op, &[0]),
            Err(OsError::Aborted)
        );
        assert!(op.in_flight.is_none());
    }

    #[test]
    fn raised_send_primitive_is_signaled() {
        let op = LinuxPlatform.create_send_completion().unwrap();
        assert_eq!(
            LinuxPlatform.wait_one(&op, Duration::ZERO),
            WaitOutcome::TimedOut
        );
        op.raise();
        assert_eq!(
            LinuxPlatform.wait_one(&op, Duration::ZERO),
            WaitOutcome::Signaled
        );
        op.lower();
        assert_eq!(
            LinuxPlatform.wait_one(&op, Duration::ZERO),
            WaitOutcome::TimedOut
        );
    }

    #[test]
    fn disconnect_errnos_are_classified() {
        assert_eq!(classify(Some(libc::EIO), Kind::Read), OsError::Disconnected);
        assert_eq!(classify(Some(libc::EIO), Kind::Send), OsError::Code(libc::EIO));
        assert_eq!(classify(Some(libc::ENODEV), Kind::Send), OsError::Disconnected);
        assert_eq!(classify(Some(libc::EPIPE), Kind::Read), OsError::Disconnected);
        assert_eq!(classify(Some(libc::ECANCELED), Kind::Read), OsError::Aborted);
        assert_eq!(classify(Some(libc::EINVAL), Kind::Read), OsError::Code(libc::EINVAL));
        assert_eq!(classify(None, Kind::Send), OsError::Code(-1));
    }

    #[test]
    fn primitives_are_distinct_descriptors() {
        let h = null_handle();
        let r = LinuxPlatform.create_read_completion(&h).unwrap();
        let s = LinuxPlatform.create_send_completion().unwrap();
        assert_ne!(r.primitive(), s.primitive());
        assert!(r.primitive().as_raw() >= 0);
    }
}
