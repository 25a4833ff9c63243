//! Windows backend — overlapped HID report I/O.
//!
//! Each completion owns a boxed `OVERLAPPED` with a manual-reset event. The box
//! keeps the structure at a fixed address for as long as an operation may be
//! in flight; the engine settles cancelled operations before dropping it.

use std::mem;
use std::time::Duration;

use windows::Win32::Devices::HumanInterfaceDevice::HidD_SetNumInputBuffers;
use windows::Win32::Foundation::{CloseHandle, GENERIC_READ, GENERIC_WRITE, HANDLE};
use windows::Win32::Storage::FileSystem::{
    CreateFileW, FILE_FLAG_OVERLAPPED, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING, ReadFile,
    WriteFile,
};
use windows::Win32::System::IO::{CancelIoEx, GetOverlappedResult, OVERLAPPED};
use windows::Win32::System::Threading::{
    CreateEventW, ResetEvent, WaitForMultipleObjects, WaitForSingleObject,
};
use windows::core::PCWSTR;

use super::{Completion, IoStatus, OsError, Platform, Primitive, WaitOutcome, timeout_millis};

// Win32 error codes as they appear in `windows::core::Error::code()`.
const HR_IO_PENDING: u32 = 0x800703E5;
const HR_IO_INCOMPLETE: u32 = 0x800703E4;
const HR_OPERATION_ABORTED: u32 = 0x800703E3;
const HR_DEVICE_NOT_CONNECTED: u32 = 0x8007048F;

const WAIT_OBJECT_0: u32 = 0;
const WAIT_TIMEOUT: u32 = 0x102;

fn os_error(e: &windows::core::Error) -> OsError {
    match e.code().0 as u32 {
        HR_DEVICE_NOT_CONNECTED => OsError::Disconnected,
        HR_OPERATION_ABORTED => OsError::Aborted,
        hr => OsError::Code((hr & 0xFFFF) as i32),
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsPlatform;

pub struct WindowsHandle(HANDLE);

impl Drop for WindowsHandle {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.0);
        }
    }
}

pub struct WindowsCompletion {
    ov: Box<OVERLAPPED>,
}

impl WindowsCompletion {
    fn new() -> Result<Self, OsError> {
        let event = unsafe { CreateEventW(None, true, false, PCWSTR::null()) }
            .map_err(|e| os_error(&e))?;
        // SAFETY: OVERLAPPED is plain data; all-zero is its documented initial state.
        let mut ov: Box<OVERLAPPED> = Box::new(unsafe { mem::zeroed() });
        ov.hEvent = event;
        Ok(WindowsCompletion { ov })
    }

    /// Prepare the OVERLAPPED for a new operation.
    fn rearm(&mut self) {
        let event = self.ov.hEvent;
        // SAFETY: see `new`.
        *self.ov = unsafe { mem::zeroed() };
        self.ov.hEvent = event;
        unsafe {
            let _ = ResetEvent(event);
        }
    }
}

impl Completion for WindowsCompletion {
    fn primitive(&self) -> Primitive {
        Primitive::from_raw(self.ov.hEvent.0 as isize)
    }
}

impl Drop for WindowsCompletion {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.ov.hEvent);
        }
    }
}

/// Resolve an issued operation: synchronous completion, pending, or failure.
fn issued(
    handle: &WindowsHandle,
    op: &mut WindowsCompletion,
    r: windows::core::Result<()>,
) -> Result<IoStatus, OsError> {
    match r {
        Ok(()) => overlapped_status(handle, op),
        Err(e) if e.code().0 as u32 == HR_IO_PENDING => Ok(IoStatus::Pending),
        Err(e) => Err(os_error(&e)),
    }
}

/// Non-blocking completion check.
fn overlapped_status(handle: &WindowsHandle, op: &mut WindowsCompletion) -> Result<IoStatus, OsError> {
    let mut transferred: u32 = 0;
    // SAFETY: `op.ov` is the OVERLAPPED the operation was issued with.
    match unsafe { GetOverlappedResult(handle.0, &*op.ov, &mut transferred, false) } {
        Ok(()) => Ok(IoStatus::Complete(transferred as usize)),
        Err(e) if e.code().0 as u32 == HR_IO_INCOMPLETE => Ok(IoStatus::Pending),
        Err(e) => Err(os_error(&e)),
    }
}

fn wait_outcome(code: u32, count: usize) -> WaitOutcome {
    match code {
        c if (c as usize) < WAIT_OBJECT_0 as usize + count => WaitOutcome::Signaled,
        WAIT_TIMEOUT => WaitOutcome::TimedOut,
        _ => WaitOutcome::Failed,
    }
}

impl Platform for WindowsPlatform {
    type Handle = WindowsHandle;
    type Completion = WindowsCompletion;

    fn open_channel(&self, path: &str) -> Result<WindowsHandle, OsError> {
        let wide: Vec<u16> = path.encode_utf16().chain(std::iter::once(0)).collect();
        let handle = unsafe {
            CreateFileW(
                PCWSTR(wide.as_ptr()),
                (GENERIC_READ | GENERIC_WRITE).0,
                FILE_SHARE_READ | FILE_SHARE_WRITE,
                None,
                OPEN_EXISTING,
                FILE_FLAG_OVERLAPPED,
                None,
            )
        }
        .map_err(|e| os_error(&e))?;
        Ok(WindowsHandle(handle))
    }

    fn set_input_buffers(&self, handle: &WindowsHandle, count: u32) -> Result<(), OsError> {
        let ok: bool = unsafe { HidD_SetNumInputBuffers(handle.0, count) }.into();
        if ok {
            Ok(())
        } else {
            Err(os_error(&windows::core::Error::from_win32()))
        }
    }

    fn create_read_completion(&self, _handle: &WindowsHandle) -> Result<WindowsCompletion, OsError> {
        WindowsCompletion::new()
    }

    fn create_send_completion(&self) -> Result<WindowsCompletion, OsError> {
        WindowsCompletion::new()
    }

    fn start_read(
        &self,
        handle: &WindowsHandle,
        op: &mut WindowsCompletion,
        buf: &mut [u8],
    ) -> Result<IoStatus, OsError> {
        op.rearm();
        // SAFETY: `buf` and `op.ov` are engine-owned and stay put until the read
        // completes or is cancelled and settled.
        let r = unsafe { ReadFile(handle.0, Some(buf), None, Some(&mut *op.ov as *mut OVERLAPPED)) };
        issued(handle, op, r)
    }

    fn poll_read(
        &self,
        handle: &WindowsHandle,
        op: &mut WindowsCompletion,
        _buf: &mut [u8],
    ) -> Result<IoStatus, OsError> {
        overlapped_status(handle, op)
    }

    fn start_write(
        &self,
        handle: &WindowsHandle,
        op: &mut WindowsCompletion,
        report: &[u8],
    ) -> Result<IoStatus, OsError> {
        op.rearm();
        // SAFETY: as for `start_read`.
        let r = unsafe { WriteFile(handle.0, Some(report), None, Some(&mut *op.ov as *mut OVERLAPPED)) };
        issued(handle, op, r)
    }

    fn poll_write(
        &self,
        handle: &WindowsHandle,
        op: &mut WindowsCompletion,
        _report: &[u8],
    ) -> Result<IoStatus, OsError> {
        overlapped_status(handle, op)
    }

    fn cancel_io(&self, handle: &WindowsHandle) {
        unsafe {
            let _ = CancelIoEx(handle.0, None);
        }
    }

    fn settle(&self, handle: &WindowsHandle, op: &mut WindowsCompletion) {
        let mut transferred: u32 = 0;
        unsafe {
            let _ = GetOverlappedResult(handle.0, &*op.ov, &mut transferred, true);
        }
    }

    fn wait_one(&self, op: &WindowsCompletion, timeout: Duration) -> WaitOutcome {
        let code = unsafe { WaitForSingleObject(op.ov.hEvent, timeout_millis(timeout)) };
        wait_outcome(code.0, 1)
    }

    fn wait_any(&self, ops: &[&WindowsCompletion], timeout: Duration) -> WaitOutcome {
        let events: Vec<HANDLE> = ops.iter().map(|op| op.ov.hEvent).collect();
        if events.is_empty() {
            return WaitOutcome::Failed;
        }
        let code = unsafe { WaitForMultipleObjects(&events, false, timeout_millis(timeout)) };
        wait_outcome(code.0, events.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_disconnect() {
        let e = windows::core::Error::from_hresult(windows::core::HRESULT(HR_DEVICE_NOT_CONNECTED as i32));
        assert_eq!(os_error(&e), OsError::Disconnected);
    }

    #[test]
    fn maps_other_codes_to_win32_code() {
        let e = windows::core::Error::from_hresult(windows::core::HRESULT(0x80070002u32 as i32));
        assert_eq!(os_error(&e), OsError::Code(2));
    }

    #[test]
    fn wait_codes() {
        assert_eq!(wait_outcome(0, 1), WaitOutcome::Signaled);
        assert_eq!(wait_outcome(2, 3), WaitOutcome::Signaled);
        assert_eq!(wait_outcome(WAIT_TIMEOUT, 3), WaitOutcome::TimedOut);
        assert_eq!(wait_outcome(0xFFFF_FFFF, 3), WaitOutcome::Failed);
    }

    #[test]
    fn opening_missing_path_fails() {
        assert!(WindowsPlatform.open_channel(r"\\?\hid#missing").is_err());
    }

    #[test]
    fn completion_has_event_primitive() {
        let c = WindowsPlatform.create_send_completion().unwrap();
        assert_ne!(c.primitive().as_raw(), 0);
    }
}
