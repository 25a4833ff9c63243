//! Outbound reports: framing, issuance, and the blocking and async send paths.
//!
//! Every report is framed to the output length of the device's send channel
//! (the channel with the largest output report), zero-padded past the payload.

use std::time::{Duration, Instant};

use crate::error::DeviceError;
use crate::handle::{LogicalDevice, MAX_OUTPUT_REPORT_SIZE};
use crate::platform::{IoStatus, Platform, WaitOutcome};
use crate::slot::{SendCallback, SendSlot};

/// How a freshly issued write came back.
pub(crate) enum Activation {
    /// Finished synchronously with this many bytes transferred.
    Complete(usize),
    Pending,
}

impl<P: Platform> SendSlot<P> {
    /// Record a finished transfer; anything short of the framed length is an I/O error.
    pub(crate) fn record_transfer(&mut self, transferred: usize) -> Result<(), DeviceError> {
        self.transferred = transferred;
        if transferred == self.report_len {
            Ok(())
        } else {
            log::warn!("short write: {transferred} of {} bytes", self.report_len);
            Err(DeviceError::Io)
        }
    }
}

impl<P: Platform> LogicalDevice<P> {
    /// Allocate a slot and frame `report` into it. Returns the slot index.
    pub(crate) fn prepare_send(&mut self, os: &P, report: &[u8]) -> Result<usize, DeviceError> {
        if !self.opened {
            return Err(DeviceError::Io);
        }
        let idx = self.pool.first_free().ok_or_else(|| {
            log::debug!("device {}: all {} send slots in use", self.id, self.pool.capacity());
            DeviceError::Busy
        })?;
        let target = self.output_channel().ok_or(DeviceError::NoDevice)?;
        let out_len = self.channels[target].info.output_report_len;

        let slot = self.pool.get_mut(idx);
        slot.ensure_completion(os)?;
        slot.target = Some(target);
        slot.transferred = 0;
        slot.result = Ok(());

        if report.len() > out_len {
            log::warn!("report of {} bytes exceeds output length {out_len}", report.len());
            slot.result = Err(DeviceError::SendTooLarge);
            slot.release();
            return Err(DeviceError::SendTooLarge);
        }
        if out_len > MAX_OUTPUT_REPORT_SIZE {
            log::warn!("output length {out_len} exceeds slot buffer");
            slot.result = Err(DeviceError::Unexpected);
            slot.release();
            return Err(DeviceError::Unexpected);
        }
        slot.report[..report.len()].copy_from_slice(report);
        slot.report[report.len()..out_len].fill(0);
        slot.report_len = out_len;
        Ok(idx)
    }

    /// Issue the framed report in slot `idx`.
    ///
    /// On failure the target channel is cancelled and the error returned; the
    /// slot stays allocated for the caller to release.
    pub(crate) fn activate(&mut self, os: &P, idx: usize) -> Result<Activation, DeviceError> {
        let (target, status) = {
            let slot = self.pool.get_mut(idx);
            let Some(target) = slot.target else {
                return Err(DeviceError::Unexpected);
            };
            let (Some(handle), Some(c)) = (self.channels[target].handle.as_ref(), slot.completion.as_mut())
            else {
                return Err(DeviceError::Unexpected);
            };
            log::trace!("device {}: write {:02x?}", self.id, &slot.report[..slot.report_len]);
            (target, os.start_write(handle, c, &slot.report[..slot.report_len]))
        };
        match status {
            Ok(IoStatus::Complete(n)) => Ok(Activation::Complete(n)),
            Ok(IoStatus::Pending) => {
                self.pool.get_mut(idx).in_flight = true;
                Ok(Activation::Pending)
            }
            Err(e) => {
                log::warn!("device {}: write on {} failed: {e}", self.id, self.channels[target].info.path);
                self.cancel_channel(os, target);
                Err(e.into())
            }
        }
    }

    /// Cancel the write in slot `idx` and wait for it to resolve.
    pub(crate) fn abort_send(&mut self, os: &P, idx: usize) {
        let Some(target) = self.pool.get(idx).target else {
            return;
        };
        self.cancel_channel(os, target);
        let slot = self.pool.get_mut(idx);
        if let (Some(handle), Some(c)) = (self.channels[target].handle.as_ref(), slot.completion.as_mut()) {
            os.settle(handle, c);
        }
        slot.in_flight = false;
    }

    /// Release slot `idx` and fire its callback, if any, with `result`.
    pub(crate) fn finish_send(&mut self, idx: usize, result: Result<(), DeviceError>) {
        let id = self.id;
        let slot = self.pool.get_mut(idx);
        slot.result = result;
        let callback = slot.callback.take();
        slot.release();
        if let Some(cb) = callback {
            cb(id, result);
        }
    }

    /// Send a report and block until it is written or `timeout` elapses.
    pub(crate) fn send(&mut self, os: &P, report: &[u8], timeout: Duration) -> Result<(), DeviceError> {
        let idx = self.prepare_send(os, report)?;
        let result = match self.activate(os, idx) {
            Err(e) => Err(e),
            Ok(Activation::Complete(n)) => self.pool.get_mut(idx).record_transfer(n),
            Ok(Activation::Pending) => self.await_send(os, idx, timeout),
        };
        let slot = self.pool.get_mut(idx);
        slot.result = result;
        slot.release();
        result
    }

    fn await_send(&mut self, os: &P, idx: usize, timeout: Duration) -> Result<(), DeviceError> {
        let (signaled, status) = {
            let slot = self.pool.get_mut(idx);
            let Some(target) = slot.target else {
                return Err(DeviceError::Unexpected);
            };
            let (Some(handle), Some(c)) = (self.channels[target].handle.as_ref(), slot.completion.as_mut())
            else {
                return Err(DeviceError::Unexpected);
            };
            let signaled = os.wait_one(c, timeout) == WaitOutcome::Signaled;
            (signaled, os.poll_write(handle, c, &slot.report[..slot.report_len]))
        };

        if signaled && let Ok(IoStatus::Complete(n)) = status {
            let slot = self.pool.get_mut(idx);
            slot.in_flight = false;
            return slot.record_transfer(n);
        }

        let still_pending = status == Ok(IoStatus::Pending);
        log::warn!(
            "device {}: send did not complete (signaled={signaled}, status={status:?})",
            self.id
        );
        self.abort_send(os, idx);
        if !signaled && still_pending {
            Err(DeviceError::Timeout)
        } else {
            Err(DeviceError::Io)
        }
    }

    /// Send a report without blocking. `callback` fires exactly once if this
    /// returns `Ok`, and never if it returns `Err`.
    pub(crate) fn send_async(
        &mut self,
        os: &P,
        report: &[u8],
        timeout: Duration,
        callback: SendCallback,
    ) -> Result<(), DeviceError> {
        let idx = self.prepare_send(os, report)?;
        {
            let slot = self.pool.get_mut(idx);
            slot.callback = Some(callback);
            slot.deadline = (!timeout.is_zero()).then(|| Instant::now() + timeout);
        }
        match self.activate(os, idx) {
            Err(e) => {
                self.pool.get_mut(idx).release();
                Err(e)
            }
            Ok(Activation::Complete(n)) => {
                let result = self.pool.get_mut(idx).record_transfer(n);
                self.finish_send(idx, result);
                Ok(())
            }
            Ok(Activation::Pending) => Ok(()),
        }
    }
}
