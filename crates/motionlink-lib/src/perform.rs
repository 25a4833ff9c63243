//! The non-blocking progress tick.
//!
//! One pass resolves finished async sends, delivers finished reads, and rearms
//! reads. The embedding application runs it whenever a bridged primitive
//! signals, or periodically.

use std::time::Instant;

use crate::bridge::Bridge;
use crate::error::DeviceError;
use crate::handle::LogicalDevice;
use crate::platform::{IoStatus, Platform};

impl<P: Platform> LogicalDevice<P> {
    pub(crate) fn perform(&mut self, os: &P, bridge: &mut Bridge) -> Result<(), DeviceError> {
        if !self.opened {
            return Err(DeviceError::Io);
        }
        self.poll_sends(os);
        if self.poll_reads(os, bridge).is_break() {
            return Ok(());
        }
        self.rearm(os, bridge)
    }

    /// Resolve in-flight sends, expiring those past their deadline.
    fn poll_sends(&mut self, os: &P) {
        let now = Instant::now();
        for idx in 0..self.pool.capacity() {
            let status = {
                let slot = self.pool.get_mut(idx);
                if !slot.in_flight {
                    continue;
                }
                let Some(target) = slot.target else {
                    continue;
                };
                let (Some(handle), Some(c)) = (self.channels[target].handle.as_ref(), slot.completion.as_mut())
                else {
                    continue;
                };
                os.poll_write(handle, c, &slot.report[..slot.report_len])
            };
            match status {
                Ok(IoStatus::Complete(n)) => {
                    let result = self.pool.get_mut(idx).record_transfer(n);
                    log::trace!("device {}: async send in slot {idx} done: {result:?}", self.id);
                    self.finish_send(idx, result);
                }
                Ok(IoStatus::Pending) => {
                    if self.pool.get(idx).deadline.is_some_and(|d| now >= d) {
                        log::warn!("device {}: async send in slot {idx} timed out", self.id);
                        self.abort_send(os, idx);
                        self.finish_send(idx, Err(DeviceError::Timeout));
                    }
                }
                Err(e) => {
                    log::warn!("device {}: async send in slot {idx} failed: {e}", self.id);
                    self.finish_send(idx, Err(e.into()));
                }
            }
        }
    }
}
