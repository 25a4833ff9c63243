//! Device open/close and channel-wide cancellation.
//!
//! Open either fully succeeds or rolls back everything it acquired: a failure
//! on any channel releases every handle, primitive, and bridge registration
//! taken so far and leaves the device closed and reopenable.

use crate::bridge::Bridge;
use crate::config::EngineConfig;
use crate::error::DeviceError;
use crate::handle::LogicalDevice;
use crate::platform::Platform;

impl<P: Platform> LogicalDevice<P> {
    pub(crate) fn open(
        &mut self,
        os: &P,
        bridge: &mut Bridge,
        settings: &EngineConfig,
    ) -> Result<(), DeviceError> {
        if self.opened {
            return Err(DeviceError::Busy);
        }
        if self.channels.is_empty() {
            return Err(DeviceError::NoDevice);
        }
        for ch in &self.channels {
            if ch.handle.is_some() {
                return Err(DeviceError::Busy);
            }
            if ch.info.path.is_empty() || !ch.info.has_metadata() {
                return Err(DeviceError::NoDevice);
            }
        }

        if let Err(e) = self.acquire(os, bridge, settings) {
            log::warn!("device {}: open failed ({e}), releasing partial state", self.id);
            self.release(os, bridge);
            return Err(e);
        }
        self.opened = true;
        log::debug!(
            "device {} ({}): opened {} channel(s)",
            self.id,
            self.name,
            self.channels.len()
        );

        if self.receiver.is_some()
            && let Err(e) = self.rearm(os, bridge)
        {
            log::warn!("device {}: initial receive arm failed: {e}", self.id);
        }
        Ok(())
    }

    fn acquire(
        &mut self,
        os: &P,
        bridge: &mut Bridge,
        settings: &EngineConfig,
    ) -> Result<(), DeviceError> {
        for ch in self.channels.iter_mut() {
            log::debug!("open channel {}", ch.info.path);
            let handle = os.open_channel(&ch.info.path).map_err(|e| {
                log::warn!("open {}: {e}", ch.info.path);
                DeviceError::NoDevice
            })?;
            os.set_input_buffers(&handle, settings.input_buffer_count)
                .map_err(|e| {
                    log::warn!("set input buffers on {}: {e}", ch.info.path);
                    DeviceError::NoDevice
                })?;
            let completion = os.create_read_completion(&handle).map_err(|e| {
                log::warn!("read completion for {}: {e}", ch.info.path);
                DeviceError::Unexpected
            })?;
            ch.handle = Some(handle);
            ch.read_completion = Some(completion);
            ch.read_pending = false;
        }
        self.bridge_reads(bridge);

        for slot in self.pool.slots_mut() {
            slot.ensure_completion(os)?;
        }
        self.bridge_slots(bridge);
        Ok(())
    }

    pub(crate) fn close(&mut self, os: &P, bridge: &mut Bridge) {
        if !self.opened {
            return;
        }
        self.release(os, bridge);
        self.opened = false;
        log::debug!("device {} ({}): closed", self.id, self.name);
    }

    /// Release every open-interval resource. Safe on a partially opened device.
    fn release(&mut self, os: &P, bridge: &mut Bridge) {
        let id = self.id;
        for slot in self.pool.slots_mut() {
            if slot.in_flight
                && let Some(t) = slot.target
                && let (Some(handle), Some(c)) =
                    (self.channels[t].handle.as_ref(), slot.completion.as_mut())
            {
                os.cancel_io(handle);
                os.settle(handle, c);
                slot.result = Err(DeviceError::Interrupted);
                let callback = slot.callback.take();
                slot.release();
                if let Some(cb) = callback {
                    cb(id, Err(DeviceError::Interrupted));
                }
            }
            slot.release();
        }
        self.unbridge_slots(bridge);
        for slot in self.pool.slots_mut() {
            slot.completion = None;
        }

        for idx in 0..self.channels.len() {
            self.cancel_channel(os, idx);
        }
        self.unbridge_reads(bridge);
        for ch in self.channels.iter_mut() {
            ch.handle = None;
            ch.read_completion = None;
            ch.read_pending = false;
        }
    }

    /// Cancel every outstanding operation on one channel.
    ///
    /// Cancellation is channel-wide: it aborts the pending read as well as any
    /// in-flight writes. The read is settled and its pending flag cleared here;
    /// aborted writes resolve on their next poll.
    pub(crate) fn cancel_channel(&mut self, os: &P, idx: usize) {
        let ch = &mut self.channels[idx];
        let Some(handle) = ch.handle.as_ref() else {
            return;
        };
        os.cancel_io(handle);
        if ch.read_pending {
            if let Some(c) = ch.read_completion.as_mut() {
                os.settle(handle, c);
            }
            ch.read_pending = false;
        }
    }

    /// Cancel pending reads on every channel.
    pub(crate) fn flush(&mut self, os: &P) {
        for idx in 0..self.channels.len() {
            self.cancel_channel(os, idx);
        }
    }
}
