//! Engine context — device registry, platform, settings, and the event bridge.
//!
//! Every application and collaborator operation goes through a [`Context`].
//! It is single-threaded (`!Sync`); callers serialize access per device.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::bridge::{Bridge, EventBridge};
use crate::config::EngineConfig;
use crate::error::DeviceError;
use crate::handle::{ChannelInfo, DeviceId, DeviceInfo, DiscoveryStatus, LogicalDevice, ReceiveCallback};
use crate::platform::{NativePlatform, Platform};
use crate::slot::MAX_SEND_SLOTS;

pub struct Context<P: Platform = NativePlatform> {
    platform: P,
    settings: EngineConfig,
    bridge: Bridge,
    devices: BTreeMap<DeviceId, LogicalDevice<P>>,
    next_id: u32,
}

impl Context<NativePlatform> {
    /// Context backed by the current target's OS backend.
    pub fn native(settings: EngineConfig) -> Self {
        Context::new(NativePlatform::default(), settings)
    }
}

impl<P: Platform> Context<P> {
    /// `settings.send_slots` is clamped to `1..=MAX_SEND_SLOTS`.
    pub fn new(platform: P, mut settings: EngineConfig) -> Self {
        settings.send_slots = settings.send_slots.clamp(1, MAX_SEND_SLOTS);
        Context {
            platform,
            settings,
            bridge: Bridge::default(),
            devices: BTreeMap::new(),
            next_id: 0,
        }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn settings(&self) -> &EngineConfig {
        &self.settings
    }

    /// Install, replace, or remove the event-loop bridge.
    ///
    /// Live primitives of open devices are unregistered from the old bridge
    /// and registered with the new one.
    pub fn set_event_bridge(&mut self, hooks: Option<Box<dyn EventBridge>>) {
        for dev in self.devices.values_mut() {
            dev.unbridge_reads(&mut self.bridge);
            dev.unbridge_slots(&mut self.bridge);
        }
        self.bridge.replace(hooks);
        for dev in self.devices.values_mut().filter(|d| d.is_opened()) {
            dev.bridge_reads(&mut self.bridge);
            dev.bridge_slots(&mut self.bridge);
        }
        log::debug!("event bridge {}", if self.bridge.is_active() { "installed" } else { "removed" });
    }

    fn get_mut(&mut self, id: DeviceId) -> Result<&mut LogicalDevice<P>, DeviceError> {
        self.devices.get_mut(&id).ok_or(DeviceError::NoDevice)
    }

    // ── Collaborator surface ──

    /// Create an empty, closed device record. Ids are never reused.
    pub fn create_device(&mut self, name: &str) -> DeviceId {
        let id = DeviceId(self.next_id);
        self.next_id += 1;
        self.devices.insert(
            id,
            LogicalDevice::new(id, name.to_string(), self.settings.send_slots),
        );
        log::debug!("device {id} ({name}) created");
        id
    }

    pub fn attach_channel(&mut self, id: DeviceId, info: ChannelInfo) -> Result<(), DeviceError> {
        self.get_mut(id)?.attach(info)
    }

    pub fn set_discovery_status(&mut self, id: DeviceId, status: DiscoveryStatus) -> Result<(), DeviceError> {
        self.get_mut(id)?.status = status;
        Ok(())
    }

    /// Close the device if needed and remove it from the registry.
    pub fn destroy_device(&mut self, id: DeviceId) -> Result<(), DeviceError> {
        let mut dev = self.devices.remove(&id).ok_or(DeviceError::NoDevice)?;
        dev.close(&self.platform, &mut self.bridge);
        log::debug!("device {id} destroyed");
        Ok(())
    }

    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.devices.keys().copied().collect()
    }

    pub fn device(&self, id: DeviceId) -> Option<&LogicalDevice<P>> {
        self.devices.get(&id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<DeviceId> {
        self.devices
            .values()
            .find(|d| d.name() == name)
            .map(LogicalDevice::id)
    }

    // ── Application surface ──

    pub fn device_info(&self, id: DeviceId) -> Result<DeviceInfo, DeviceError> {
        self.devices
            .get(&id)
            .map(LogicalDevice::info)
            .ok_or(DeviceError::NoDevice)
    }

    pub fn open(&mut self, id: DeviceId) -> Result<(), DeviceError> {
        let dev = self.devices.get_mut(&id).ok_or(DeviceError::NoDevice)?;
        dev.open(&self.platform, &mut self.bridge, &self.settings)
    }

    /// Close the device. Pending async sends complete with `Interrupted`.
    pub fn close(&mut self, id: DeviceId) -> Result<(), DeviceError> {
        let dev = self.devices.get_mut(&id).ok_or(DeviceError::NoDevice)?;
        dev.close(&self.platform, &mut self.bridge);
        Ok(())
    }

    /// Send a report, blocking up to the configured send timeout.
    pub fn send(&mut self, id: DeviceId, report: &[u8]) -> Result<(), DeviceError> {
        let dev = self.devices.get_mut(&id).ok_or(DeviceError::NoDevice)?;
        dev.send(&self.platform, report, self.settings.send_timeout)
    }

    /// Queue a report without blocking.
    ///
    /// On `Ok`, `callback` fires exactly once: before this returns if the write
    /// completes immediately, otherwise from a later [`perform`](Self::perform)
    /// or [`close`](Self::close). A zero `timeout` never expires.
    pub fn send_async<F>(&mut self, id: DeviceId, report: &[u8], timeout: Duration, callback: F) -> Result<(), DeviceError>
    where
        F: FnOnce(DeviceId, Result<(), DeviceError>) + 'static,
    {
        let dev = self.devices.get_mut(&id).ok_or(DeviceError::NoDevice)?;
        dev.send_async(&self.platform, report, timeout, Box::new(callback))
    }

    /// Wait up to `timeout` for one report and copy it into `buf`.
    pub fn read(&mut self, id: DeviceId, buf: &mut [u8], timeout: Duration) -> Result<usize, DeviceError> {
        let dev = self.devices.get_mut(&id).ok_or(DeviceError::NoDevice)?;
        dev.read(&self.platform, buf, timeout)
    }

    /// Cancel every pending read on the device.
    pub fn flush(&mut self, id: DeviceId) -> Result<(), DeviceError> {
        let dev = self.devices.get_mut(&id).ok_or(DeviceError::NoDevice)?;
        if !dev.is_opened() {
            return Err(DeviceError::Io);
        }
        dev.flush(&self.platform);
        Ok(())
    }

    /// Install, replace, or clear (`None`) the receive callback.
    ///
    /// On an open device, installing arms a read on every channel and may
    /// deliver reports before returning; clearing cancels pending reads.
    pub fn set_receive_callback(&mut self, id: DeviceId, callback: Option<ReceiveCallback>) -> Result<(), DeviceError> {
        let dev = self.devices.get_mut(&id).ok_or(DeviceError::NoDevice)?;
        dev.set_receiver(&self.platform, &mut self.bridge, callback)
    }

    /// One non-blocking progress tick for the device.
    pub fn perform(&mut self, id: DeviceId) -> Result<(), DeviceError> {
        let dev = self.devices.get_mut(&id).ok_or(DeviceError::NoDevice)?;
        dev.perform(&self.platform, &mut self.bridge)
    }

    /// Tick every open device. Returns the first error; every device still gets its tick.
    pub fn perform_all(&mut self) -> Result<(), DeviceError> {
        let mut first = Ok(());
        for dev in self.devices.values_mut().filter(|d| d.is_opened()) {
            if let Err(e) = dev.perform(&self.platform, &mut self.bridge)
                && first.is_ok()
            {
                first = Err(e);
            }
        }
        first
    }
}

impl<P: Platform> Drop for Context<P> {
    fn drop(&mut self) {
        for dev in self.devices.values_mut() {
            dev.close(&self.platform, &mut self.bridge);
        }
    }
}
