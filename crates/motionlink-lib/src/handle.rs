//! Logical devices and the physical report channels they aggregate.

use std::fmt;
use std::ops::ControlFlow;

use arrayvec::ArrayVec;
use serde::Serialize;

use crate::error::DeviceError;
use crate::platform::Platform;
use crate::slot::SendPool;

/// Maximum number of channels a logical device can aggregate.
pub const MAX_CHANNELS: usize = 4;

/// Hard upper bound on an output report, in bytes.
pub const MAX_OUTPUT_REPORT_SIZE: usize = 256;

/// Hard upper bound on an input report, in bytes (size of each channel's read buffer).
pub const MAX_INPUT_REPORT_SIZE: usize = 256;

/// Process-unique device identifier. Assigned once, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct DeviceId(pub(crate) u32);

impl DeviceId {
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryStatus {
    #[default]
    Unknown,
    Added,
    Removed,
}

/// Immutable metadata for one physical report interface, as supplied by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelInfo {
    pub path: String,
    pub vendor_id: u16,
    pub product_id: u16,
    /// Input report length in bytes (including the report ID byte).
    pub input_report_len: usize,
    /// Output report length in bytes (including the report ID byte).
    pub output_report_len: usize,
}

impl ChannelInfo {
    /// A channel with neither report length carries no usable metadata.
    pub fn has_metadata(&self) -> bool {
        self.input_report_len != 0 || self.output_report_len != 0
    }
}

/// Application-visible summary of a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub name: String,
    pub vendor: u16,
    pub product: u16,
    pub status: DiscoveryStatus,
    pub opened: bool,
}

/// Receive callback: gets each inbound payload (or the error that ended a read).
///
/// Returning [`ControlFlow::Break`] clears the callback from inside the
/// callback itself; no further payload is delivered and no further read is
/// issued for the rest of the current pass.
pub type ReceiveCallback = Box<dyn FnMut(DeviceId, Result<&[u8], DeviceError>) -> ControlFlow<()>>;

/// One physical report channel and its open-interval resources.
pub struct Channel<P: Platform> {
    pub(crate) info: ChannelInfo,
    pub(crate) handle: Option<P::Handle>,
    pub(crate) read_pending: bool,
    pub(crate) read_buf: Box<[u8; MAX_INPUT_REPORT_SIZE]>,
    pub(crate) read_completion: Option<P::Completion>,
    /// Read completion currently registered with the bridge.
    pub(crate) bridged: bool,
}

impl<P: Platform> Channel<P> {
    pub(crate) fn new(info: ChannelInfo) -> Self {
        Channel {
            info,
            handle: None,
            read_pending: false,
            read_buf: Box::new([0; MAX_INPUT_REPORT_SIZE]),
            read_completion: None,
            bridged: false,
        }
    }

    pub fn info(&self) -> &ChannelInfo {
        &self.info
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    pub fn read_pending(&self) -> bool {
        self.read_pending
    }

    /// Number of bytes a read on this channel requests.
    pub(crate) fn read_len(&self) -> usize {
        self.info.input_report_len.min(MAX_INPUT_REPORT_SIZE)
    }
}

/// A logical device: one or more channels plus a bounded pool of send slots.
pub struct LogicalDevice<P: Platform> {
    pub(crate) id: DeviceId,
    pub(crate) name: String,
    pub(crate) status: DiscoveryStatus,
    pub(crate) opened: bool,
    pub(crate) channels: ArrayVec<Channel<P>, MAX_CHANNELS>,
    pub(crate) pool: SendPool<P>,
    pub(crate) receiver: Option<ReceiveCallback>,
}

impl<P: Platform> LogicalDevice<P> {
    pub(crate) fn new(id: DeviceId, name: String, slot_count: usize) -> Self {
        LogicalDevice {
            id,
            name,
            status: DiscoveryStatus::Unknown,
            opened: false,
            channels: ArrayVec::new(),
            pool: SendPool::new(slot_count),
            receiver: None,
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> DiscoveryStatus {
        self.status
    }

    pub fn is_opened(&self) -> bool {
        self.opened
    }

    pub fn channels(&self) -> &[Channel<P>] {
        &self.channels
    }

    pub fn pool(&self) -> &SendPool<P> {
        &self.pool
    }

    pub fn has_receive_callback(&self) -> bool {
        self.receiver.is_some()
    }

    /// Attach a channel. Only allowed while closed; the collection never grows
    /// past [`MAX_CHANNELS`].
    pub(crate) fn attach(&mut self, info: ChannelInfo) -> Result<(), DeviceError> {
        if self.opened {
            return Err(DeviceError::Busy);
        }
        self.channels
            .try_push(Channel::new(info))
            .map_err(|_| DeviceError::Busy)
    }

    /// Summary built from the first channel's identifiers.
    pub fn info(&self) -> DeviceInfo {
        let (vendor, product) = self
            .channels
            .first()
            .map(|c| (c.info.vendor_id, c.info.product_id))
            .unwrap_or((0, 0));
        DeviceInfo {
            id: self.id,
            name: self.name.clone(),
            vendor,
            product,
            status: self.status,
            opened: self.opened,
        }
    }

    /// Index of the channel with the largest output report (first one on ties).
    pub(crate) fn output_channel(&self) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (idx, ch) in self.channels.iter().enumerate() {
            match best {
                Some(b) if self.channels[b].info.output_report_len >= ch.info.output_report_len => {}
                _ => best = Some(idx),
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mock::MockPlatform;

    fn channel(path: &str, input: usize, output: usize) -> ChannelInfo {
        ChannelInfo {
            path: path.into(),
            vendor_id: 0x1d5a,
            product_id: 0xc080,
            input_report_len: input,
            output_report_len: output,
        }
    }

    fn device() -> LogicalDevice<MockPlatform> {
        LogicalDevice::new(DeviceId(7), "FSRK".into(), 4)
    }

    #[test]
    fn new_device_is_closed_and_empty() {
        let dev = device();
        assert!(!dev.is_opened());
        assert!(dev.channels().is_empty());
        assert_eq!(dev.status(), DiscoveryStatus::Unknown);
        assert_eq!(dev.pool().capacity(), 4);
    }

    #[test]
    fn attach_is_capacity_bounded() {
        let mut dev = device();
        for i in 0..MAX_CHANNELS {
            dev.attach(channel(&format!("p{i}"), 8, 8)).unwrap();
        }
        assert_eq!(dev.attach(channel("extra", 8, 8)), Err(DeviceError::Busy));
        assert_eq!(dev.channels().len(), MAX_CHANNELS);
    }

    #[test]
    fn attach_rejected_while_open() {
        let mut dev = device();
        dev.opened = true;
        assert_eq!(dev.attach(channel("p", 8, 8)), Err(DeviceError::Busy));
    }

    #[test]
    fn output_channel_prefers_largest_output() {
        let mut dev = device();
        dev.attach(channel("small", 28, 7)).unwrap();
        dev.attach(channel("large", 28, 31)).unwrap();
        assert_eq!(dev.output_channel(), Some(1));
    }

    #[test]
    fn output_channel_first_on_tie() {
        let mut dev = device();
        dev.attach(channel("a", 8, 16)).unwrap();
        dev.attach(channel("b", 8, 16)).unwrap();
        assert_eq!(dev.output_channel(), Some(0));
    }

    #[test]
    fn output_channel_none_without_channels() {
        assert_eq!(device().output_channel(), None);
    }

    #[test]
    fn info_uses_first_channel_ids() {
        let mut dev = device();
        dev.attach(channel("a", 8, 16)).unwrap();
        let info = dev.info();
        assert_eq!(info.name, "FSRK");
        assert_eq!(info.vendor, 0x1d5a);
        assert_eq!(info.product, 0xc080);
        assert!(!info.opened);
    }

    #[test]
    fn info_without_channels_has_zero_ids() {
        let info = device().info();
        assert_eq!((info.vendor, info.product), (0, 0));
    }

    #[test]
    fn metadata_requires_a_report_length() {
        assert!(!channel("a", 0, 0).has_metadata());
        assert!(channel("a", 0, 8).has_metadata());
    }

    #[test]
    fn read_len_is_clamped_to_buffer() {
        let ch = Channel::<MockPlatform>::new(channel("a", 1000, 8));
        assert_eq!(ch.read_len(), MAX_INPUT_REPORT_SIZE);
    }
}
