//! Inbound reports: keeping reads armed, polling them, and the blocking read.
//!
//! At most one read is outstanding per channel. While a receive callback is
//! installed on an open device, every channel is kept armed: reads that
//! complete synchronously are delivered immediately and reissued until the
//! OS reports the read as pending.

use std::ops::ControlFlow;
use std::time::Duration;

use arrayvec::ArrayVec;

use crate::bridge::Bridge;
use crate::error::DeviceError;
use crate::handle::{LogicalDevice, MAX_CHANNELS, ReceiveCallback};
use crate::platform::{IoStatus, OsError, Platform, WaitOutcome};

impl<P: Platform> LogicalDevice<P> {
    fn start_read(&mut self, os: &P, idx: usize) -> Result<IoStatus, OsError> {
        let ch = &mut self.channels[idx];
        let len = ch.read_len();
        let (Some(handle), Some(c)) = (ch.handle.as_ref(), ch.read_completion.as_mut()) else {
            return Err(OsError::Aborted);
        };
        os.start_read(handle, c, &mut ch.read_buf[..len])
    }

    fn poll_read(&mut self, os: &P, idx: usize) -> Result<IoStatus, OsError> {
        let ch = &mut self.channels[idx];
        let len = ch.read_len();
        let (Some(handle), Some(c)) = (ch.handle.as_ref(), ch.read_completion.as_mut()) else {
            return Err(OsError::Aborted);
        };
        os.poll_read(handle, c, &mut ch.read_buf[..len])
    }

    /// Hand one read outcome to the receive callback.
    ///
    /// Returns `Break` if the callback asked to be cleared; the callback is
    /// already removed at that point. Payloads with no callback installed are
    /// dropped.
    fn deliver(&mut self, idx: usize, payload: Result<usize, DeviceError>) -> ControlFlow<()> {
        let id = self.id;
        let Some(cb) = self.receiver.as_mut() else {
            log::trace!("device {id}: no receiver, dropping read result");
            return ControlFlow::Continue(());
        };
        let data = payload.map(|n| &self.channels[idx].read_buf[..n]);
        if let Ok(bytes) = data {
            log::trace!("device {id}: read {bytes:02x?}");
        }
        let flow = cb(id, data);
        if flow.is_break() {
            log::debug!("device {id}: receive callback cleared itself");
            self.receiver = None;
        }
        flow
    }

    /// Clear the receive callback, unregister read primitives, and cancel pending reads.
    pub(crate) fn stop_receiving(&mut self, os: &P, bridge: &mut Bridge) {
        self.receiver = None;
        self.unbridge_reads(bridge);
        for idx in 0..self.channels.len() {
            if self.channels[idx].read_pending {
                self.cancel_channel(os, idx);
            }
        }
    }

    /// Arm a read on every channel that has none outstanding.
    ///
    /// Does nothing unless the device is open with a receive callback. A
    /// channel whose read fails to issue gets the error delivered and is left
    /// unarmed; the pass continues and reports `Interrupted` at the end.
    pub(crate) fn rearm(&mut self, os: &P, bridge: &mut Bridge) -> Result<(), DeviceError> {
        if !self.opened || self.receiver.is_none() {
            return Ok(());
        }
        let mut outcome = Ok(());
        for idx in 0..self.channels.len() {
            if self.channels[idx].read_pending {
                continue;
            }
            loop {
                match self.start_read(os, idx) {
                    Ok(IoStatus::Complete(n)) => {
                        if self.deliver(idx, Ok(n)).is_break() {
                            self.stop_receiving(os, bridge);
                            return outcome;
                        }
                    }
                    Ok(IoStatus::Pending) => {
                        self.channels[idx].read_pending = true;
                        break;
                    }
                    Err(e) => {
                        log::warn!(
                            "device {}: read on {} failed: {e}",
                            self.id,
                            self.channels[idx].info.path
                        );
                        outcome = Err(DeviceError::Interrupted);
                        if self.deliver(idx, Err(e.into())).is_break() {
                            self.stop_receiving(os, bridge);
                            return outcome;
                        }
                        std::thread::yield_now();
                        break;
                    }
                }
            }
        }
        outcome
    }

    /// Check every pending read without blocking and deliver what finished.
    pub(crate) fn poll_reads(&mut self, os: &P, bridge: &mut Bridge) -> ControlFlow<()> {
        for idx in 0..self.channels.len() {
            if !self.channels[idx].read_pending {
                continue;
            }
            let payload = match self.poll_read(os, idx) {
                Ok(IoStatus::Pending) => continue,
                Ok(IoStatus::Complete(n)) => Ok(n),
                Err(e) => {
                    log::warn!(
                        "device {}: pending read on {} failed: {e}",
                        self.id,
                        self.channels[idx].info.path
                    );
                    Err(e.into())
                }
            };
            self.channels[idx].read_pending = false;
            let failed = payload.is_err();
            if self.deliver(idx, payload).is_break() {
                self.stop_receiving(os, bridge);
                return ControlFlow::Break(());
            }
            if failed {
                std::thread::yield_now();
            }
        }
        ControlFlow::Continue(())
    }

    /// Wait up to `timeout` for one report from any channel and copy it into `buf`.
    ///
    /// Returns the number of bytes copied, truncated to `buf.len()`.
    pub(crate) fn read(&mut self, os: &P, buf: &mut [u8], timeout: Duration) -> Result<usize, DeviceError> {
        if !self.opened {
            return Err(DeviceError::Io);
        }
        for idx in 0..self.channels.len() {
            if self.channels[idx].read_pending {
                continue;
            }
            match self.start_read(os, idx) {
                Ok(IoStatus::Complete(n)) => return Ok(self.copy_out(idx, n, buf)),
                Ok(IoStatus::Pending) => self.channels[idx].read_pending = true,
                Err(e) => {
                    log::warn!("device {}: read failed: {e}", self.id);
                    std::thread::yield_now();
                    return Err(DeviceError::Interrupted);
                }
            }
        }

        let outcome = {
            let ops: ArrayVec<&P::Completion, MAX_CHANNELS> = self
                .channels
                .iter()
                .filter(|c| c.read_pending)
                .filter_map(|c| c.read_completion.as_ref())
                .collect();
            if ops.is_empty() {
                return Err(DeviceError::Interrupted);
            }
            os.wait_any(&ops, timeout)
        };
        match outcome {
            WaitOutcome::Signaled => {}
            WaitOutcome::TimedOut => return Err(DeviceError::Timeout),
            WaitOutcome::Failed => {
                log::warn!("device {}: wait failed", self.id);
                return Err(DeviceError::Interrupted);
            }
        }

        for idx in 0..self.channels.len() {
            if !self.channels[idx].read_pending {
                continue;
            }
            match self.poll_read(os, idx) {
                Ok(IoStatus::Pending) => {}
                Ok(IoStatus::Complete(n)) => {
                    self.channels[idx].read_pending = false;
                    return Ok(self.copy_out(idx, n, buf));
                }
                Err(e) => {
                    log::warn!("device {}: read completion failed: {e}", self.id);
                    self.channels[idx].read_pending = false;
                    std::thread::yield_now();
                    return Err(DeviceError::Interrupted);
                }
            }
        }
        Err(DeviceError::Interrupted)
    }

    fn copy_out(&self, idx: usize, n: usize, buf: &mut [u8]) -> usize {
        let n = n.min(buf.len());
        buf[..n].copy_from_slice(&self.channels[idx].read_buf[..n]);
        n
    }

    /// Install, replace, or clear the receive callback.
    pub(crate) fn set_receiver(
        &mut self,
        os: &P,
        bridge: &mut Bridge,
        callback: Option<ReceiveCallback>,
    ) -> Result<(), DeviceError> {
        match (self.opened, self.receiver.is_some(), callback) {
            (true, true, None) => {
                self.stop_receiving(os, bridge);
                Ok(())
            }
            (true, false, Some(cb)) => {
                self.receiver = Some(cb);
                self.bridge_reads(bridge);
                self.rearm(os, bridge)
            }
            (_, _, cb) => {
                self.receiver = cb;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::ops::ControlFlow;
    use std::rc::Rc;
    use std::time::Duration;

    use crate::bridge::{Bridge, RecordingBridge};
    use crate::config::EngineConfig;
    use crate::error::DeviceError;
    use crate::handle::{ChannelInfo, DeviceId, LogicalDevice, ReceiveCallback};
    use crate::platform::OsError;
    use crate::platform::mock::MockPlatform;

    type Received = Rc<RefCell<Vec<Result<Vec<u8>, DeviceError>>>>;

    fn channel(path: &str) -> ChannelInfo {
        ChannelInfo {
            path: path.into(),
            vendor_id: 1,
            product_id: 2,
            input_report_len: 4,
            output_report_len: 4,
        }
    }

    fn opened(paths: &[&str]) -> (MockPlatform, LogicalDevice<MockPlatform>, Bridge, RecordingBridge) {
        let os = MockPlatform::new();
        let rec = RecordingBridge::new();
        let mut bridge = Bridge::default();
        bridge.replace(Some(Box::new(rec.clone())));
        let mut dev = LogicalDevice::new(DeviceId(3), "dev".into(), 1);
        for p in paths {
            dev.attach(channel(p)).unwrap();
        }
        dev.open(&os, &mut bridge, &EngineConfig::default()).unwrap();
        (os, dev, bridge, rec)
    }

    fn collector(stop_after: Option<usize>) -> (Received, ReceiveCallback) {
        let got: Received = Rc::default();
        let sink = Rc::clone(&got);
        let cb: ReceiveCallback = Box::new(move |_, r| {
            let mut v = sink.borrow_mut();
            v.push(r.map(<[u8]>::to_vec));
            match stop_after {
                Some(n) if v.len() >= n => ControlFlow::Break(()),
                _ => ControlFlow::Continue(()),
            }
        });
        (got, cb)
    }

    #[test]
    fn installing_callback_arms_every_channel() {
        let (os, mut dev, mut bridge, _) = opened(&["a", "b"]);
        let (_, cb) = collector(None);
        dev.set_receiver(&os, &mut bridge, Some(cb)).unwrap();
        assert!(dev.channels().iter().all(|c| c.read_pending()));
        assert_eq!(os.reads_issued("a"), 1);
        assert_eq!(os.reads_issued("b"), 1);
    }

    #[test]
    fn synchronous_reads_are_drained_before_arming() {
        let (os, mut dev, mut bridge, _) = opened(&["a"]);
        os.push_read("a", &[1, 2, 3, 4]);
        os.push_read("a", &[5, 6, 7, 8]);
        let (got, cb) = collector(None);
        dev.set_receiver(&os, &mut bridge, Some(cb)).unwrap();
        assert_eq!(
            *got.borrow(),
            vec![Ok(vec![1, 2, 3, 4]), Ok(vec![5, 6, 7, 8])]
        );
        assert_eq!(os.reads_issued("a"), 3);
        assert!(dev.channels()[0].read_pending());
    }

    #[test]
    fn rearm_without_callback_is_noop() {
        let (os, mut dev, mut bridge, _) = opened(&["a"]);
        dev.rearm(&os, &mut bridge).unwrap();
        assert_eq!(os.reads_issued("a"), 0);
    }

    #[test]
    fn issue_failure_is_delivered_and_reported() {
        let (os, mut dev, mut bridge, _) = opened(&["a", "b"]);
        os.push_read_error("a", OsError::Disconnected);
        let (got, cb) = collector(None);
        assert_eq!(
            dev.set_receiver(&os, &mut bridge, Some(cb)),
            Err(DeviceError::Interrupted)
        );
        assert_eq!(*got.borrow(), vec![Err(DeviceError::NotFound)]);
        assert!(!dev.channels()[0].read_pending());
        // the other channel is still armed
        assert!(dev.channels()[1].read_pending());
    }

    #[test]
    fn poll_delivers_arrived_reports() {
        let (os, mut dev, mut bridge, _) = opened(&["a"]);
        let (got, cb) = collector(None);
        dev.set_receiver(&os, &mut bridge, Some(cb)).unwrap();
        os.arrive("a", &[9, 9, 9, 9]);
        assert!(dev.poll_reads(&os, &mut bridge).is_continue());
        assert_eq!(*got.borrow(), vec![Ok(vec![9, 9, 9, 9])]);
        assert!(!dev.channels()[0].read_pending());
    }

    #[test]
    fn poll_reports_completion_failure_as_unexpected() {
        let (os, mut dev, mut bridge, _) = opened(&["a"]);
        let (got, cb) = collector(None);
        dev.set_receiver(&os, &mut bridge, Some(cb)).unwrap();
        os.arrive_error("a", OsError::Code(31));
        let _ = dev.poll_reads(&os, &mut bridge);
        assert_eq!(*got.borrow(), vec![Err(DeviceError::Unexpected)]);
    }

    #[test]
    fn poll_reports_disconnect_as_not_found() {
        let (os, mut dev, mut bridge, _) = opened(&["a"]);
        let (got, cb) = collector(None);
        dev.set_receiver(&os, &mut bridge, Some(cb)).unwrap();
        os.arrive_error("a", OsError::Disconnected);
        assert!(dev.poll_reads(&os, &mut bridge).is_continue());
        assert_eq!(*got.borrow(), vec![Err(DeviceError::NotFound)]);
        assert!(!dev.channels()[0].read_pending());
    }

    #[test]
    fn callback_can_clear_itself() {
        let (os, mut dev, mut bridge, rec) = opened(&["a", "b"]);
        let (got, cb) = collector(Some(1));
        dev.set_receiver(&os, &mut bridge, Some(cb)).unwrap();
        os.arrive("a", &[1, 1, 1, 1]);
        os.arrive("b", &[2, 2, 2, 2]);
        assert!(dev.poll_reads(&os, &mut bridge).is_break());
        assert_eq!(got.borrow().len(), 1, "no delivery after clearing");
        assert!(!dev.has_receive_callback());
        assert!(dev.channels().iter().all(|c| !c.read_pending()));
        // only the send slot primitive is still registered
        assert_eq!(rec.live().len(), 1);
        // a later pass issues nothing
        dev.rearm(&os, &mut bridge).unwrap();
        assert_eq!(os.reads_issued("a"), 1);
    }

    #[test]
    fn clear_during_drain_stops_issuing() {
        let (os, mut dev, mut bridge, _) = opened(&["a", "b"]);
        os.push_read("a", &[1, 0, 0, 0]);
        os.push_read("a", &[2, 0, 0, 0]);
        let (got, cb) = collector(Some(1));
        dev.set_receiver(&os, &mut bridge, Some(cb)).unwrap();
        assert_eq!(got.borrow().len(), 1);
        assert_eq!(os.reads_issued("a"), 1);
        assert_eq!(os.reads_issued("b"), 0);
    }

    #[test]
    fn clearing_callback_cancels_pending_reads() {
        let (os, mut dev, mut bridge, rec) = opened(&["a", "b"]);
        let (_, cb) = collector(None);
        dev.set_receiver(&os, &mut bridge, Some(cb)).unwrap();
        let before = rec.live().len();
        dev.set_receiver(&os, &mut bridge, None).unwrap();
        assert_eq!(os.cancels("a"), 1);
        assert_eq!(os.cancels("b"), 1);
        assert_eq!(rec.live().len(), before - 2);
    }

    #[test]
    fn replacing_callback_keeps_reads_armed() {
        let (os, mut dev, mut bridge, _) = opened(&["a"]);
        let (first, cb1) = collector(None);
        let (second, cb2) = collector(None);
        dev.set_receiver(&os, &mut bridge, Some(cb1)).unwrap();
        dev.set_receiver(&os, &mut bridge, Some(cb2)).unwrap();
        assert_eq!(os.reads_issued("a"), 1);
        os.arrive("a", &[4, 4, 4, 4]);
        let _ = dev.poll_reads(&os, &mut bridge);
        assert!(first.borrow().is_empty());
        assert_eq!(second.borrow().len(), 1);
    }

    #[test]
    fn callback_on_closed_device_is_just_stored() {
        let os = MockPlatform::new();
        let mut dev = LogicalDevice::<MockPlatform>::new(DeviceId(0), "d".into(), 1);
        dev.attach(channel("a")).unwrap();
        let (_, cb) = collector(None);
        dev.set_receiver(&os, &mut Bridge::default(), Some(cb)).unwrap();
        assert!(dev.has_receive_callback());
        assert_eq!(os.reads_issued("a"), 0);
    }

    #[test]
    fn blocking_read_returns_immediate_report() {
        let (os, mut dev, _, _) = opened(&["a"]);
        os.push_read("a", &[7, 8, 9, 10]);
        let mut buf = [0u8; 16];
        assert_eq!(dev.read(&os, &mut buf, Duration::from_millis(10)), Ok(4));
        assert_eq!(&buf[..4], &[7, 8, 9, 10]);
    }

    #[test]
    fn blocking_read_truncates_to_caller_buffer() {
        let (os, mut dev, _, _) = opened(&["a"]);
        os.push_read("a", &[7, 8, 9, 10]);
        let mut buf = [0u8; 2];
        assert_eq!(dev.read(&os, &mut buf, Duration::from_millis(10)), Ok(2));
        assert_eq!(buf, [7, 8]);
    }

    #[test]
    fn blocking_read_waits_for_arrival() {
        let (os, mut dev, _, _) = opened(&["a", "b"]);
        os.arrive("b", &[5, 5, 5, 5]);
        let mut buf = [0u8; 4];
        assert_eq!(dev.read(&os, &mut buf, Duration::from_millis(10)), Ok(4));
        assert_eq!(buf, [5, 5, 5, 5]);
        assert!(dev.channels()[0].read_pending());
        assert!(!dev.channels()[1].read_pending());
    }

    #[test]
    fn blocking_read_times_out() {
        let (os, mut dev, _, _) = opened(&["a"]);
        let mut buf = [0u8; 4];
        assert_eq!(
            dev.read(&os, &mut buf, Duration::from_millis(10)),
            Err(DeviceError::Timeout)
        );
        // the read stays armed for the next call
        assert!(dev.channels()[0].read_pending());
    }

    #[test]
    fn blocking_read_wait_failure_is_interrupted() {
        let (os, mut dev, _, _) = opened(&["a"]);
        os.set_fail_wait(true);
        let mut buf = [0u8; 4];
        assert_eq!(
            dev.read(&os, &mut buf, Duration::from_millis(10)),
            Err(DeviceError::Interrupted)
        );
    }

    #[test]
    fn blocking_read_issue_failure_is_interrupted() {
        let (os, mut dev, _, _) = opened(&["a"]);
        os.push_read_error("a", OsError::Code(1));
        let mut buf = [0u8; 4];
        assert_eq!(
            dev.read(&os, &mut buf, Duration::from_millis(10)),
            Err(DeviceError::Interrupted)
        );
    }

    #[test]
    fn blocking_read_on_closed_device_is_io() {
        let mut dev = LogicalDevice::<MockPlatform>::new(DeviceId(0), "d".into(), 1);
        let mut buf = [0u8; 4];
        assert_eq!(
            dev.read(&MockPlatform::new(), &mut buf, Duration::ZERO),
            Err(DeviceError::Io)
        );
    }
}
