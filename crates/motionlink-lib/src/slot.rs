//! Bounded pool of reusable outbound report buffers.
//!
//! A slot is in use exactly while it references a target channel. Allocation
//! is a first-fit scan; an exhausted pool is a hard `Busy`, never a queue.
//! Each slot keeps its completion primitive across reuses until device close.

use std::time::Instant;

use crate::error::DeviceError;
use crate::handle::{DeviceId, MAX_OUTPUT_REPORT_SIZE};
use crate::platform::Platform;

/// Upper bound on send slots per device.
pub const MAX_SEND_SLOTS: usize = 64;

/// Async send completion callback. Called exactly once per accepted send.
pub type SendCallback = Box<dyn FnOnce(DeviceId, Result<(), DeviceError>)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Free,
    /// Allocated and framed, write not yet issued.
    Preparing,
    /// Write issued and in flight.
    Pending,
}

pub struct SendSlot<P: Platform> {
    /// Index of the target channel; `None` means the slot is free.
    pub(crate) target: Option<usize>,
    pub(crate) in_flight: bool,
    pub(crate) report: Box<[u8; MAX_OUTPUT_REPORT_SIZE]>,
    /// Framed length: the target channel's output report length.
    pub(crate) report_len: usize,
    pub(crate) transferred: usize,
    pub(crate) result: Result<(), DeviceError>,
    pub(crate) callback: Option<SendCallback>,
    pub(crate) deadline: Option<Instant>,
    pub(crate) completion: Option<P::Completion>,
    pub(crate) bridged: bool,
}

impl<P: Platform> SendSlot<P> {
    fn new() -> Self {
        SendSlot {
            target: None,
            in_flight: false,
            report: Box::new([0; MAX_OUTPUT_REPORT_SIZE]),
            report_len: 0,
            transferred: 0,
            result: Ok(()),
            callback: None,
            deadline: None,
            completion: None,
            bridged: false,
        }
    }

    pub fn state(&self) -> SlotState {
        match (self.target, self.in_flight) {
            (None, _) => SlotState::Free,
            (Some(_), false) => SlotState::Preparing,
            (Some(_), true) => SlotState::Pending,
        }
    }

    pub fn is_free(&self) -> bool {
        self.target.is_none()
    }

    pub fn target(&self) -> Option<usize> {
        self.target
    }

    /// The framed report (payload plus zero padding).
    pub fn report(&self) -> &[u8] {
        &self.report[..self.report_len]
    }

    pub fn transferred(&self) -> usize {
        self.transferred
    }

    pub fn result(&self) -> Result<(), DeviceError> {
        self.result
    }

    pub fn has_completion(&self) -> bool {
        self.completion.is_some()
    }

    /// Return the slot to the free state. The completion primitive is kept.
    pub(crate) fn release(&mut self) {
        self.target = None;
        self.in_flight = false;
        self.callback = None;
        self.deadline = None;
    }

    /// Create the completion primitive if this slot has none yet.
    pub(crate) fn ensure_completion(&mut self, os: &P) -> Result<(), DeviceError> {
        if self.completion.is_none() {
            self.completion = Some(os.create_send_completion().map_err(|e| {
                log::warn!("send completion create failed: {e}");
                DeviceError::Unexpected
            })?);
        }
        Ok(())
    }
}

pub struct SendPool<P: Platform> {
    slots: Box<[SendSlot<P>]>,
}

impl<P: Platform> SendPool<P> {
    /// Pool of `count` slots, clamped to `1..=MAX_SEND_SLOTS`.
    pub(crate) fn new(count: usize) -> Self {
        let count = count.clamp(1, MAX_SEND_SLOTS);
        SendPool {
            slots: (0..count).map(|_| SendSlot::new()).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn in_use(&self) -> usize {
        self.slots.iter().filter(|s| !s.is_free()).count()
    }

    pub fn slots(&self) -> &[SendSlot<P>] {
        &self.slots
    }

    pub(crate) fn slots_mut(&mut self) -> &mut [SendSlot<P>] {
        &mut self.slots
    }

    /// First free slot, scanning from the start.
    pub(crate) fn first_free(&self) -> Option<usize> {
        self.slots.iter().position(SendSlot::is_free)
    }

    pub(crate) fn get(&self, idx: usize) -> &SendSlot<P> {
        &self.slots[idx]
    }

    pub(crate) fn get_mut(&mut self, idx: usize) -> &mut SendSlot<P> {
        &mut self.slots[idx]
    }
}
