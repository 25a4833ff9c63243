//! Event-loop bridge — lets an external dispatcher wait on engine primitives.
//!
//! The engine announces every waitable completion primitive it creates and
//! every one it destroys. The embedding application adds announced primitives
//! to its own wait set and calls `Context::perform` when any of them signals.

use std::cell::RefCell;
use std::rc::Rc;

use crate::handle::LogicalDevice;
use crate::platform::{Completion, Platform, Primitive};

/// Hooks implemented by the embedding application's event loop.
pub trait EventBridge {
    /// A primitive became waitable. `count` is the number of objects behind it (always 1).
    fn primitive_added(&mut self, primitive: Primitive, count: u32);
    fn primitive_removed(&mut self, primitive: Primitive);
}

/// The context's (optional) bridge. Inactive until the application installs hooks.
#[derive(Default)]
pub(crate) struct Bridge {
    hooks: Option<Box<dyn EventBridge>>,
}

impl Bridge {
    pub(crate) fn is_active(&self) -> bool {
        self.hooks.is_some()
    }

    pub(crate) fn replace(&mut self, hooks: Option<Box<dyn EventBridge>>) -> Option<Box<dyn EventBridge>> {
        std::mem::replace(&mut self.hooks, hooks)
    }

    fn add(&mut self, primitive: Primitive) -> bool {
        match self.hooks.as_mut() {
            Some(h) => {
                log::debug!("bridge: add {primitive}");
                h.primitive_added(primitive, 1);
                true
            }
            None => false,
        }
    }

    fn remove(&mut self, primitive: Primitive) {
        if let Some(h) = self.hooks.as_mut() {
            log::debug!("bridge: remove {primitive}");
            h.primitive_removed(primitive);
        }
    }
}

/// Register a primitive unless it already is. Returns the new registration flag.
fn register<C: Completion>(bridge: &mut Bridge, completion: Option<&C>, bridged: bool) -> bool {
    match completion {
        Some(c) if !bridged => bridge.add(c.primitive()),
        _ => bridged,
    }
}

fn unregister<C: Completion>(bridge: &mut Bridge, completion: Option<&C>, bridged: bool) -> bool {
    if let Some(c) = completion
        && bridged
    {
        bridge.remove(c.primitive());
    }
    false
}

impl<P: Platform> LogicalDevice<P> {
    pub(crate) fn bridge_reads(&mut self, bridge: &mut Bridge) {
        for ch in self.channels.iter_mut() {
            ch.bridged = register(bridge, ch.read_completion.as_ref(), ch.bridged);
        }
    }

    pub(crate) fn unbridge_reads(&mut self, bridge: &mut Bridge) {
        for ch in self.channels.iter_mut() {
            ch.bridged = unregister(bridge, ch.read_completion.as_ref(), ch.bridged);
        }
    }

    pub(crate) fn bridge_slots(&mut self, bridge: &mut Bridge) {
        for slot in self.pool.slots_mut() {
            slot.bridged = register(bridge, slot.completion.as_ref(), slot.bridged);
        }
    }

    pub(crate) fn unbridge_slots(&mut self, bridge: &mut Bridge) {
        for slot in self.pool.slots_mut() {
            slot.bridged = unregister(bridge, slot.completion.as_ref(), slot.bridged);
        }
    }
}

/// One recorded bridge call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeEvent {
    Added(Primitive),
    Removed(Primitive),
}

/// Bridge that records every call, for tests. Clones share the log.
#[doc(hidden)]
#[derive(Debug, Clone, Default)]
pub struct RecordingBridge {
    events: Rc<RefCell<Vec<BridgeEvent>>>,
}

impl RecordingBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<BridgeEvent> {
        self.events.borrow().clone()
    }

    /// Primitives added and not yet removed.
    pub fn live(&self) -> Vec<Primitive> {
        let mut live = Vec::new();
        for ev in self.events.borrow().iter() {
            match *ev {
                BridgeEvent::Added(p) => live.push(p),
                BridgeEvent::Removed(p) => {
                    if let Some(pos) = live.iter().position(|&q| q == p) {
                        live.remove(pos);
                    }
                }
            }
        }
        live
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }
}

impl EventBridge for RecordingBridge {
    fn primitive_added(&mut self, primitive: Primitive, _count: u32) {
        self.events.borrow_mut().push(BridgeEvent::Added(primitive));
    }

    fn primitive_removed(&mut self, primitive: Primitive) {
        self.events.borrow_mut().push(BridgeEvent::Removed(primitive));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mock::MockPlatform;

    #[test]
    fn inactive_bridge_registers_nothing() {
        let os = MockPlatform::new();
        let c = os.create_send_completion().unwrap();
        let mut bridge = Bridge::default();
        assert!(!register(&mut bridge, Some(&c), false));
    }

    #[test]
    fn register_is_idempotent() {
        let os = MockPlatform::new();
        let c = os.create_send_completion().unwrap();
        let rec = RecordingBridge::new();
        let mut bridge = Bridge::default();
        bridge.replace(Some(Box::new(rec.clone())));
        let flag = register(&mut bridge, Some(&c), false);
        let flag = register(&mut bridge, Some(&c), flag);
        assert!(flag);
        assert_eq!(rec.events(), vec![BridgeEvent::Added(c.primitive())]);
    }

    #[test]
    fn unregister_only_when_registered() {
        let os = MockPlatform::new();
        let c = os.create_send_completion().unwrap();
        let rec = RecordingBridge::new();
        let mut bridge = Bridge::default();
        bridge.replace(Some(Box::new(rec.clone())));
        assert!(!unregister(&mut bridge, Some(&c), false));
        assert!(rec.events().is_empty());
        assert!(!unregister(&mut bridge, Some(&c), true));
        assert_eq!(rec.events(), vec![BridgeEvent::Removed(c.primitive())]);
    }

    #[test]
    fn recording_bridge_tracks_live_set() {
        let mut rec = RecordingBridge::new();
        let a = Primitive::from_raw(1);
        let b = Primitive::from_raw(2);
        rec.primitive_added(a, 1);
        rec.primitive_added(b, 1);
        rec.primitive_removed(a);
        assert_eq!(rec.live(), vec![b]);
    }
}
