//! Semantic input events and the observer channel.
//!
//! Observers receive a tagged [`EngineEvent`] over a plain mpsc channel.
//! Registration hands back an [`ObserverToken`]; the registry keeps no
//! owning reference to the receiver side, and a dropped receiver is pruned
//! on the next broadcast.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};

use crate::error::ErrorKind;

/// The three pointer buttons the pipeline has semantics for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    Left,
    Right,
    Middle,
}

/// Relative axes the pipeline has semantics for. `Wheel` is a physical
/// scroll wheel report and is passed through, never converted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Wheel,
}

/// A decoded device report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemanticEvent {
    Button { button: Button, pressed: bool },
    Axis { axis: Axis, delta: i32 },
}

/// Notifications delivered to registered observers. All advisory; the
/// pipeline never waits on a receiver.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    DeviceAttached {
        name: String,
        vendor_id: u16,
        product_id: u16,
    },
    DeviceDetached {
        name: String,
    },
    /// Post-emulation logical button state. While a chord is active the
    /// left/right buttons report released and middle reports pressed.
    ButtonState {
        left: bool,
        right: bool,
        middle: bool,
    },
    ScrollModeChanged {
        active: bool,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
}

/// Handle returned by [`ObserverRegistry::register`]; pass it back to
/// [`ObserverRegistry::unregister`] to stop delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverToken(u64);

/// Fan-out of engine events to any number of mpsc subscribers.
#[derive(Default)]
pub struct ObserverRegistry {
    senders: Mutex<BTreeMap<u64, Sender<EngineEvent>>>,
    next_id: AtomicU64,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new observer and return its receiving end.
    pub fn register(&self) -> (ObserverToken, Receiver<EngineEvent>) {
        let (tx, rx) = mpsc::channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut senders) = self.senders.lock() {
            senders.insert(id, tx);
        }
        (ObserverToken(id), rx)
    }

    /// Remove an observer. Safe to call with a token that was already
    /// unregistered.
    pub fn unregister(&self, token: ObserverToken) {
        if let Ok(mut senders) = self.senders.lock() {
            senders.remove(&token.0);
        }
    }

    /// Deliver an event to every live observer. Senders whose receiver is
    /// gone are dropped. Never blocks: the channels are unbounded.
    pub fn broadcast(&self, event: EngineEvent) {
        let Ok(mut senders) = self.senders.lock() else {
            return;
        };
        senders.retain(|_, tx| tx.send(event.clone()).is_ok());
    }

    pub fn observer_count(&self) -> usize {
        self.senders.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_broadcast() {
        let registry = ObserverRegistry::new();
        let (_token, rx) = registry.register();

        registry.broadcast(EngineEvent::ScrollModeChanged { active: true });
        assert_eq!(
            rx.try_recv().unwrap(),
            EngineEvent::ScrollModeChanged { active: true }
        );
    }

    #[test]
    fn test_unregister_stops_delivery() {
        let registry = ObserverRegistry::new();
        let (token, rx) = registry.register();
        registry.unregister(token);

        registry.broadcast(EngineEvent::ScrollModeChanged { active: false });
        assert!(rx.try_recv().is_err());
        assert_eq!(registry.observer_count(), 0);
    }

    #[test]
    fn test_dropped_receiver_is_pruned() {
        let registry = ObserverRegistry::new();
        let (_token, rx) = registry.register();
        drop(rx);

        registry.broadcast(EngineEvent::ScrollModeChanged { active: true });
        assert_eq!(registry.observer_count(), 0);
    }

    #[test]
    fn test_multiple_observers_each_receive() {
        let registry = ObserverRegistry::new();
        let (_t1, rx1) = registry.register();
        let (_t2, rx2) = registry.register();

        let event = EngineEvent::DeviceDetached {
            name: "TrackPoint".into(),
        };
        registry.broadcast(event.clone());
        assert_eq!(rx1.try_recv().unwrap(), event);
        assert_eq!(rx2.try_recv().unwrap(), event);
    }
}
