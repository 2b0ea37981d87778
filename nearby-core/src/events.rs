//! Typed publish/subscribe for [`Event`]s.
//!
//! One consumer per event kind. Subscribing to a kind that already has a
//! consumer takes it over; the previous subscription stops receiving that
//! kind. Events emitted while a kind has no consumer are dropped, never
//! buffered. Unsubscribing does not touch in-flight backend operations.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::protocol::{Event, EventKind};

type SubscriptionId = u64;

#[derive(Default)]
struct Registry {
    next_id: SubscriptionId,
    routes: HashMap<EventKind, (SubscriptionId, mpsc::UnboundedSender<Event>)>,
}

/// Cloneable handle; all clones share one registry.
#[derive(Clone, Default)]
pub struct EventEmitter {
    registry: Arc<Mutex<Registry>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a single kind.
    pub fn subscribe(&self, kind: EventKind) -> Subscription {
        self.subscribe_many(&[kind])
    }

    /// Subscribe to several kinds on one channel. Events arrive in emission order.
    pub fn subscribe_many(&self, kinds: &[EventKind]) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut reg = self.registry.lock();
        reg.next_id += 1;
        let id = reg.next_id;
        for &kind in kinds {
            if let Some((previous, _)) = reg.routes.insert(kind, (id, tx.clone())) {
                debug!(kind = kind.name(), previous, id, "listener replaced");
            }
        }
        drop(reg);
        Subscription {
            id,
            kinds: kinds.to_vec(),
            rx,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Deliver to the consumer of `event.kind()`. Returns false if dropped.
    pub fn emit(&self, event: Event) -> bool {
        let kind = event.kind();
        let mut reg = self.registry.lock();
        let delivered = match reg.routes.get(&kind) {
            Some((_, tx)) => tx.send(event).is_ok(),
            None => false,
        };
        if !delivered {
            // receiver gone without unsubscribing (task aborted)
            if reg.routes.get(&kind).is_some_and(|(_, tx)| tx.is_closed()) {
                reg.routes.remove(&kind);
            }
            trace!(kind = kind.name(), "no listener, event dropped");
        }
        delivered
    }

    pub fn has_listener(&self, kind: EventKind) -> bool {
        self.registry.lock().routes.contains_key(&kind)
    }
}

/// Receiving end of a subscription. Dropping it unsubscribes.
pub struct Subscription {
    id: SubscriptionId,
    kinds: Vec<EventKind>,
    rx: mpsc::UnboundedReceiver<Event>,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    /// Next event. `None` once every kind of this subscription has been
    /// taken over by a newer subscriber, or the emitter is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    pub fn kinds(&self) -> &[EventKind] {
        &self.kinds
    }

    /// Stop delivery. Events already queued are discarded with the receiver.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut reg = registry.lock();
        for kind in &self.kinds {
            if reg.routes.get(kind).is_some_and(|(id, _)| *id == self.id) {
                reg.routes.remove(kind);
            }
        }
    }
}
