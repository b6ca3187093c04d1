//! Synchronous topic-keyed fan-out.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::events::NdtEvent;

/// A registered callback. Handlers must not block: the call happens on
/// the emitting task, under a shared read lock.
pub type Handler = Arc<dyn Fn(&NdtEvent) + Send + Sync>;

/// Registry of handlers keyed by topic name, admitting concurrent `emit`
/// calls with exclusive registration (readers-writer lock).
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<&'static str, Vec<Handler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Registers `handler` for every event whose `topic()` equals `topic`.
    pub fn register(&self, topic: &'static str, handler: Handler) {
        self.handlers.write().entry(topic).or_default().push(handler);
    }

    /// Invokes every handler registered for `event.topic()`, in
    /// registration order, on the caller's task.
    pub fn emit(&self, event: NdtEvent) {
        let handlers = self.handlers.read();
        if let Some(list) = handlers.get(event.topic()) {
            for handler in list {
                handler(&event);
            }
        }
    }

    /// Number of handlers registered for a topic, used by tests to assert
    /// fan-out wiring without relying on side effects.
    pub fn handler_count(&self, topic: &str) -> usize {
        self.handlers.read().get(topic).map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{FlowAddedPayload, IdleFlowPurgedPayload};
    use ndtwin_common::FlowKey;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample_key() -> FlowKey {
        FlowKey::new(
            Ipv4Addr::new(10, 0, 0, 2),
            Ipv4Addr::new(10, 0, 0, 3),
            4444,
            80,
            6,
        )
    }

    #[test]
    fn emit_invokes_only_handlers_for_that_topic() {
        let bus = EventBus::new();
        let flow_added_calls = Arc::new(AtomicUsize::new(0));
        let purge_calls = Arc::new(AtomicUsize::new(0));

        let c1 = flow_added_calls.clone();
        bus.register("FlowAdded", Arc::new(move |_| {
            c1.fetch_add(1, Ordering::SeqCst);
        }));
        let c2 = purge_calls.clone();
        bus.register("IdleFlowPurged", Arc::new(move |_| {
            c2.fetch_add(1, Ordering::SeqCst);
        }));

        bus.emit(NdtEvent::FlowAdded(FlowAddedPayload {
            key: sample_key(),
            start_time_ms: 0,
        }));

        assert_eq!(flow_added_calls.load(Ordering::SeqCst), 1);
        assert_eq!(purge_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn handlers_fire_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        for id in 0..3 {
            let order = order.clone();
            bus.register("IdleFlowPurged", Arc::new(move |_| order.lock().push(id)));
        }

        bus.emit(NdtEvent::IdleFlowPurged(IdleFlowPurgedPayload {
            key: sample_key(),
            end_time_ms: 0,
        }));

        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn emit_with_no_registered_handlers_is_a_no_op() {
        let bus = EventBus::new();
        bus.emit(NdtEvent::IdleFlowPurged(IdleFlowPurgedPayload {
            key: sample_key(),
            end_time_ms: 0,
        }));
        assert_eq!(bus.handler_count("IdleFlowPurged"), 0);
    }
}
