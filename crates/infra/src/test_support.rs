//! Shared test doubles.

use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value as JsonValue;

use brokerdesk_events::{EventBus, EventEnvelope, InMemoryEventBus, Subscription};

pub(crate) type JsonEnvelope = EventEnvelope<JsonValue>;

/// In-memory bus whose publication can be switched off.
#[derive(Debug, Default)]
pub(crate) struct SwitchableBus {
    inner: InMemoryEventBus<JsonEnvelope>,
    down: AtomicBool,
}

impl SwitchableBus {
    pub(crate) fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }
}

impl EventBus<JsonEnvelope> for SwitchableBus {
    type Error = String;

    fn publish(&self, message: JsonEnvelope) -> Result<(), Self::Error> {
        if self.down.load(Ordering::SeqCst) {
            return Err("bus unreachable".to_string());
        }
        self.inner.publish(message).map_err(|e| e.to_string())
    }

    fn subscribe(&self) -> Subscription<JsonEnvelope> {
        self.inner.subscribe()
    }
}
