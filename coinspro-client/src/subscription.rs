//! Persistent subscriptions keyed by event class and instrument.

use crate::dispatcher::Envelope;
use coinspro_protocol::message::instrument_id;
use coinspro_protocol::EventClass;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Callback invoked once per delivered event.
pub type Listener = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// Identifies one persistent event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    pub class: EventClass,
    pub instrument: Option<u64>,
}

impl SubscriptionKey {
    /// Creates a key. Account events are never keyed by instrument.
    pub fn new(class: EventClass, instrument: Option<u64>) -> Self {
        let instrument = if class.is_per_instrument() {
            instrument
        } else {
            None
        };
        Self { class, instrument }
    }

    /// Derives the key a subscribe request will be delivered under.
    pub fn for_subscribe(name: &str, body: &Value) -> Option<Self> {
        let class = EventClass::from_subscribe_name(name)?;
        Some(Self::new(class, body.get("InstrumentId").and_then(instrument_id)))
    }

    /// Derives the key an unsubscribe request cancels.
    pub fn for_unsubscribe(name: &str, body: &Value) -> Option<Self> {
        let class = EventClass::from_unsubscribe_name(name)?;
        Some(Self::new(class, body.get("InstrumentId").and_then(instrument_id)))
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.instrument {
            Some(id) => write!(f, "{}/{}", self.class, id),
            None => write!(f, "{}", self.class),
        }
    }
}

/// Subscription listeners, one per key.
///
/// Subscribing again under an existing key replaces the listener.
#[derive(Default)]
pub struct SubscriptionTable {
    listeners: Mutex<HashMap<SubscriptionKey, Listener>>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener` under `key`. Returns true if a listener was replaced.
    pub fn insert(&self, key: SubscriptionKey, listener: Listener) -> bool {
        self.listeners.lock().insert(key, listener).is_some()
    }

    /// Removes the listener under `key`.
    pub fn remove(&self, key: &SubscriptionKey) -> bool {
        self.listeners.lock().remove(key).is_some()
    }

    /// Delivers an event to the listener under `key`.
    ///
    /// The table lock is released before the listener runs. A panicking
    /// listener is logged and does not propagate. Returns the number of
    /// listeners that completed.
    pub fn deliver(&self, key: &SubscriptionKey, envelope: &Envelope) -> usize {
        let listener = self.listeners.lock().get(key).cloned();
        let Some(listener) = listener else {
            return 0;
        };

        match catch_unwind(AssertUnwindSafe(|| listener(envelope))) {
            Ok(()) => 1,
            Err(_) => {
                tracing::warn!(
                    "subscription {}: listener panicked on {} (sequence={})",
                    key,
                    envelope.name,
                    envelope.sequence
                );
                0
            }
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.listeners.lock().clear();
    }
}
