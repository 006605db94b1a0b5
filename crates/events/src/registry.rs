//! Event-name lookups: constructors and listeners.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value as JsonValue;

use eventide_core::CoreResult;

use crate::envelope::EventEnvelope;
use crate::event::Event;

/// Rebuilds an event from its stored JSON payload.
pub type EventCtor = fn(JsonValue) -> CoreResult<EventEnvelope>;

/// Reacts to an executed event.
///
/// Listeners run after the event's own `execute`, in registration order. They
/// may run more than once for the same event when a queued event is retried, so
/// they must be idempotent.
#[async_trait]
pub trait Listener: Send + Sync {
    /// Name used in logs and error context.
    fn name(&self) -> &str;

    async fn handle(&self, event: &EventEnvelope) -> anyhow::Result<()>;
}

/// Read-only registry of known events, populated once at startup.
#[derive(Default)]
pub struct EventRegistry {
    ctors: HashMap<String, EventCtor>,
    listeners: HashMap<String, Vec<Arc<dyn Listener>>>,
}

impl EventRegistry {
    pub fn builder() -> EventRegistryBuilder {
        EventRegistryBuilder::default()
    }

    /// Constructor registered for `name`, if any.
    pub fn get_event_ctor_by_name(&self, name: &str) -> Option<EventCtor> {
        self.ctors.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ctors.contains_key(name)
    }

    pub fn listeners_for(&self, name: &str) -> &[Arc<dyn Listener>] {
        self.listeners.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Run `event` and then its listeners; the first failure stops the chain.
    pub async fn execute(&self, event: &EventEnvelope) -> anyhow::Result<()> {
        event.execute().await?;

        for listener in self.listeners_for(event.name()) {
            listener.handle(event).await.with_context(|| {
                format!(
                    "listener '{}' failed for event '{}'",
                    listener.name(),
                    event.name()
                )
            })?;
        }

        Ok(())
    }
}

impl core::fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut events: Vec<&str> = self.ctors.keys().map(String::as_str).collect();
        events.sort_unstable();
        f.debug_struct("EventRegistry")
            .field("events", &events)
            .field("listeners", &self.listeners.values().map(Vec::len).sum::<usize>())
            .finish()
    }
}

/// Setup-time builder for [`EventRegistry`].
#[derive(Default)]
pub struct EventRegistryBuilder {
    ctors: HashMap<String, EventCtor>,
    listeners: HashMap<String, Vec<Arc<dyn Listener>>>,
}

impl EventRegistryBuilder {
    /// Make `E` replayable by name.
    pub fn register_event<E: Event>(mut self) -> Self {
        self.ctors
            .insert(E::NAME.to_string(), EventEnvelope::from_payload::<E>);
        self
    }

    /// Append listeners for `E`, keeping registration order.
    pub fn register_listeners<E: Event>(
        mut self,
        listeners: impl IntoIterator<Item = Arc<dyn Listener>>,
    ) -> Self {
        self.listeners
            .entry(E::NAME.to_string())
            .or_default()
            .extend(listeners);
        self
    }

    pub fn build(self) -> EventRegistry {
        EventRegistry {
            ctors: self.ctors,
            listeners: self.listeners,
        }
    }
}
