use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use eventide_core::{CoreError, CoreResult, to_payload, validate_event_name};

use crate::driver::DriverName;
use crate::event::{ErasedEvent, Event};

/// A dispatchable event: name, validated JSON payload, driver reference and queue.
///
/// Envelopes are built once per dispatch and are immutable afterwards. Building
/// one is the only place payloads are validated, so an invalid payload never
/// reaches a driver (let alone a queue).
#[derive(Clone)]
pub struct EventEnvelope {
    name: String,
    payload: JsonValue,
    driver: Option<DriverName>,
    queue_name: Option<String>,
    inner: Arc<dyn ErasedEvent>,
}

impl EventEnvelope {
    /// Wrap a typed event.
    ///
    /// Fails with [`CoreError::InvalidPayload`] if the event cannot be losslessly
    /// serialized to JSON, and with [`CoreError::EmptyEventName`] if `E::NAME` is empty.
    pub fn new<E: Event>(event: E) -> CoreResult<Self> {
        validate_event_name(E::NAME)?;
        let payload = to_payload(E::NAME, &event)?;

        Ok(Self {
            name: E::NAME.to_string(),
            payload,
            driver: event.driver(),
            queue_name: event.queue_name().map(str::to_string),
            inner: Arc::new(event),
        })
    }

    /// Rebuild an event of type `E` from a stored payload.
    pub fn from_payload<E: Event>(payload: JsonValue) -> CoreResult<Self> {
        let event: E = serde_json::from_value(payload)
            .map_err(|e| CoreError::invalid_payload(E::NAME, e.to_string()))?;
        Self::new(event)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Typed view of the payload.
    pub fn payload<T: DeserializeOwned>(&self) -> CoreResult<T> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| CoreError::invalid_payload(self.name.clone(), e.to_string()))
    }

    pub fn payload_value(&self) -> &JsonValue {
        &self.payload
    }

    pub fn driver(&self) -> Option<&DriverName> {
        self.driver.as_ref()
    }

    pub fn queue_name(&self) -> Option<&str> {
        self.queue_name.as_deref()
    }

    /// Override the driver chosen by the event type.
    pub fn with_driver(mut self, driver: impl Into<DriverName>) -> Self {
        self.driver = Some(driver.into());
        self
    }

    /// Override the queue chosen by the event type.
    pub fn on_queue(mut self, queue_name: impl Into<String>) -> Self {
        self.queue_name = Some(queue_name.into());
        self
    }

    /// Run the event's own logic (listeners are run by the registry).
    pub(crate) async fn execute(&self) -> anyhow::Result<()> {
        self.inner.execute().await
    }
}

impl core::fmt::Debug for EventEnvelope {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventEnvelope")
            .field("name", &self.name)
            .field("payload", &self.payload)
            .field("driver", &self.driver)
            .field("queue_name", &self.queue_name)
            .finish_non_exhaustive()
    }
}
