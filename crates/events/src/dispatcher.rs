//! Event dispatch service.
//!
//! `EventService` is the single dispatch entry point of the subsystem:
//!
//! ```text
//! caller
//!   ↓ dispatch(event)
//! EventService ── resolve driver (event's own, else the default) ──▶ DriverNotFound
//!   ↓
//! Driver::handle(event, options)
//!   ├─ sync:   execute event + listeners now, errors propagate to the caller
//!   └─ queued: persist a queue record, errors propagate only if the write fails
//! ```
//!
//! Both registries are passed in explicitly and never change after construction,
//! so the service can be shared freely (`Arc<EventService>`).

use std::sync::Arc;

use tracing::debug;

use crate::driver::DriverRegistry;
use crate::envelope::EventEnvelope;
use crate::error::DispatchError;
use crate::event::Event;
use crate::registry::{EventCtor, EventRegistry};

#[derive(Debug, Clone)]
pub struct EventService {
    events: Arc<EventRegistry>,
    drivers: Arc<DriverRegistry>,
}

impl EventService {
    pub fn new(events: Arc<EventRegistry>, drivers: DriverRegistry) -> Self {
        Self {
            events,
            drivers: Arc::new(drivers),
        }
    }

    /// Dispatch an already-built event through its driver.
    ///
    /// Fails with [`DispatchError::DriverNotFound`] when the event names an
    /// unregistered driver. Handler existence is *not* checked here: a queued
    /// event for an unknown name is accepted and only fails once a worker
    /// picks it up.
    pub async fn dispatch(&self, event: EventEnvelope) -> Result<(), DispatchError> {
        let registered = self.drivers.resolve(event.driver())?;
        let driver = event.driver().unwrap_or(self.drivers.default_driver());

        debug!(event = event.name(), driver = %driver, "dispatching event");
        registered
            .driver()
            .handle(&event, registered.options())
            .await
    }

    /// Build an envelope for `event` and dispatch it.
    pub async fn dispatch_event<E: Event>(&self, event: E) -> Result<(), DispatchError> {
        let envelope = EventEnvelope::new(event)?;
        self.dispatch(envelope).await
    }

    pub fn get_event_ctor_by_name(&self, name: &str) -> Option<EventCtor> {
        self.events.get_event_ctor_by_name(name)
    }

    pub fn events(&self) -> &Arc<EventRegistry> {
        &self.events
    }

    pub fn drivers(&self) -> &DriverRegistry {
        &self.drivers
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::driver::{Driver, DriverName, DriverOptions, SyncDriver};

    static PINGS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Debug, Serialize, Deserialize)]
    struct Ping {
        hello: String,
    }

    #[async_trait]
    impl Event for Ping {
        const NAME: &'static str = "Ping";

        async fn execute(&self) -> anyhow::Result<()> {
            PINGS.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Deferred;

    impl Event for Deferred {
        const NAME: &'static str = "Deferred";

        fn driver(&self) -> Option<DriverName> {
            Some(DriverName::new("recording"))
        }
    }

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<(String, DriverOptions)>>,
    }

    #[async_trait]
    impl Driver for Recording {
        async fn handle(
            &self,
            event: &EventEnvelope,
            options: &DriverOptions,
        ) -> Result<(), DispatchError> {
            self.seen
                .lock()
                .unwrap()
                .push((event.name().to_string(), options.clone()));
            Ok(())
        }
    }

    fn service(recording: Arc<Recording>) -> EventService {
        let events = Arc::new(
            EventRegistry::builder()
                .register_event::<Ping>()
                .register_event::<Deferred>()
                .build(),
        );
        let drivers = DriverRegistry::builder()
            .register_driver(
                DriverName::SYNC,
                SyncDriver::new(events.clone()),
                DriverOptions::default(),
            )
            .register_driver(
                "recording",
                recording,
                DriverOptions::default().with_queue_name("audit").with_retries(1),
            )
            .build();
        EventService::new(events, drivers)
    }

    #[tokio::test]
    async fn events_without_a_driver_use_the_default() {
        let svc = service(Arc::new(Recording::default()));
        let before = PINGS.load(Ordering::SeqCst);

        svc.dispatch_event(Ping {
            hello: "world".into(),
        })
        .await
        .unwrap();

        assert_eq!(PINGS.load(Ordering::SeqCst), before + 1);
    }

    #[tokio::test]
    async fn driver_receives_its_registered_options() {
        let recording = Arc::new(Recording::default());
        let svc = service(recording.clone());

        svc.dispatch_event(Deferred).await.unwrap();

        let seen = recording.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "Deferred");
        assert_eq!(seen[0].1.queue_name, "audit");
        assert_eq!(seen[0].1.retries, 1);
    }

    #[tokio::test]
    async fn unregistered_driver_is_reported_to_the_caller() {
        let svc = service(Arc::new(Recording::default()));
        let env = EventEnvelope::new(Ping { hello: "x".into() })
            .unwrap()
            .with_driver("carrier-pigeon");

        let err = svc.dispatch(env).await.unwrap_err();
        assert_eq!(err.kind(), "DriverNotFoundError");
    }

    #[test]
    fn exposes_registered_ctors() {
        let svc = service(Arc::new(Recording::default()));
        assert!(svc.get_event_ctor_by_name("Ping").is_some());
        assert!(svc.get_event_ctor_by_name("Pong").is_none());
    }
}
