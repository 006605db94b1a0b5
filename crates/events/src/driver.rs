//! Execution strategies.
//!
//! A driver decides how a dispatched event is carried out:
//!
//! - [`SyncDriver`] runs it immediately, in the caller's control flow, and
//!   surfaces any failure to the caller.
//! - A queued driver (see `eventide-infra`) persists a durable record and
//!   returns without running the event's logic.
//!
//! Drivers are registered by name in a [`DriverRegistry`], which is built once at
//! startup and is read-only afterwards.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::envelope::EventEnvelope;
use crate::error::DispatchError;
use crate::event::DEFAULT_QUEUE;
use crate::registry::EventRegistry;

/// Name a driver is registered under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DriverName(Cow<'static, str>);

impl DriverName {
    /// Immediate, in-process execution.
    pub const SYNC: DriverName = DriverName(Cow::Borrowed("sync"));
    /// Deferred execution through the durable queue.
    pub const QUEUE: DriverName = DriverName(Cow::Borrowed("queue"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for DriverName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for DriverName {
    fn from(value: &'static str) -> Self {
        Self(Cow::Borrowed(value))
    }
}

impl From<String> for DriverName {
    fn from(value: String) -> Self {
        Self(Cow::Owned(value))
    }
}

/// Options handed to a driver on every `handle` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverOptions {
    /// Queue used when the event does not name one.
    pub queue_name: String,
    /// Attempts a queued event gets before it is dead-lettered.
    pub retries: u32,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            queue_name: DEFAULT_QUEUE.to_string(),
            retries: 3,
        }
    }
}

impl DriverOptions {
    pub fn with_queue_name(mut self, queue_name: impl Into<String>) -> Self {
        self.queue_name = queue_name.into();
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }
}

/// Strategy that carries out a dispatched event.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Execute or enqueue `event`.
    async fn handle(
        &self,
        event: &EventEnvelope,
        options: &DriverOptions,
    ) -> Result<(), DispatchError>;
}

#[async_trait]
impl<D> Driver for Arc<D>
where
    D: Driver + ?Sized,
{
    async fn handle(
        &self,
        event: &EventEnvelope,
        options: &DriverOptions,
    ) -> Result<(), DispatchError> {
        (**self).handle(event, options).await
    }
}

/// Runs events in-process, immediately.
///
/// The event's `execute` and every listener registered for it run before
/// `handle` returns; the first failure is returned as
/// [`DispatchError::Execution`].
#[derive(Clone)]
pub struct SyncDriver {
    events: Arc<EventRegistry>,
}

impl SyncDriver {
    pub fn new(events: Arc<EventRegistry>) -> Self {
        Self { events }
    }
}

#[async_trait]
impl Driver for SyncDriver {
    async fn handle(
        &self,
        event: &EventEnvelope,
        _options: &DriverOptions,
    ) -> Result<(), DispatchError> {
        debug!(event = event.name(), "executing event synchronously");
        self.events
            .execute(event)
            .await
            .map_err(|source| DispatchError::Execution {
                event: event.name().to_string(),
                source,
            })
    }
}

/// A driver together with the options it is always called with.
#[derive(Clone)]
pub struct RegisteredDriver {
    driver: Arc<dyn Driver>,
    options: DriverOptions,
}

impl RegisteredDriver {
    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    pub fn options(&self) -> &DriverOptions {
        &self.options
    }
}

/// Read-only driver lookup, populated once at startup.
#[derive(Clone)]
pub struct DriverRegistry {
    drivers: HashMap<DriverName, RegisteredDriver>,
    default_driver: DriverName,
}

impl DriverRegistry {
    pub fn builder() -> DriverRegistryBuilder {
        DriverRegistryBuilder::default()
    }

    pub fn get(&self, name: &DriverName) -> Option<&RegisteredDriver> {
        self.drivers.get(name)
    }

    /// Driver used for events that do not name one.
    pub fn default_driver(&self) -> &DriverName {
        &self.default_driver
    }

    /// Resolve `name` (or the default when `None`).
    pub fn resolve(&self, name: Option<&DriverName>) -> Result<&RegisteredDriver, DispatchError> {
        let name = name.unwrap_or(&self.default_driver);
        self.get(name)
            .ok_or_else(|| DispatchError::DriverNotFound(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &DriverName> {
        self.drivers.keys()
    }
}

impl core::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut names: Vec<&str> = self.drivers.keys().map(DriverName::as_str).collect();
        names.sort_unstable();
        f.debug_struct("DriverRegistry")
            .field("drivers", &names)
            .field("default_driver", &self.default_driver)
            .finish()
    }
}

/// Setup-time builder for [`DriverRegistry`].
pub struct DriverRegistryBuilder {
    drivers: HashMap<DriverName, RegisteredDriver>,
    default_driver: DriverName,
}

impl Default for DriverRegistryBuilder {
    fn default() -> Self {
        Self {
            drivers: HashMap::new(),
            default_driver: DriverName::SYNC,
        }
    }
}

impl DriverRegistryBuilder {
    /// Register `driver` under `name`. A later registration under the same name wins.
    pub fn register_driver<D>(
        mut self,
        name: impl Into<DriverName>,
        driver: D,
        options: DriverOptions,
    ) -> Self
    where
        D: Driver + 'static,
    {
        self.drivers.insert(
            name.into(),
            RegisteredDriver {
                driver: Arc::new(driver),
                options,
            },
        );
        self
    }

    /// Set the process-wide default driver (defaults to [`DriverName::SYNC`]).
    pub fn default_driver(mut self, name: impl Into<DriverName>) -> Self {
        self.default_driver = name.into();
        self
    }

    pub fn build(self) -> DriverRegistry {
        DriverRegistry {
            drivers: self.drivers,
            default_driver: self.default_driver,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::event::Event;

    #[derive(Debug, Serialize, Deserialize)]
    struct Boom;

    #[async_trait]
    impl Event for Boom {
        const NAME: &'static str = "Boom";

        async fn execute(&self) -> anyhow::Result<()> {
            anyhow::bail!("boom")
        }
    }

    #[derive(Default)]
    struct Counting(AtomicUsize);

    #[async_trait]
    impl Driver for Counting {
        async fn handle(
            &self,
            _event: &EventEnvelope,
            _options: &DriverOptions,
        ) -> Result<(), DispatchError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn unknown_driver_resolves_to_not_found() {
        let registry = DriverRegistry::builder().build();
        let err = registry.resolve(Some(&DriverName::new("nope"))).err().unwrap();
        assert!(matches!(err, DispatchError::DriverNotFound(name) if name == "nope"));
    }

    #[test]
    fn default_driver_is_used_when_none_is_named() {
        let registry = DriverRegistry::builder()
            .register_driver("counting", Counting::default(), DriverOptions::default())
            .default_driver("counting")
            .build();

        assert_eq!(registry.default_driver().as_str(), "counting");
        assert!(registry.resolve(None).is_ok());
    }

    #[test]
    fn options_builder_overrides_defaults() {
        let opts = DriverOptions::default()
            .with_queue_name("mail")
            .with_retries(7);
        assert_eq!(opts.queue_name, "mail");
        assert_eq!(opts.retries, 7);
        assert_eq!(DriverOptions::default().queue_name, DEFAULT_QUEUE);
    }

    #[tokio::test]
    async fn sync_driver_propagates_execution_errors() {
        let events = Arc::new(EventRegistry::builder().register_event::<Boom>().build());
        let driver = SyncDriver::new(events);
        let env = EventEnvelope::new(Boom).unwrap();

        let err = driver
            .handle(&env, &DriverOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Execution { ref event, .. } if event == "Boom"));
        assert!(format!("{err}").contains("boom"));
    }
}
