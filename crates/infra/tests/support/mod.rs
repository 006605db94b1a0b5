//! Shared fixtures for the queue integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use eventide_core::{FailedRecordId, QueueRecordId};
use eventide_events::{
    DriverName, DriverOptions, DriverRegistry, Event, EventEnvelope, EventRegistry, EventService,
    Listener, SyncDriver,
};
use eventide_infra::{
    FailedRecord, InMemoryQueueStore, NewFailedRecord, NewQueueRecord, QueueRecord, QueueStats,
    QueueStore, QueueStoreError, QueuedDriver,
};
use eventide_observability::LogFormat;

/// Queued by default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ping {
    pub hello: String,
}

impl Event for Ping {
    const NAME: &'static str = "Ping";

    fn driver(&self) -> Option<DriverName> {
        Some(DriverName::QUEUE)
    }
}

/// Runs on the default (sync) driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Audit {
    pub action: String,
}

impl Event for Audit {
    const NAME: &'static str = "Audit";
}

/// Listener that fails its first `failures` runs.
pub struct Flaky {
    failures: usize,
    runs: AtomicUsize,
}

impl Flaky {
    pub fn new(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            failures,
            runs: AtomicUsize::new(0),
        })
    }

    pub fn always() -> Arc<Self> {
        Self::new(usize::MAX)
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Listener for Flaky {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn handle(&self, event: &EventEnvelope) -> anyhow::Result<()> {
        let run = self.runs.fetch_add(1, Ordering::SeqCst);
        if run < self.failures {
            anyhow::bail!("{} failed on run {}", event.name(), run + 1);
        }
        Ok(())
    }
}

/// Listener that records every `Ping` it is handed, as the worker rebuilt it.
#[derive(Default)]
pub struct Capture {
    seen: Mutex<Vec<Ping>>,
}

impl Capture {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seen(&self) -> Vec<Ping> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Listener for Capture {
    fn name(&self) -> &str {
        "capture"
    }

    async fn handle(&self, event: &EventEnvelope) -> anyhow::Result<()> {
        let ping: Ping = event.payload()?;
        self.seen.lock().unwrap().push(ping);
        Ok(())
    }
}

pub fn registry(ping: Arc<Flaky>, audit: Arc<Flaky>) -> Arc<EventRegistry> {
    Arc::new(
        EventRegistry::builder()
            .register_event::<Ping>()
            .register_event::<Audit>()
            .register_listeners::<Ping>([ping as Arc<dyn Listener>])
            .register_listeners::<Audit>([audit as Arc<dyn Listener>])
            .build(),
    )
}

/// Text logs, filtered by `RUST_LOG`.
pub fn init_logging() {
    eventide_observability::init_with(LogFormat::Text);
}

pub fn service<S>(store: S, events: Arc<EventRegistry>, options: DriverOptions) -> EventService
where
    S: QueueStore + 'static,
{
    init_logging();
    let drivers = DriverRegistry::builder()
        .register_driver(
            DriverName::SYNC,
            SyncDriver::new(events.clone()),
            DriverOptions::default(),
        )
        .register_driver(DriverName::QUEUE, QueuedDriver::new(store), options)
        .build();
    EventService::new(events, drivers)
}

/// In-memory store whose individual operations can be switched to fail.
#[derive(Debug, Default)]
pub struct FlakyStore {
    pub inner: InMemoryQueueStore,
    pub fail_insert: AtomicBool,
    pub fail_find: AtomicBool,
    pub fail_update: AtomicBool,
    pub fail_delete: AtomicBool,
    pub fail_insert_failed: AtomicBool,
}

impl FlakyStore {
    pub fn arc() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn check(flag: &AtomicBool, op: &str) -> Result<(), QueueStoreError> {
        if flag.load(Ordering::SeqCst) {
            return Err(QueueStoreError::Storage(format!("{op} unavailable")));
        }
        Ok(())
    }
}

#[async_trait]
impl QueueStore for FlakyStore {
    async fn insert(&self, record: NewQueueRecord) -> Result<QueueRecord, QueueStoreError> {
        Self::check(&self.fail_insert, "insert")?;
        self.inner.insert(record).await
    }

    async fn find_many(&self, queue_name: &str) -> Result<Vec<QueueRecord>, QueueStoreError> {
        Self::check(&self.fail_find, "find_many")?;
        self.inner.find_many(queue_name).await
    }

    async fn update(&self, record: &QueueRecord) -> Result<(), QueueStoreError> {
        Self::check(&self.fail_update, "update")?;
        self.inner.update(record).await
    }

    async fn delete(&self, id: QueueRecordId) -> Result<(), QueueStoreError> {
        Self::check(&self.fail_delete, "delete")?;
        self.inner.delete(id).await
    }

    async fn insert_failed(
        &self,
        record: NewFailedRecord,
    ) -> Result<FailedRecord, QueueStoreError> {
        Self::check(&self.fail_insert_failed, "insert_failed")?;
        self.inner.insert_failed(record).await
    }

    async fn find_failed(&self, queue_name: &str) -> Result<Vec<FailedRecord>, QueueStoreError> {
        self.inner.find_failed(queue_name).await
    }

    async fn get_failed(
        &self,
        id: FailedRecordId,
    ) -> Result<Option<FailedRecord>, QueueStoreError> {
        self.inner.get_failed(id).await
    }

    async fn delete_failed(&self, id: FailedRecordId) -> Result<(), QueueStoreError> {
        self.inner.delete_failed(id).await
    }

    async fn stats(&self, queue_name: &str) -> Result<QueueStats, QueueStoreError> {
        self.inner.stats(queue_name).await
    }
}
