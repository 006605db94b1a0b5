//! The deferring driver: dispatch becomes an insert.

use async_trait::async_trait;
use tracing::debug;

use eventide_events::{DispatchError, Driver, DriverName, DriverOptions, EventEnvelope};

use super::store::QueueStore;
use super::types::NewQueueRecord;

/// Persists dispatched events as pending queue records.
///
/// Nothing runs at dispatch time; a [`Worker`](super::Worker) on the same queue
/// picks the record up later. Only persistence failures surface to the caller.
#[derive(Debug, Clone)]
pub struct QueuedDriver<S> {
    store: S,
}

impl<S: QueueStore> QueuedDriver<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

#[async_trait]
impl<S: QueueStore + 'static> Driver for QueuedDriver<S> {
    async fn handle(
        &self,
        event: &EventEnvelope,
        options: &DriverOptions,
    ) -> Result<(), DispatchError> {
        let record = NewQueueRecord::from_event(event, options)?;

        let record = self
            .store
            .insert(record)
            .await
            .map_err(|e| DispatchError::Persistence {
                driver: DriverName::QUEUE.to_string(),
                event: event.name().to_string(),
                source: e.into(),
            })?;

        debug!(
            queue = %record.queue_name,
            event = %record.event_name,
            record_id = %record.id,
            retries = record.retries,
            "event queued"
        );
        Ok(())
    }
}
