//! Manual inspection and re-submission of dead-lettered records.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, instrument};

use eventide_core::{CoreError, FailedRecordId};
use eventide_events::{DispatchError, DriverName, EventService};

use super::store::{QueueStore, QueueStoreError};
use super::types::FailedRecord;

#[derive(Debug, Error)]
pub enum DeadLetterError {
    #[error("failed record not found: {0}")]
    NotFound(FailedRecordId),

    #[error("no event registered under '{0}'")]
    UnknownEvent(String),

    #[error(transparent)]
    InvalidPayload(#[from] CoreError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Store(#[from] QueueStoreError),
}

/// Read and replay side of the dead-letter store.
///
/// The worker only ever writes failed records; nothing here runs on its own.
#[derive(Debug, Clone)]
pub struct DeadLetterInbox<S> {
    store: S,
    service: Arc<EventService>,
}

impl<S: QueueStore> DeadLetterInbox<S> {
    pub fn new(store: S, service: Arc<EventService>) -> Self {
        Self { store, service }
    }

    /// Failed records of `queue_name`, oldest first.
    pub async fn list(&self, queue_name: &str) -> Result<Vec<FailedRecord>, DeadLetterError> {
        Ok(self.store.find_failed(queue_name).await?)
    }

    pub async fn get(&self, id: FailedRecordId) -> Result<FailedRecord, DeadLetterError> {
        self.store
            .get_failed(id)
            .await?
            .ok_or(DeadLetterError::NotFound(id))
    }

    /// Rebuild the event of a failed record and dispatch it through `driver`.
    ///
    /// The event keeps its original queue. The failed record is removed only
    /// once the dispatch succeeded; on error it stays where it is.
    #[instrument(skip(self, driver), fields(failed_id = %id), err)]
    pub async fn resubmit(
        &self,
        id: FailedRecordId,
        driver: impl Into<DriverName>,
    ) -> Result<(), DeadLetterError> {
        let failed = self.get(id).await?;
        let ctor = self
            .service
            .get_event_ctor_by_name(&failed.event_name)
            .ok_or_else(|| DeadLetterError::UnknownEvent(failed.event_name.clone()))?;

        let driver = driver.into();
        let event = ctor(failed.payload_value()?)?
            .with_driver(driver.clone())
            .on_queue(failed.queue_name.clone());

        self.service.dispatch(event).await?;
        self.store.delete_failed(id).await?;

        info!(
            queue = %failed.queue_name,
            event = %failed.event_name,
            driver = %driver,
            "dead-lettered record re-submitted"
        );
        Ok(())
    }

    /// Drop a failed record for good.
    pub async fn discard(&self, id: FailedRecordId) -> Result<(), DeadLetterError> {
        self.store.delete_failed(id).await.map_err(|e| match e {
            QueueStoreError::NotFound(_) => DeadLetterError::NotFound(id),
            other => other.into(),
        })?;
        info!(failed_id = %id, "dead-lettered record discarded");
        Ok(())
    }
}
