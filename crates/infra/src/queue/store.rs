//! Queue storage: the trait the driver and worker share, plus an in-memory store.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::Serialize;

use eventide_core::{FailedRecordId, QueueRecordId};

use super::types::{FailedRecord, NewFailedRecord, NewQueueRecord, QueueRecord};

/// Persistence for pending and dead-lettered records.
///
/// The worker runs one pass at a time per queue; implementations do not need
/// row-level claiming.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Persist a new pending record and return it with its assigned id.
    async fn insert(&self, record: NewQueueRecord) -> Result<QueueRecord, QueueStoreError>;

    /// All pending records of a queue, oldest first.
    async fn find_many(&self, queue_name: &str) -> Result<Vec<QueueRecord>, QueueStoreError>;

    /// Overwrite a pending record (used to persist the attempt count).
    async fn update(&self, record: &QueueRecord) -> Result<(), QueueStoreError>;

    async fn delete(&self, id: QueueRecordId) -> Result<(), QueueStoreError>;

    /// Persist a dead-lettered record.
    async fn insert_failed(&self, record: NewFailedRecord)
    -> Result<FailedRecord, QueueStoreError>;

    /// Dead-lettered records of a queue, oldest first.
    async fn find_failed(&self, queue_name: &str) -> Result<Vec<FailedRecord>, QueueStoreError>;

    async fn get_failed(&self, id: FailedRecordId)
    -> Result<Option<FailedRecord>, QueueStoreError>;

    async fn delete_failed(&self, id: FailedRecordId) -> Result<(), QueueStoreError>;

    async fn stats(&self, queue_name: &str) -> Result<QueueStats, QueueStoreError>;
}

/// Queue store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueStoreError {
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl QueueStoreError {
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }
}

/// Record counts for one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub failed: usize,
}

/// In-memory queue store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryQueueStore {
    records: RwLock<Vec<QueueRecord>>,
    failed: RwLock<Vec<FailedRecord>>,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

fn poisoned<T>(_: T) -> QueueStoreError {
    QueueStoreError::storage("lock poisoned")
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn insert(&self, record: NewQueueRecord) -> Result<QueueRecord, QueueStoreError> {
        let record = record.into_record(QueueRecordId::new());
        self.records.write().map_err(poisoned)?.push(record.clone());
        Ok(record)
    }

    async fn find_many(&self, queue_name: &str) -> Result<Vec<QueueRecord>, QueueStoreError> {
        let records = self.records.read().map_err(poisoned)?;
        let mut out: Vec<_> = records
            .iter()
            .filter(|r| r.queue_name == queue_name)
            .cloned()
            .collect();
        // Stable: records inserted within the same clock tick keep insertion order.
        out.sort_by_key(|r| r.created_at);
        Ok(out)
    }

    async fn update(&self, record: &QueueRecord) -> Result<(), QueueStoreError> {
        let mut records = self.records.write().map_err(poisoned)?;
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(slot) => {
                *slot = record.clone();
                Ok(())
            }
            None => Err(QueueStoreError::NotFound(record.id.to_string())),
        }
    }

    async fn delete(&self, id: QueueRecordId) -> Result<(), QueueStoreError> {
        let mut records = self.records.write().map_err(poisoned)?;
        let before = records.len();
        records.retain(|r| r.id != id);
        if records.len() == before {
            return Err(QueueStoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn insert_failed(
        &self,
        record: NewFailedRecord,
    ) -> Result<FailedRecord, QueueStoreError> {
        let record = record.into_record(FailedRecordId::new());
        self.failed.write().map_err(poisoned)?.push(record.clone());
        Ok(record)
    }

    async fn find_failed(&self, queue_name: &str) -> Result<Vec<FailedRecord>, QueueStoreError> {
        let failed = self.failed.read().map_err(poisoned)?;
        let mut out: Vec<_> = failed
            .iter()
            .filter(|r| r.queue_name == queue_name)
            .cloned()
            .collect();
        out.sort_by_key(|r| r.failed_at);
        Ok(out)
    }

    async fn get_failed(
        &self,
        id: FailedRecordId,
    ) -> Result<Option<FailedRecord>, QueueStoreError> {
        let failed = self.failed.read().map_err(poisoned)?;
        Ok(failed.iter().find(|r| r.id == id).cloned())
    }

    async fn delete_failed(&self, id: FailedRecordId) -> Result<(), QueueStoreError> {
        let mut failed = self.failed.write().map_err(poisoned)?;
        let before = failed.len();
        failed.retain(|r| r.id != id);
        if failed.len() == before {
            return Err(QueueStoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn stats(&self, queue_name: &str) -> Result<QueueStats, QueueStoreError> {
        let pending = self
            .records
            .read()
            .map_err(poisoned)?
            .iter()
            .filter(|r| r.queue_name == queue_name)
            .count();
        let failed = self
            .failed
            .read()
            .map_err(poisoned)?
            .iter()
            .filter(|r| r.queue_name == queue_name)
            .count();
        Ok(QueueStats { pending, failed })
    }
}

#[async_trait]
impl<S: QueueStore + ?Sized> QueueStore for Arc<S> {
    async fn insert(&self, record: NewQueueRecord) -> Result<QueueRecord, QueueStoreError> {
        (**self).insert(record).await
    }

    async fn find_many(&self, queue_name: &str) -> Result<Vec<QueueRecord>, QueueStoreError> {
        (**self).find_many(queue_name).await
    }

    async fn update(&self, record: &QueueRecord) -> Result<(), QueueStoreError> {
        (**self).update(record).await
    }

    async fn delete(&self, id: QueueRecordId) -> Result<(), QueueStoreError> {
        (**self).delete(id).await
    }

    async fn insert_failed(
        &self,
        record: NewFailedRecord,
    ) -> Result<FailedRecord, QueueStoreError> {
        (**self).insert_failed(record).await
    }

    async fn find_failed(&self, queue_name: &str) -> Result<Vec<FailedRecord>, QueueStoreError> {
        (**self).find_failed(queue_name).await
    }

    async fn get_failed(
        &self,
        id: FailedRecordId,
    ) -> Result<Option<FailedRecord>, QueueStoreError> {
        (**self).get_failed(id).await
    }

    async fn delete_failed(&self, id: FailedRecordId) -> Result<(), QueueStoreError> {
        (**self).delete_failed(id).await
    }

    async fn stats(&self, queue_name: &str) -> Result<QueueStats, QueueStoreError> {
        (**self).stats(queue_name).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::queue::types::FailureDetails;

    fn new_record(queue: &str, event: &str, offset_ms: i64) -> NewQueueRecord {
        NewQueueRecord {
            queue_name: queue.to_string(),
            event_name: event.to_string(),
            payload: "{}".to_string(),
            retries: 3,
            created_at: Utc::now() + Duration::milliseconds(offset_ms),
        }
    }

    #[tokio::test]
    async fn find_many_is_oldest_first_and_scoped_to_queue() {
        let store = InMemoryQueueStore::new();
        store.insert(new_record("default", "B", 10)).await.unwrap();
        store.insert(new_record("default", "A", 0)).await.unwrap();
        store.insert(new_record("other", "C", -10)).await.unwrap();

        let names: Vec<_> = store
            .find_many("default")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.event_name)
            .collect();
        assert_eq!(names, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn update_and_delete_missing_records_report_not_found() {
        let store = InMemoryQueueStore::new();
        let rec = store.insert(new_record("default", "A", 0)).await.unwrap();
        store.delete(rec.id).await.unwrap();

        assert!(matches!(
            store.update(&rec).await,
            Err(QueueStoreError::NotFound(_))
        ));
        assert!(matches!(
            store.delete(rec.id).await,
            Err(QueueStoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn update_persists_attempt_count() {
        let store = InMemoryQueueStore::new();
        let mut rec = store.insert(new_record("default", "A", 0)).await.unwrap();
        rec.attempt = 2;
        store.update(&rec).await.unwrap();

        let stored = store.find_many("default").await.unwrap();
        assert_eq!(stored[0].attempt, 2);
    }

    #[tokio::test]
    async fn failed_records_round_trip_and_count() {
        let store = InMemoryQueueStore::arc();
        let rec = store.insert(new_record("default", "A", 0)).await.unwrap();
        let failed = store
            .insert_failed(NewFailedRecord::from_record(
                &rec,
                FailureDetails::new("WorkerExecutionError", "boom", ""),
            ))
            .await
            .unwrap();

        assert_eq!(
            store.stats("default").await.unwrap(),
            QueueStats {
                pending: 1,
                failed: 1
            }
        );
        assert_eq!(store.get_failed(failed.id).await.unwrap(), Some(failed.clone()));

        store.delete_failed(failed.id).await.unwrap();
        assert!(store.get_failed(failed.id).await.unwrap().is_none());
        assert!(store.find_failed("default").await.unwrap().is_empty());
    }
}
