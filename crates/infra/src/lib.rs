//! Infrastructure layer: durable queue persistence, the queue worker and configuration.

pub mod config;
pub mod queue;

pub use config::{ConfigError, QueueConfig, QueueTables};
pub use queue::{
    DeadLetterError, DeadLetterInbox, FailedRecord, FailureDetails, InMemoryQueueStore,
    NewFailedRecord, NewQueueRecord, PassReport, PostgresQueueStore, QueueRecord, QueueStats,
    QueueStore, QueueStoreError, QueuedDriver, Worker, WorkerError, WorkerHandle, WorkerOptions,
    WorkerStats, run_worker,
};
