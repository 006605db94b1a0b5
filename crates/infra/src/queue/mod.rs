//! Durable event queue with bounded retries and dead-lettering.
//!
//! ## Design
//!
//! - Deferred events are persisted as queue records, one per dispatch
//! - A single polling worker per queue replays records oldest-first
//! - Failures increment the record's attempt count; the retry budget is fixed
//!   when the record is written
//! - Records that exhaust their budget move to a separate dead-letter table and
//!   are never replayed automatically
//!
//! ## Components
//!
//! - `QueueRecord` / `FailedRecord`: the two persisted shapes
//! - `QueueStore`: persistence (in-memory or Postgres)
//! - `QueuedDriver`: the deferring driver, writes queue records
//! - `Worker`: polls, executes, deletes, retries or dead-letters
//! - `DeadLetterInbox`: manual inspection and re-submission of failed records

pub mod dead_letter;
pub mod driver;
pub mod postgres;
pub mod store;
pub mod types;
pub mod worker;

pub use dead_letter::{DeadLetterError, DeadLetterInbox};
pub use driver::QueuedDriver;
pub use postgres::PostgresQueueStore;
pub use store::{InMemoryQueueStore, QueueStats, QueueStore, QueueStoreError};
pub use types::{
    FailedRecord, FailureDetails, FailureOutcome, NewFailedRecord, NewQueueRecord, QueueRecord,
};
pub use worker::{PassReport, Worker, WorkerError, WorkerHandle, WorkerOptions, WorkerStats, run_worker};
