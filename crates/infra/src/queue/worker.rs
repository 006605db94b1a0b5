//! Queue worker: polls pending records, replays them, retries or dead-letters.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use eventide_core::CoreError;
use eventide_events::{DEFAULT_QUEUE, EventRegistry};

use super::store::{QueueStore, QueueStoreError};
use super::types::{FailureDetails, FailureOutcome, NewFailedRecord, QueueRecord};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Name for logging
    pub name: String,
    /// Queue this worker drains
    pub queue_name: String,
    /// Delay between two passes of the indefinite loop
    pub run_after: Duration,
    /// Run a single pass and return
    pub run_once: bool,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            name: "queue-worker".to_string(),
            queue_name: DEFAULT_QUEUE.to_string(),
            run_after: Duration::from_secs(5),
            run_once: false,
        }
    }
}

impl WorkerOptions {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_queue_name(mut self, queue_name: impl Into<String>) -> Self {
        self.queue_name = queue_name.into();
        self
    }

    pub fn with_run_after(mut self, run_after: Duration) -> Self {
        self.run_after = run_after;
        self
    }

    pub fn with_run_once(mut self, run_once: bool) -> Self {
        self.run_once = run_once;
        self
    }
}

/// Processing-time error.
///
/// Per-record variants are contained by the pass and turned into a retry or a
/// dead-letter transition. Only a failed fetch escapes [`Worker::run_pass`].
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("no event registered under '{0}'")]
    UnknownEvent(String),

    #[error(transparent)]
    InvalidPayload(#[from] CoreError),

    #[error("event '{event}' failed: {source}")]
    Execution {
        event: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("queue persistence failed: {0}")]
    Persistence(#[from] QueueStoreError),
}

impl WorkerError {
    /// Stable taxonomy name, stored as `FailedRecord.error.name`.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerError::UnknownEvent(_) => "UnknownEventError",
            WorkerError::InvalidPayload(e) => e.kind(),
            WorkerError::Execution { .. } => "WorkerExecutionError",
            WorkerError::Persistence(_) => "WorkerPersistenceError",
        }
    }

    pub fn details(&self) -> FailureDetails {
        let stack = match self {
            WorkerError::Execution { source, .. } => format!("{source:?}"),
            other => format!("{other:?}"),
        };
        FailureDetails::new(self.kind(), self.to_string(), stack)
    }
}

/// Outcome counts of one poll pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub fetched: usize,
    pub completed: usize,
    pub retried: usize,
    pub dead_lettered: usize,
    pub persistence_failures: usize,
}

/// Totals over the lifetime of a worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub passes: u64,
    pub failed_passes: u64,
    pub completed: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub persistence_failures: u64,
}

impl WorkerStats {
    fn absorb(&mut self, report: &PassReport) {
        self.passes += 1;
        self.completed += report.completed as u64;
        self.retried += report.retried as u64;
        self.dead_lettered += report.dead_lettered as u64;
        self.persistence_failures += report.persistence_failures as u64;
    }
}

/// Handle to control a spawned worker.
#[derive(Debug)]
pub struct WorkerHandle {
    name: String,
    shutdown: Arc<Notify>,
    join: JoinHandle<()>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl WorkerHandle {
    /// Stop the loop after the current pass and wait for it to exit.
    pub async fn shutdown(self) -> WorkerStats {
        self.shutdown.notify_one();
        if let Err(e) = self.join.await {
            error!(worker = %self.name, error = %e, "worker task ended abnormally");
        }
        snapshot(&self.stats)
    }

    pub fn stats(&self) -> WorkerStats {
        snapshot(&self.stats)
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

fn snapshot(stats: &Mutex<WorkerStats>) -> WorkerStats {
    stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
}

/// The only consumer of queue records.
///
/// Records of one queue are processed one at a time, oldest first. At most one
/// worker may drain a given queue: nothing claims a record before running it.
pub struct Worker<S> {
    store: S,
    events: Arc<EventRegistry>,
    options: WorkerOptions,
    stats: Arc<Mutex<WorkerStats>>,
}

impl<S: QueueStore + 'static> Worker<S> {
    pub fn new(store: S, events: Arc<EventRegistry>, options: WorkerOptions) -> Self {
        Self {
            store,
            events,
            options,
            stats: Arc::new(Mutex::new(WorkerStats::default())),
        }
    }

    pub fn options(&self) -> &WorkerOptions {
        &self.options
    }

    pub fn stats(&self) -> WorkerStats {
        snapshot(&self.stats)
    }

    /// Run one poll pass over the configured queue.
    ///
    /// Fails only when the pending records cannot be fetched. Every other
    /// failure is confined to its record and shows up in the report.
    pub async fn run_pass(&self) -> Result<PassReport, WorkerError> {
        let worker = self.options.name.as_str();
        let queue = self.options.queue_name.as_str();

        let records = match self.store.find_many(queue).await {
            Ok(records) => records,
            Err(e) => {
                error!(worker, queue, error = %e, "failed to fetch pending records");
                self.stats
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .failed_passes += 1;
                return Err(e.into());
            }
        };

        let mut report = PassReport {
            fetched: records.len(),
            ..PassReport::default()
        };

        if records.is_empty() {
            debug!(worker, queue, "no pending records");
        } else {
            info!(worker, queue, fetched = report.fetched, "poll pass started");
            for record in records {
                self.process(record, &mut report).await;
            }
            info!(
                worker,
                queue,
                completed = report.completed,
                retried = report.retried,
                dead_lettered = report.dead_lettered,
                persistence_failures = report.persistence_failures,
                "poll pass finished"
            );
        }

        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .absorb(&report);
        Ok(report)
    }

    /// Run a single pass when `run_once` is set, otherwise poll forever.
    pub async fn run(&self) -> Result<(), WorkerError> {
        if self.options.run_once {
            self.run_pass().await?;
            return Ok(());
        }

        // Nobody holds this signal, so the loop only ends with the process.
        self.run_until(Arc::new(Notify::new())).await;
        Ok(())
    }

    /// Run the loop on a tokio task until [`WorkerHandle::shutdown`].
    pub fn spawn(self) -> WorkerHandle {
        let shutdown = Arc::new(Notify::new());
        let stats = self.stats.clone();
        let name = self.options.name.clone();
        let signal = shutdown.clone();

        let join = tokio::spawn(async move { self.run_until(signal).await });

        WorkerHandle {
            name,
            shutdown,
            join,
            stats,
        }
    }

    async fn run_until(&self, shutdown: Arc<Notify>) {
        let worker = self.options.name.as_str();
        let queue = self.options.queue_name.as_str();
        info!(worker, queue, "worker started");

        loop {
            // Fetch failures are logged inside the pass; the loop keeps polling.
            let _ = self.run_pass().await;
            if self.options.run_once {
                break;
            }

            tokio::select! {
                _ = shutdown.notified() => break,
                _ = tokio::time::sleep(self.options.run_after) => {}
            }
        }

        info!(worker, queue, "worker stopped");
    }

    async fn process(&self, mut record: QueueRecord, report: &mut PassReport) {
        match self.execute(&record).await {
            Ok(()) => match self.store.delete(record.id).await {
                Ok(()) => {
                    report.completed += 1;
                    debug!(
                        queue = %record.queue_name,
                        event = %record.event_name,
                        record_id = %record.id,
                        "record completed"
                    );
                }
                Err(e) => {
                    // The record stays pending and runs again next pass.
                    report.persistence_failures += 1;
                    error!(
                        queue = %record.queue_name,
                        event = %record.event_name,
                        record_id = %record.id,
                        error = %e,
                        "failed to delete completed record"
                    );
                }
            },
            Err(failure) => match record.register_failure() {
                FailureOutcome::Retry => self.retry(&record, &failure, report).await,
                FailureOutcome::DeadLetter => self.dead_letter(&record, &failure, report).await,
            },
        }
    }

    async fn execute(&self, record: &QueueRecord) -> Result<(), WorkerError> {
        let ctor = self
            .events
            .get_event_ctor_by_name(&record.event_name)
            .ok_or_else(|| WorkerError::UnknownEvent(record.event_name.clone()))?;
        let event = ctor(record.payload_value()?)?;

        self.events
            .execute(&event)
            .await
            .map_err(|source| WorkerError::Execution {
                event: record.event_name.clone(),
                source,
            })
    }

    async fn retry(&self, record: &QueueRecord, failure: &WorkerError, report: &mut PassReport) {
        warn!(
            queue = %record.queue_name,
            event = %record.event_name,
            record_id = %record.id,
            attempt = record.attempt,
            retries = record.retries,
            error = %failure,
            "record failed, will retry"
        );

        match self.store.update(record).await {
            Ok(()) => report.retried += 1,
            Err(e) => {
                // The attempt is not counted; the record is retried from its old count.
                report.persistence_failures += 1;
                error!(
                    queue = %record.queue_name,
                    record_id = %record.id,
                    attempt = record.attempt,
                    error = %e,
                    "failed to persist attempt count"
                );
            }
        }
    }

    async fn dead_letter(
        &self,
        record: &QueueRecord,
        failure: &WorkerError,
        report: &mut PassReport,
    ) {
        warn!(
            queue = %record.queue_name,
            event = %record.event_name,
            record_id = %record.id,
            attempt = record.attempt,
            retries = record.retries,
            error = %failure,
            "record exhausted its retries, dead-lettering"
        );

        let failed = NewFailedRecord::from_record(record, failure.details());
        if let Err(e) = self.store.insert_failed(failed).await {
            report.persistence_failures += 1;
            error!(
                queue = %record.queue_name,
                record_id = %record.id,
                error = %e,
                "failed to write dead-letter record"
            );
            return;
        }
        report.dead_lettered += 1;

        // Insert first, delete second: a failure here duplicates, never loses.
        if let Err(e) = self.store.delete(record.id).await {
            report.persistence_failures += 1;
            error!(
                queue = %record.queue_name,
                record_id = %record.id,
                error = %e,
                "dead-lettered record is still pending"
            );
        }
    }
}

impl<S> core::fmt::Debug for Worker<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Worker")
            .field("options", &self.options)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

/// Entry point for process runners: one pass when `options.run_once`, otherwise
/// an indefinite polling loop.
pub async fn run_worker<S: QueueStore + 'static>(
    store: S,
    events: Arc<EventRegistry>,
    options: WorkerOptions,
) -> Result<(), WorkerError> {
    Worker::new(store, events, options).run().await
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};

    use eventide_events::{Event, EventEnvelope, Listener};

    use super::*;
    use crate::queue::store::InMemoryQueueStore;
    use crate::queue::types::NewQueueRecord;

    #[derive(Debug, Serialize, Deserialize)]
    struct Ping {
        hello: String,
    }

    impl Event for Ping {
        const NAME: &'static str = "Ping";
    }

    /// Fails the first `failures` runs, records every payload it sees.
    struct Flaky {
        failures: usize,
        runs: AtomicUsize,
        seen: Mutex<Vec<String>>,
    }

    impl Flaky {
        fn new(failures: usize) -> Arc<Self> {
            Arc::new(Self {
                failures,
                runs: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Listener for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn handle(&self, event: &EventEnvelope) -> anyhow::Result<()> {
            let ping: Ping = event.payload()?;
            self.seen.lock().unwrap().push(ping.hello.clone());
            let run = self.runs.fetch_add(1, Ordering::SeqCst);
            if run < self.failures || ping.hello == "poison" {
                anyhow::bail!("handler failed on run {run}");
            }
            Ok(())
        }
    }

    fn events(listener: Arc<Flaky>) -> Arc<EventRegistry> {
        Arc::new(
            EventRegistry::builder()
                .register_event::<Ping>()
                .register_listeners::<Ping>([listener as Arc<dyn Listener>])
                .build(),
        )
    }

    async fn enqueue(store: &InMemoryQueueStore, hello: &str, retries: u32) -> QueueRecord {
        let env = EventEnvelope::new(Ping {
            hello: hello.to_string(),
        })
        .unwrap();
        let options = eventide_events::DriverOptions::default().with_retries(retries);
        store
            .insert(NewQueueRecord::from_event(&env, &options).unwrap())
            .await
            .unwrap()
    }

    fn worker(store: Arc<InMemoryQueueStore>, listener: Arc<Flaky>) -> Worker<Arc<InMemoryQueueStore>> {
        Worker::new(
            store,
            events(listener),
            WorkerOptions::default().with_run_once(true),
        )
    }

    #[tokio::test]
    async fn empty_queue_is_a_no_op() {
        let store = InMemoryQueueStore::arc();
        let report = worker(store, Flaky::new(0)).run_pass().await.unwrap();
        assert_eq!(report, PassReport::default());
    }

    #[tokio::test]
    async fn successful_records_are_deleted() {
        let store = InMemoryQueueStore::arc();
        enqueue(&store, "world", 3).await;

        let report = worker(store.clone(), Flaky::new(0)).run_pass().await.unwrap();

        assert_eq!(report.completed, 1);
        assert!(store.find_many("default").await.unwrap().is_empty());
        assert!(store.find_failed("default").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn always_failing_record_is_dead_lettered_after_its_budget() {
        let store = InMemoryQueueStore::arc();
        enqueue(&store, "world", 2).await;
        let worker = worker(store.clone(), Flaky::new(usize::MAX));

        let first = worker.run_pass().await.unwrap();
        assert_eq!(first.retried, 1);
        let pending = store.find_many("default").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempt, 1);

        let second = worker.run_pass().await.unwrap();
        assert_eq!(second.dead_lettered, 1);
        assert!(store.find_many("default").await.unwrap().is_empty());

        let failed = store.find_failed("default").await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].event_name, "Ping");
        assert_eq!(failed[0].payload_value().unwrap()["hello"], "world");
        assert_eq!(failed[0].error.name, "WorkerExecutionError");
        assert!(failed[0].error.message.contains("handler failed"));

        let third = worker.run_pass().await.unwrap();
        assert_eq!(third.fetched, 0);
        assert_eq!(worker.stats().passes, 3);
    }

    #[tokio::test]
    async fn records_run_oldest_first() {
        let store = InMemoryQueueStore::arc();
        for hello in ["a", "b", "c"] {
            enqueue(&store, hello, 3).await;
        }
        let listener = Flaky::new(0);

        worker(store, listener.clone()).run_pass().await.unwrap();

        assert_eq!(*listener.seen.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn one_failing_record_does_not_stop_the_pass() {
        let store = InMemoryQueueStore::arc();
        enqueue(&store, "poison", 3).await;
        enqueue(&store, "fine", 3).await;

        let report = worker(store.clone(), Flaky::new(0)).run_pass().await.unwrap();

        assert_eq!(report.retried, 1);
        assert_eq!(report.completed, 1);
        let pending = store.find_many("default").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].payload_value().unwrap()["hello"], "poison");
    }

    #[tokio::test]
    async fn unknown_events_exhaust_retries_and_dead_letter() {
        let store = InMemoryQueueStore::arc();
        store
            .insert(NewQueueRecord {
                queue_name: "default".into(),
                event_name: "Nobody".into(),
                payload: "{}".into(),
                retries: 1,
                created_at: chrono::Utc::now(),
            })
            .await
            .unwrap();

        let report = worker(store.clone(), Flaky::new(0)).run_pass().await.unwrap();

        assert_eq!(report.dead_lettered, 1);
        let failed = store.find_failed("default").await.unwrap();
        assert_eq!(failed[0].error.name, "UnknownEventError");
    }

    #[tokio::test]
    async fn run_once_returns_after_a_single_pass() {
        let store = InMemoryQueueStore::arc();
        enqueue(&store, "world", 3).await;

        run_worker(
            store.clone(),
            events(Flaky::new(0)),
            WorkerOptions::default().with_run_once(true),
        )
        .await
        .unwrap();

        assert_eq!(store.stats("default").await.unwrap().pending, 0);
    }

    #[tokio::test]
    async fn run_keeps_polling_until_the_task_is_dropped() {
        let store = InMemoryQueueStore::arc();
        let worker = Arc::new(Worker::new(
            store.clone(),
            events(Flaky::new(0)),
            WorkerOptions::default().with_run_after(Duration::from_millis(10)),
        ));
        let looping = worker.clone();
        let task = tokio::spawn(async move { looping.run().await });

        tokio::time::sleep(Duration::from_millis(30)).await;
        enqueue(&store, "late", 3).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!task.is_finished());
        assert!(store.find_many("default").await.unwrap().is_empty());
        let stats = worker.stats();
        assert!(stats.passes >= 2);
        assert_eq!(stats.completed, 1);
        task.abort();
    }

    #[tokio::test]
    async fn spawned_worker_stops_on_shutdown() {
        let store = InMemoryQueueStore::arc();
        enqueue(&store, "world", 3).await;

        let handle = Worker::new(
            store.clone(),
            events(Flaky::new(0)),
            WorkerOptions::default().with_run_after(Duration::from_millis(10)),
        )
        .spawn();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let stats = handle.shutdown().await;

        assert!(stats.passes >= 1);
        assert_eq!(stats.completed, 1);
        assert!(store.find_many("default").await.unwrap().is_empty());
    }
}
