//! Persisted queue shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use eventide_core::{CoreResult, FailedRecordId, QueueRecordId, decode_payload, encode_payload};
use eventide_events::{DriverOptions, EventEnvelope};

/// A queue record about to be inserted (no id yet).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewQueueRecord {
    pub queue_name: String,
    pub event_name: String,
    /// Serialized JSON payload.
    pub payload: String,
    pub retries: u32,
    pub created_at: DateTime<Utc>,
}

impl NewQueueRecord {
    /// Build the record for a deferred event.
    ///
    /// The event's own queue wins over `options.queue_name`; the retry budget
    /// always comes from the driver options.
    pub fn from_event(event: &EventEnvelope, options: &DriverOptions) -> CoreResult<Self> {
        Ok(Self {
            queue_name: event
                .queue_name()
                .unwrap_or(options.queue_name.as_str())
                .to_string(),
            event_name: event.name().to_string(),
            payload: encode_payload(event.name(), event.payload_value())?,
            retries: options.retries,
            created_at: Utc::now(),
        })
    }

    /// Attach the id assigned by the store. Attempts start at zero.
    pub fn into_record(self, id: QueueRecordId) -> QueueRecord {
        QueueRecord {
            id,
            queue_name: self.queue_name,
            event_name: self.event_name,
            payload: self.payload,
            attempt: 0,
            retries: self.retries,
            created_at: self.created_at,
        }
    }
}

/// What a failed attempt does to a pending record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Budget left: persist the new attempt count and try again next pass.
    Retry,
    /// Budget exhausted: move to the dead-letter store.
    DeadLetter,
}

/// A pending unit of deferred work.
///
/// While a record is pending, `attempt <= retries` holds. The attempt that
/// would cross the budget moves the record out instead of updating it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueRecord {
    pub id: QueueRecordId,
    pub queue_name: String,
    pub event_name: String,
    /// Serialized JSON payload.
    pub payload: String,
    /// Processing attempts so far (starts at 0).
    pub attempt: u32,
    /// Attempts allowed before dead-lettering.
    pub retries: u32,
    pub created_at: DateTime<Utc>,
}

impl QueueRecord {
    pub fn payload_value(&self) -> CoreResult<JsonValue> {
        decode_payload(&self.event_name, &self.payload)
    }

    /// Count a failed attempt and decide what happens next.
    pub fn register_failure(&mut self) -> FailureOutcome {
        self.attempt = self.attempt.saturating_add(1);
        if self.attempt >= self.retries {
            FailureOutcome::DeadLetter
        } else {
            FailureOutcome::Retry
        }
    }
}

/// Diagnostic captured from the last failure of a dead-lettered record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetails {
    pub name: String,
    pub message: String,
    pub stack: String,
}

impl FailureDetails {
    pub fn new(
        name: impl Into<String>,
        message: impl Into<String>,
        stack: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: stack.into(),
        }
    }
}

/// A dead-letter record about to be inserted (no id yet).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFailedRecord {
    pub queue_name: String,
    pub event_name: String,
    pub payload: String,
    pub error: FailureDetails,
    pub failed_at: DateTime<Utc>,
}

impl NewFailedRecord {
    pub fn from_record(record: &QueueRecord, error: FailureDetails) -> Self {
        Self {
            queue_name: record.queue_name.clone(),
            event_name: record.event_name.clone(),
            payload: record.payload.clone(),
            error,
            failed_at: Utc::now(),
        }
    }

    pub fn into_record(self, id: FailedRecordId) -> FailedRecord {
        FailedRecord {
            id,
            queue_name: self.queue_name,
            event_name: self.event_name,
            payload: self.payload,
            error: self.error,
            failed_at: self.failed_at,
        }
    }
}

/// A permanently failed record. Immutable; only ever replayed by hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedRecord {
    pub id: FailedRecordId,
    pub queue_name: String,
    pub event_name: String,
    pub payload: String,
    pub error: FailureDetails,
    pub failed_at: DateTime<Utc>,
}

impl FailedRecord {
    pub fn payload_value(&self) -> CoreResult<JsonValue> {
        decode_payload(&self.event_name, &self.payload)
    }
}
