//! Core error model.

use thiserror::Error;

/// Result type used across the core layer.
pub type CoreResult<T> = Result<T, CoreError>;

/// Core-level error.
///
/// Keep this focused on deterministic construction failures (bad names, bad
/// payloads, malformed identifiers). Dispatch and persistence concerns belong
/// to the crates that own them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// An event payload cannot be losslessly represented as JSON.
    #[error("invalid payload for event '{event}': {reason}")]
    InvalidPayload { event: String, reason: String },

    /// An event was given an empty name.
    #[error("event name must not be empty")]
    EmptyEventName,

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl CoreError {
    pub fn invalid_payload(event: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPayload {
            event: event.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    /// Stable taxonomy name, recorded on dead-lettered records.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::InvalidPayload { .. } => "InvalidPayloadError",
            CoreError::EmptyEventName => "InvalidEventNameError",
            CoreError::InvalidId(_) => "InvalidIdError",
        }
    }
}
