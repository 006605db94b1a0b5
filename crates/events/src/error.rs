use thiserror::Error;

use eventide_core::CoreError;

/// Dispatch-time error.
///
/// Everything here surfaces to the caller of `dispatch`. Failures of queued
/// events are only ever seen by the worker and never show up as a `DispatchError`.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The event named a driver nobody registered.
    #[error("driver not found: {0}")]
    DriverNotFound(String),

    /// The event could not be built (bad name or non-serializable payload).
    #[error(transparent)]
    InvalidEvent(#[from] CoreError),

    /// The event (or one of its listeners) failed while running synchronously.
    #[error("event '{event}' failed: {source}")]
    Execution {
        event: String,
        #[source]
        source: anyhow::Error,
    },

    /// A deferring driver could not persist the event.
    #[error("driver '{driver}' could not persist event '{event}': {source}")]
    Persistence {
        driver: String,
        event: String,
        #[source]
        source: anyhow::Error,
    },
}

impl DispatchError {
    /// Stable taxonomy name.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::DriverNotFound(_) => "DriverNotFoundError",
            DispatchError::InvalidEvent(e) => e.kind(),
            DispatchError::Execution { .. } => "ExecutionError",
            DispatchError::Persistence { .. } => "PersistenceError",
        }
    }
}
