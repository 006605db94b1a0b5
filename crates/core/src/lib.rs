//! `eventide-core`: foundation building blocks shared by the event and queue crates.
//!
//! This crate contains **pure** primitives (no IO, no async): record identifiers,
//! the core error model and JSON payload validation.

pub mod error;
pub mod id;
pub mod payload;

pub use error::{CoreError, CoreResult};
pub use id::{FailedRecordId, QueueRecordId};
pub use payload::{decode_payload, encode_payload, to_payload, validate_event_name};
