//! Error types for keelsync.

use std::sync::Arc;
use thiserror::Error;

use crate::TransformId;

/// Opaque error raised by an action's target method.
///
/// keelsync never interprets it; it is recorded on the queue and handed to
/// `fail` listeners. Shared so both can hold it.
pub type ActionError = Arc<dyn std::error::Error + Send + Sync>;

/// Error returned by an event listener.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised by a bucket backend.
#[derive(Debug, Error)]
pub enum BucketError {
    /// Value could not be converted to or from its stored JSON form.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend-specific failure (I/O, database, ...).
    #[error("bucket backend error: {0}")]
    Backend(String),
}

/// Errors raised by transform log operations.
#[derive(Debug, Error)]
pub enum LogError {
    /// The referenced transform is not in the log.
    #[error("transform not logged: {id}")]
    TransformNotLogged {
        /// The identifier that was looked up.
        id: TransformId,
    },

    /// A relative position moved the boundary outside the log.
    #[error("relative position {relative_position} out of range for {id} (valid: {min}..={max})")]
    OutOfRange {
        /// The identifier the offset was applied to.
        id: TransformId,
        /// The requested offset.
        relative_position: i64,
        /// Lowest valid offset for this identifier.
        min: i64,
        /// Highest valid offset for this identifier.
        max: i64,
    },

    /// Persisting the log failed.
    #[error("bucket error: {0}")]
    Bucket(#[from] BucketError),
}

/// Errors raised by action queue operations.
///
/// Failures of the actions themselves are not reported here; they surface
/// through the queue's `error` state and `fail` event.
#[derive(Debug, Error)]
pub enum QueueError {
    /// A processing run is in progress.
    #[error("action queue is active")]
    Active,

    /// The queue is paused on a failed action.
    #[error("action queue is paused on a failed action")]
    Paused,

    /// The operation needs a queue paused on a failed action.
    #[error("action queue is not paused on a failed action")]
    NotPaused,

    /// Persisting the queue failed.
    #[error("bucket error: {0}")]
    Bucket(#[from] BucketError),
}
