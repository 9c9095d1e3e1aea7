//! Persisted record shapes.
//!
//! These are the values written to a bucket. The queue stores an ordered
//! array of [`SerializedAction`]; the log stores an ordered array of
//! [`TransformId`](crate::TransformId) strings.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stored form of a queued action.
///
/// The queue-local action identifier is deliberately absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedAction {
    /// Name of the target method to invoke.
    pub method: String,
    /// Payload passed to the method.
    #[serde(default)]
    pub data: Value,
    /// Caller metadata, carried but never interpreted.
    #[serde(default)]
    pub meta: Value,
}
