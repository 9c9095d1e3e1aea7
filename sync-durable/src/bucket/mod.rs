//! Bucket abstraction for keelsync.
//!
//! A bucket is the external key-value durability backend shared by action
//! queues and transform logs. keelsync only needs two operations:
//! - `get_item()` loads the value stored under a key
//! - `set_item()` replaces it
//!
//! Values are JSON. The queue stores an array of `{method, data, meta}`
//! records; the log stores an array of identifier strings.
//!
//! # Example
//!
//! ```ignore
//! let bucket = MemoryBucket::new();
//! bucket.set_item("log", json!(["a", "b"])).await?;
//! let stored = bucket.get_item("log").await?;
//! ```

mod memory;
mod sqlite;

pub use memory::MemoryBucket;
pub use sqlite::SqliteBucket;

use async_trait::async_trait;
use keelsync_types::BucketError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Asynchronous key-value store used for persistence.
///
/// Implementations handle the underlying storage (memory, SQLite, ...).
#[async_trait]
pub trait Bucket: Send + Sync {
    /// Load the value stored under `key`, or `None` if nothing is stored.
    async fn get_item(&self, key: &str) -> Result<Option<Value>, BucketError>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set_item(&self, key: &str, value: Value) -> Result<(), BucketError>;
}

/// A bucket bound to one key, with typed load/save.
#[derive(Clone)]
pub(crate) struct Persister {
    bucket: Arc<dyn Bucket>,
    key: String,
}

impl Persister {
    pub(crate) fn new(bucket: Arc<dyn Bucket>, key: impl Into<String>) -> Self {
        Self {
            bucket,
            key: key.into(),
        }
    }

    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    /// Load and decode the stored value, if any.
    pub(crate) async fn load<T: DeserializeOwned>(&self) -> Result<Option<T>, BucketError> {
        match self.bucket.get_item(&self.key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Encode and store `value`.
    pub(crate) async fn save<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), BucketError> {
        let value = serde_json::to_value(value)?;
        self.bucket.set_item(&self.key, value).await?;
        tracing::debug!(key = %self.key, "persisted");
        Ok(())
    }
}

impl std::fmt::Debug for Persister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persister").field("key", &self.key).finish()
    }
}
