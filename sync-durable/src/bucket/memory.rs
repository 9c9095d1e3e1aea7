//! In-memory bucket.
//!
//! Used when persistence is not needed, and as the test double for anything
//! that talks to a bucket: writes can be inspected and failures injected.

use super::Bucket;
use async_trait::async_trait;
use keelsync_types::BucketError;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// In-memory bucket.
///
/// Clones share the same storage, so a test can keep a handle while a queue
/// or log owns another.
#[derive(Debug, Default)]
pub struct MemoryBucket {
    inner: Arc<Mutex<MemoryBucketInner>>,
}

#[derive(Debug, Default)]
struct MemoryBucketInner {
    items: HashMap<String, Value>,
    write_count: usize,
    fail_next_get: Option<String>,
    fail_next_set: Option<String>,
}

impl MemoryBucket {
    /// Create an empty bucket.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `set_item` calls so far.
    pub fn write_count(&self) -> usize {
        self.lock().write_count
    }

    /// Keys currently stored.
    pub fn keys(&self) -> Vec<String> {
        self.lock().items.keys().cloned().collect()
    }

    /// Cause the next `get_item()` to fail with the given error.
    pub fn fail_next_get(&self, error: &str) {
        self.lock().fail_next_get = Some(error.to_string());
    }

    /// Cause the next `set_item()` to fail with the given error.
    pub fn fail_next_set(&self, error: &str) {
        self.lock().fail_next_set = Some(error.to_string());
    }

    /// Drop all stored items and pending failures.
    pub fn reset(&self) {
        *self.lock() = MemoryBucketInner::default();
    }

    fn lock(&self) -> MutexGuard<'_, MemoryBucketInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Clone for MemoryBucket {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl Bucket for MemoryBucket {
    async fn get_item(&self, key: &str) -> Result<Option<Value>, BucketError> {
        let mut inner = self.lock();

        // Check for forced failure
        if let Some(error) = inner.fail_next_get.take() {
            return Err(BucketError::Backend(error));
        }

        Ok(inner.items.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: Value) -> Result<(), BucketError> {
        let mut inner = self.lock();

        // Check for forced failure
        if let Some(error) = inner.fail_next_set.take() {
            return Err(BucketError::Backend(error));
        }

        inner.items.insert(key.to_string(), value);
        inner.write_count += 1;
        Ok(())
    }
}
