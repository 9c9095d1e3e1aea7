//! Durable transform log.
//!
//! [`TransformLog`] records the identifiers of applied transforms, oldest
//! first, and optionally mirrors them into a bucket so a restarted process
//! knows which transforms a source has already applied.
//!
//! Queries (`before`, `after`, `contains`) read the in-memory sequence and
//! fail immediately. Mutations (`append`, `truncate`, `rollback`, `clear`) are
//! async: the new sequence is written to the bucket first and only then
//! becomes visible, followed by the matching [`LogEvent`].

use keelsync_core::{Event, Evented, LogEntries};
use keelsync_types::{LogError, TransformId};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::bucket::{Bucket, Persister};
use crate::config::LogOptions;

/// Events announced by a [`TransformLog`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    /// Identifiers were appended, in order.
    Append(Vec<TransformId>),
    /// Entries before the boundary were dropped.
    Truncate(TransformId, i64),
    /// Entries after the boundary were dropped.
    Rollback(TransformId, i64),
    /// Every entry was dropped.
    Clear,
}

/// Registration keys for [`LogEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogEventKind {
    /// [`LogEvent::Append`]
    Append,
    /// [`LogEvent::Truncate`]
    Truncate,
    /// [`LogEvent::Rollback`]
    Rollback,
    /// [`LogEvent::Clear`]
    Clear,
}

impl Event for LogEvent {
    type Kind = LogEventKind;

    fn kind(&self) -> LogEventKind {
        match self {
            LogEvent::Append(_) => LogEventKind::Append,
            LogEvent::Truncate(..) => LogEventKind::Truncate,
            LogEvent::Rollback(..) => LogEventKind::Rollback,
            LogEvent::Clear => LogEventKind::Clear,
        }
    }
}

/// Append-only log of transform identifiers.
pub struct TransformLog {
    entries: Mutex<LogEntries>,
    events: Evented<LogEvent>,
    persister: Option<Persister>,
    /// Serializes mutate-and-persist sections.
    writer: tokio::sync::Mutex<()>,
}

impl TransformLog {
    /// Create an empty, unpersisted log.
    pub fn new() -> Self {
        Self::from_entries(Vec::new())
    }

    /// Create an unpersisted log holding `entries`, oldest first.
    pub fn from_entries(entries: Vec<TransformId>) -> Self {
        Self::build(LogEntries::from_vec(entries), None)
    }

    /// Open a log bound to `bucket`, loading any stored entries.
    ///
    /// Stored entries win over `initial`, which is only used when nothing is
    /// stored yet.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Bucket`] if the stored value cannot be loaded.
    pub async fn open(
        options: &LogOptions,
        bucket: Arc<dyn Bucket>,
        initial: Vec<TransformId>,
    ) -> Result<Self, LogError> {
        let persister = Persister::new(bucket, options.name.as_str());
        let stored: Option<Vec<TransformId>> = persister.load().await?;
        let entries = stored.unwrap_or(initial);

        tracing::debug!(key = %persister.key(), len = entries.len(), "reified transform log");
        Ok(Self::build(LogEntries::from_vec(entries), Some(persister)))
    }

    fn build(entries: LogEntries, persister: Option<Persister>) -> Self {
        Self {
            entries: Mutex::new(entries),
            events: Evented::new(),
            persister,
            writer: tokio::sync::Mutex::new(()),
        }
    }

    /// The log's event registry.
    pub fn events(&self) -> &Evented<LogEvent> {
        &self.events
    }

    /// Snapshot of every identifier, oldest first.
    pub fn entries(&self) -> Vec<TransformId> {
        self.lock().as_slice().to_vec()
    }

    /// Number of logged identifiers.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if the log is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// The most recent identifier, or `None` when empty.
    pub fn head(&self) -> Option<TransformId> {
        self.lock().head().cloned()
    }

    /// Check whether `id` has been logged.
    pub fn contains(&self, id: &TransformId) -> bool {
        self.lock().contains(id)
    }

    /// Identifiers logged before `id`, with the boundary shifted by
    /// `relative_position` (`0` excludes `id` itself).
    ///
    /// # Errors
    ///
    /// [`LogError::TransformNotLogged`] if `id` is absent,
    /// [`LogError::OutOfRange`] if the shifted boundary leaves the log.
    pub fn before(&self, id: &TransformId, relative_position: i64) -> Result<Vec<TransformId>, LogError> {
        Ok(self.lock().before(id, relative_position)?.to_vec())
    }

    /// Identifiers logged after `id`, with the boundary shifted by
    /// `relative_position` (`-1` includes `id` itself).
    ///
    /// # Errors
    ///
    /// Same as [`TransformLog::before`].
    pub fn after(&self, id: &TransformId, relative_position: i64) -> Result<Vec<TransformId>, LogError> {
        Ok(self.lock().after(id, relative_position)?.to_vec())
    }

    /// Append identifiers to the log, persist, and emit [`LogEvent::Append`].
    pub async fn append(&self, ids: impl IntoIterator<Item = TransformId>) -> Result<(), LogError> {
        let ids: Vec<TransformId> = ids.into_iter().collect();
        let appended = ids.clone();
        self.mutate(
            move |entries| {
                entries.append(appended);
                Ok(())
            },
            LogEvent::Append(ids),
        )
        .await
    }

    /// Drop every entry before `id` (shifted by `relative_position`), persist,
    /// and emit [`LogEvent::Truncate`].
    ///
    /// A boundary one past the head empties the log.
    pub async fn truncate(&self, id: &TransformId, relative_position: i64) -> Result<(), LogError> {
        self.mutate(
            |entries| entries.truncate(id, relative_position),
            LogEvent::Truncate(id.clone(), relative_position),
        )
        .await
    }

    /// Drop every entry after `id` (shifted by `relative_position`), persist,
    /// and emit [`LogEvent::Rollback`].
    ///
    /// A boundary one before the first entry empties the log.
    pub async fn rollback(&self, id: &TransformId, relative_position: i64) -> Result<(), LogError> {
        self.mutate(
            |entries| entries.rollback(id, relative_position),
            LogEvent::Rollback(id.clone(), relative_position),
        )
        .await
    }

    /// Drop every entry, persist, and emit [`LogEvent::Clear`].
    pub async fn clear(&self) -> Result<(), LogError> {
        self.mutate(
            |entries| {
                entries.clear();
                Ok(())
            },
            LogEvent::Clear,
        )
        .await
    }

    /// Apply `change` to a copy of the entries, persist the copy, publish it,
    /// then announce `event`.
    ///
    /// Events are emitted under the writer lock, in mutation order.
    async fn mutate<F>(&self, change: F, event: LogEvent) -> Result<(), LogError>
    where
        F: FnOnce(&mut LogEntries) -> Result<(), LogError>,
    {
        let _writer = self.writer.lock().await;

        let mut next = self.lock().clone();
        change(&mut next)?;

        if let Some(persister) = &self.persister {
            persister.save(next.as_slice()).await?;
        }

        *self.lock() = next;
        self.events.emit(&event);
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, LogEntries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for TransformLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TransformLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformLog")
            .field("entries", &self.entries())
            .field("persister", &self.persister)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::MemoryBucket;
    use keelsync_core::sync_listener;
    use serde_json::json;

    const A: &str = "f8d2c75f-f758-4314-b5c5-ac7fb783ab26";
    const B: &str = "1d12dc84-0d03-4875-a4a6-0e389737d891";
    const C: &str = "ea054670-8901-45c2-b908-4db2c5bb9c7d";
    const D: &str = "771b25ff-b971-42e0-aac3-c285aef75326";

    fn id(s: &str) -> TransformId {
        TransformId::from(s)
    }

    async fn abc() -> TransformLog {
        let log = TransformLog::new();
        log.append(vec![id(A), id(B), id(C)]).await.unwrap();
        log
    }

    fn record(log: &TransformLog, kind: LogEventKind) -> Arc<Mutex<Vec<LogEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        log.events().on(
            kind,
            sync_listener(move |event: &LogEvent, _| {
                sink.lock().unwrap().push(event.clone());
                Ok(())
            }),
            None,
        );
        seen
    }

    #[test]
    fn can_be_created_empty() {
        let log = TransformLog::new();
        assert_eq!(log.len(), 0);
        assert!(log.head().is_none());
    }

    #[test]
    fn can_be_created_with_entries() {
        let log = TransformLog::from_entries(vec![id("a"), id("b")]);
        assert_eq!(log.len(), 2);
        assert_eq!(log.head(), Some(id("b")));
    }

    #[tokio::test]
    async fn append_to_empty_emits_event() {
        let log = TransformLog::new();
        let seen = record(&log, LogEventKind::Append);

        log.append(vec![id(A)]).await.unwrap();

        assert_eq!(log.entries(), vec![id(A)]);
        assert_eq!(*seen.lock().unwrap(), vec![LogEvent::Append(vec![id(A)])]);
    }

    #[tokio::test]
    async fn populated_log_queries() {
        let log = abc().await;

        assert_eq!(log.entries().len(), 3);
        assert_eq!(log.len(), 3);
        assert_eq!(log.head(), Some(id(C)));
        assert!(log.contains(&id(A)));
        assert!(!log.contains(&id(D)));
    }

    #[tokio::test]
    async fn before_queries() {
        let log = abc().await;

        assert_eq!(log.before(&id(C), 0).unwrap(), vec![id(A), id(B)]);
        assert_eq!(log.before(&id(C), -1).unwrap(), vec![id(A)]);
        assert!(matches!(log.before(&id(D), 0), Err(LogError::TransformNotLogged { .. })));
        assert!(matches!(log.before(&id(C), -3), Err(LogError::OutOfRange { .. })));
        assert!(matches!(log.before(&id(C), 1), Err(LogError::OutOfRange { .. })));
    }

    #[tokio::test]
    async fn after_queries() {
        let log = abc().await;
        let head = log.head().unwrap();

        assert_eq!(log.after(&id(A), 0).unwrap(), vec![id(B), id(C)]);
        assert_eq!(log.after(&id(A), 1).unwrap(), vec![id(C)]);
        assert_eq!(log.after(&id(A), -1).unwrap(), vec![id(A), id(B), id(C)]);
        assert!(log.after(&head, 0).unwrap().is_empty());
        assert!(matches!(log.after(&id(D), 0), Err(LogError::TransformNotLogged { .. })));
        assert!(matches!(log.after(&id(A), -2), Err(LogError::OutOfRange { .. })));
        assert!(matches!(log.after(&id(C), 1), Err(LogError::OutOfRange { .. })));
    }

    #[tokio::test]
    async fn clear_emits_event() {
        let log = abc().await;
        let seen = record(&log, LogEventKind::Clear);

        log.clear().await.unwrap();

        assert!(log.entries().is_empty());
        assert_eq!(*seen.lock().unwrap(), vec![LogEvent::Clear]);
    }

    #[tokio::test]
    async fn clear_on_empty_still_emits() {
        let log = TransformLog::new();
        let seen = record(&log, LogEventKind::Clear);

        log.clear().await.unwrap();
        log.clear().await.unwrap();

        assert!(log.is_empty());
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn truncate_emits_event() {
        let log = abc().await;
        let seen = record(&log, LogEventKind::Truncate);

        log.truncate(&id(B), 0).await.unwrap();

        assert_eq!(log.entries(), vec![id(B), id(C)]);
        assert_eq!(*seen.lock().unwrap(), vec![LogEvent::Truncate(id(B), 0)]);
    }

    #[tokio::test]
    async fn truncate_to_head_keeps_head() {
        let log = abc().await;
        let head = log.head().unwrap();

        log.truncate(&head, 0).await.unwrap();
        assert_eq!(log.entries(), vec![id(C)]);
    }

    #[tokio::test]
    async fn truncate_just_past_head_clears() {
        let log = abc().await;
        log.truncate(&id(C), 1).await.unwrap();
        assert!(log.entries().is_empty());
    }

    #[tokio::test]
    async fn truncate_failures_are_async_and_leave_log_alone() {
        let log = abc().await;
        let seen = record(&log, LogEventKind::Truncate);

        let not_logged = log.truncate(&id(D), 0).await;
        let too_low = log.truncate(&id(A), -1).await;
        let too_high = log.truncate(&id(C), 2).await;

        assert!(matches!(not_logged, Err(LogError::TransformNotLogged { .. })));
        assert!(matches!(too_low, Err(LogError::OutOfRange { .. })));
        assert!(matches!(too_high, Err(LogError::OutOfRange { .. })));
        assert_eq!(log.len(), 3);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn rollback_emits_event() {
        let log = abc().await;
        let seen = record(&log, LogEventKind::Rollback);

        log.rollback(&id(A), 0).await.unwrap();

        assert_eq!(log.entries(), vec![id(A)]);
        assert_eq!(*seen.lock().unwrap(), vec![LogEvent::Rollback(id(A), 0)]);
    }

    #[tokio::test]
    async fn rollback_to_head_changes_nothing() {
        let log = abc().await;
        let head = log.head().unwrap();

        log.rollback(&head, 0).await.unwrap();
        assert_eq!(log.head(), Some(id(C)));
        assert_eq!(log.len(), 3);
    }

    #[tokio::test]
    async fn rollback_to_just_before_first_clears() {
        let log = abc().await;
        log.rollback(&id(A), -1).await.unwrap();
        assert!(log.entries().is_empty());
    }

    #[tokio::test]
    async fn rollback_failures_are_async() {
        let log = abc().await;

        assert!(matches!(
            log.rollback(&id(D), 0).await,
            Err(LogError::TransformNotLogged { .. })
        ));
        assert!(matches!(
            log.rollback(&id(A), -2).await,
            Err(LogError::OutOfRange { .. })
        ));
        assert!(matches!(
            log.rollback(&id(C), 1).await,
            Err(LogError::OutOfRange { .. })
        ));
        assert_eq!(log.len(), 3);
    }

    #[tokio::test]
    async fn reified_from_bucket() {
        let bucket = MemoryBucket::new();
        bucket.set_item("log", json!([A, B])).await.unwrap();

        let log = TransformLog::open(&LogOptions::default(), Arc::new(bucket), Vec::new())
            .await
            .unwrap();

        assert_eq!(log.len(), 2);
        assert_eq!(log.entries(), vec![id(A), id(B)]);
    }

    #[tokio::test]
    async fn initial_entries_used_when_bucket_is_empty() {
        let bucket = MemoryBucket::new();
        let log = TransformLog::open(&LogOptions::default(), Arc::new(bucket.clone()), vec![id(A)])
            .await
            .unwrap();

        assert_eq!(log.entries(), vec![id(A)]);
        assert_eq!(bucket.write_count(), 0);
    }

    #[tokio::test]
    async fn reify_failure_is_reported() {
        let bucket = MemoryBucket::new();
        bucket.fail_next_get("unavailable");

        let result = TransformLog::open(&LogOptions::default(), Arc::new(bucket), Vec::new()).await;
        assert!(matches!(result, Err(LogError::Bucket(_))));
    }

    async fn bound_log(bucket: &MemoryBucket) -> TransformLog {
        TransformLog::open(
            &LogOptions::default().with_name("log"),
            Arc::new(bucket.clone()),
            Vec::new(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn append_is_persisted() {
        let bucket = MemoryBucket::new();
        let log = bound_log(&bucket).await;

        log.append(vec![id(A), id(B)]).await.unwrap();

        assert_eq!(log.len(), 2);
        assert_eq!(bucket.get_item("log").await.unwrap(), Some(json!([A, B])));
    }

    #[tokio::test]
    async fn truncate_is_persisted() {
        let bucket = MemoryBucket::new();
        let log = bound_log(&bucket).await;

        log.append(vec![id(A), id(B), id(C)]).await.unwrap();
        let head = log.head().unwrap();
        log.truncate(&head, 0).await.unwrap();

        assert_eq!(log.len(), 1);
        assert_eq!(bucket.get_item("log").await.unwrap(), Some(json!([C])));
    }

    #[tokio::test]
    async fn rollback_is_persisted() {
        let bucket = MemoryBucket::new();
        let log = bound_log(&bucket).await;

        log.append(vec![id(A), id(B), id(C)]).await.unwrap();
        log.rollback(&id(B), 0).await.unwrap();

        assert_eq!(log.len(), 2);
        assert_eq!(bucket.get_item("log").await.unwrap(), Some(json!([A, B])));
    }

    #[tokio::test]
    async fn clear_is_persisted() {
        let bucket = MemoryBucket::new();
        let log = bound_log(&bucket).await;

        log.append(vec![id(A), id(B), id(C)]).await.unwrap();
        log.clear().await.unwrap();

        assert_eq!(log.len(), 0);
        assert_eq!(bucket.get_item("log").await.unwrap(), Some(json!([])));
    }

    #[tokio::test]
    async fn failed_write_leaves_log_unchanged() {
        let bucket = MemoryBucket::new();
        let log = bound_log(&bucket).await;
        let seen = record(&log, LogEventKind::Append);

        log.append(vec![id(A)]).await.unwrap();
        bucket.fail_next_set("disk full");

        let result = log.append(vec![id(B)]).await;

        assert!(matches!(result, Err(LogError::Bucket(_))));
        assert_eq!(log.entries(), vec![id(A)]);
        assert_eq!(bucket.get_item("log").await.unwrap(), Some(json!([A])));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn append_events_follow_mutation_order() {
        let log = Arc::new(TransformLog::new());
        let seen = record(&log, LogEventKind::Append);

        let mut handles = Vec::new();
        for i in 0..32 {
            let log = Arc::clone(&log);
            handles.push(tokio::spawn(async move {
                log.append(vec![TransformId::from(format!("t{}", i))]).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let announced: Vec<TransformId> = seen
            .lock()
            .unwrap()
            .iter()
            .flat_map(|event| match event {
                LogEvent::Append(ids) => ids.clone(),
                other => panic!("unexpected event {:?}", other),
            })
            .collect();
        assert_eq!(announced, log.entries());
    }

    #[tokio::test]
    async fn concurrent_appends_are_serialized() {
        let bucket = MemoryBucket::new();
        let log = Arc::new(bound_log(&bucket).await);

        let mut handles = Vec::new();
        for i in 0..16 {
            let log = Arc::clone(&log);
            handles.push(tokio::spawn(async move {
                log.append(vec![TransformId::from(format!("t{}", i))]).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let stored: Vec<TransformId> =
            serde_json::from_value(bucket.get_item("log").await.unwrap().unwrap()).unwrap();
        assert_eq!(log.len(), 16);
        assert_eq!(stored, log.entries());
    }
}
