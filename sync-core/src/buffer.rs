//! Action buffer for keelsync.
//!
//! This module holds the in-memory state of an action queue:
//! - FIFO ordering of pending actions
//! - The head action as `current`
//! - Processing / completion / failure bookkeeping
//!
//! The async driver in `sync-durable` owns one of these behind a lock and
//! performs the actual invocations and persistence. Actions flow through the
//! buffer in this order:
//! 1. `push_back()` / `push_front()` - add to the queue
//! 2. `begin()` - the head action is being invoked
//! 3. `succeed()` - remove the head, or `fail()` - keep it and pause
//!
//! A paused buffer stays paused until `resume()`, `pop_front()` or `clear()`.
//! When the head ran but its removal could not be persisted, it is marked
//! with `settle()` so the next run removes it without invoking it again.

use keelsync_types::{ActionError, ActionId, SerializedAction};
use serde_json::Value;
use std::collections::VecDeque;

use crate::pattern::PatternMatcher;

/// A deferred invocation of a method on the queue's target.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    /// Queue-local identifier.
    pub id: ActionId,
    /// Name of the target method.
    pub method: String,
    /// Payload passed to the method.
    pub data: Value,
    /// Caller metadata.
    pub meta: Value,
}

impl Action {
    /// Create an action, generating an identifier if none is supplied.
    pub fn new(method: impl Into<String>, data: Value, meta: Value, id: Option<ActionId>) -> Self {
        Self {
            id: id.unwrap_or_default(),
            method: method.into(),
            data,
            meta,
        }
    }

    /// Stored form of this action (without its identifier).
    pub fn serialize(&self) -> SerializedAction {
        SerializedAction {
            method: self.method.clone(),
            data: self.data.clone(),
            meta: self.meta.clone(),
        }
    }

    /// Rebuild an action from its stored form with a fresh identifier.
    pub fn from_serialized(serialized: SerializedAction) -> Self {
        Self::new(serialized.method, serialized.data, serialized.meta, None)
    }
}

/// Pending actions plus queue status flags.
#[derive(Debug, Clone, Default)]
pub struct ActionBuffer {
    /// Actions waiting to run; the front is `current`.
    actions: VecDeque<Action>,
    /// An invocation of `current` is pending.
    processing: bool,
    /// The last run drained the buffer without error.
    complete: bool,
    /// Failure of `current`, while paused.
    error: Option<ActionError>,
    /// `current` already ran; only its removal is outstanding.
    settled: bool,
}

impl ActionBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a buffer from stored actions, oldest first.
    pub fn from_serialized(serialized: Vec<SerializedAction>) -> Self {
        Self {
            actions: serialized.into_iter().map(Action::from_serialized).collect(),
            ..Self::default()
        }
    }

    /// Stored form of every pending action, oldest first.
    pub fn serialize(&self) -> Vec<SerializedAction> {
        self.actions.iter().map(Action::serialize).collect()
    }

    /// Add an action at the tail.
    pub fn push_back(&mut self, action: Action) {
        self.complete = false;
        self.actions.push_back(action);
    }

    /// Add an action at the head, making it `current`.
    pub fn push_front(&mut self, action: Action) {
        self.complete = false;
        self.actions.push_front(action);
    }

    /// Remove and return the head action without running it.
    ///
    /// Any failure recorded against it is discarded with it.
    pub fn pop_front(&mut self) -> Option<Action> {
        let action = self.actions.pop_front()?;
        self.error = None;
        self.settled = false;
        Some(action)
    }

    /// The head action, if any.
    pub fn current(&self) -> Option<&Action> {
        self.actions.front()
    }

    /// Snapshot of every pending action, oldest first.
    pub fn actions(&self) -> Vec<Action> {
        self.actions.iter().cloned().collect()
    }

    /// Pending actions whose data matches `pattern`.
    pub fn matching(&self, pattern: &PatternMatcher) -> Vec<Action> {
        self.actions
            .iter()
            .filter(|action| pattern.is_match(&action.data))
            .cloned()
            .collect()
    }

    /// Number of pending actions.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Check if an invocation is pending.
    pub fn is_processing(&self) -> bool {
        self.processing
    }

    /// Check if the last run drained without error.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Check if the head action failed and awaits recovery.
    pub fn is_paused(&self) -> bool {
        self.error.is_some()
    }

    /// Check if the head action already ran and awaits removal.
    pub fn is_settled(&self) -> bool {
        self.settled
    }

    /// The failure of the head action, if paused.
    pub fn error(&self) -> Option<ActionError> {
        self.error.clone()
    }

    /// Mark the head action as being invoked.
    pub fn begin(&mut self) {
        self.processing = true;
    }

    /// Record success of the invocation of `id` and remove it.
    ///
    /// Returns the removed action, or `None` if `id` is no longer the head.
    pub fn succeed(&mut self, id: &ActionId) -> Option<Action> {
        self.processing = false;
        if self.actions.front().map(|a| &a.id) == Some(id) {
            self.settled = false;
            self.actions.pop_front()
        } else {
            None
        }
    }

    /// Record failure of the head action; it stays `current`.
    pub fn fail(&mut self, error: ActionError) {
        self.processing = false;
        self.complete = false;
        self.error = Some(error);
    }

    /// Mark the head action as performed without removing it.
    pub fn settle(&mut self) {
        self.processing = false;
        self.settled = !self.actions.is_empty();
    }

    /// Mark the buffer as drained.
    pub fn finish(&mut self) {
        self.complete = true;
    }

    /// Forget the recorded failure so the head action can run again.
    pub fn resume(&mut self) {
        self.error = None;
        self.complete = false;
    }

    /// Remove every action; an empty buffer is trivially complete.
    pub fn clear(&mut self) {
        self.actions.clear();
        self.error = None;
        self.settled = false;
        self.processing = false;
        self.complete = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn make_action(value: &str) -> Action {
        Action::new("_transform", json!({ "value": value }), Value::Null, None)
    }

    fn failure(message: &str) -> ActionError {
        Arc::new(std::io::Error::new(std::io::ErrorKind::Other, message.to_string()))
    }

    #[test]
    fn buffer_keeps_fifo_order() {
        let mut buffer = ActionBuffer::new();
        buffer.push_back(make_action("Mercury"));
        buffer.push_back(make_action("Venus"));

        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.current().unwrap().data, json!({ "value": "Mercury" }));
    }

    #[test]
    fn push_front_becomes_current() {
        let mut buffer = ActionBuffer::new();
        buffer.push_back(make_action("Mercury"));
        buffer.push_front(make_action("Venus"));

        assert_eq!(buffer.current().unwrap().data, json!({ "value": "Venus" }));
    }

    #[test]
    fn explicit_ids_are_kept() {
        let action = Action::new("_transform", Value::Null, Value::Null, Some(ActionId::from(1u64)));
        assert_eq!(action.id, ActionId::from("1"));
    }

    #[test]
    fn succeed_removes_head_and_advances() {
        let mut buffer = ActionBuffer::new();
        let first = make_action("Mercury");
        buffer.push_back(first.clone());
        buffer.push_back(make_action("Venus"));

        buffer.begin();
        assert!(buffer.is_processing());

        let done = buffer.succeed(&first.id).unwrap();
        assert_eq!(done, first);
        assert!(!buffer.is_processing());
        assert_eq!(buffer.current().unwrap().data, json!({ "value": "Venus" }));
    }

    #[test]
    fn succeed_ignores_stale_id() {
        let mut buffer = ActionBuffer::new();
        buffer.push_back(make_action("Mercury"));

        assert!(buffer.succeed(&ActionId::new()).is_none());
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn fail_pauses_on_current() {
        let mut buffer = ActionBuffer::new();
        let first = make_action("Mercury");
        buffer.push_back(first.clone());
        buffer.begin();
        buffer.fail(failure(":("));

        assert!(buffer.is_paused());
        assert!(!buffer.is_complete());
        assert!(!buffer.is_processing());
        assert_eq!(buffer.error().unwrap().to_string(), ":(");
        assert_eq!(buffer.current(), Some(&first));
    }

    #[test]
    fn resume_clears_error_but_keeps_current() {
        let mut buffer = ActionBuffer::new();
        let first = make_action("Mercury");
        buffer.push_back(first.clone());
        buffer.fail(failure(":("));
        buffer.resume();

        assert!(!buffer.is_paused());
        assert_eq!(buffer.current(), Some(&first));
    }

    #[test]
    fn pop_front_discards_failure() {
        let mut buffer = ActionBuffer::new();
        let first = make_action("Mercury");
        buffer.push_back(first.clone());
        buffer.push_back(make_action("Venus"));
        buffer.fail(failure(":("));

        assert_eq!(buffer.pop_front(), Some(first));
        assert!(!buffer.is_paused());
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn settled_head_stays_current_until_removed() {
        let mut buffer = ActionBuffer::new();
        let first = make_action("Mercury");
        buffer.push_back(first.clone());
        buffer.push_back(make_action("Venus"));
        buffer.begin();

        buffer.settle();
        buffer.fail(failure("disk full"));

        assert!(buffer.is_settled());
        assert!(buffer.is_paused());
        assert!(!buffer.is_processing());
        assert_eq!(buffer.current(), Some(&first));

        buffer.resume();
        assert!(buffer.is_settled());
        assert_eq!(buffer.succeed(&first.id), Some(first));
        assert!(!buffer.is_settled());
    }

    #[test]
    fn pop_front_forgets_settled_head() {
        let mut buffer = ActionBuffer::new();
        buffer.push_back(make_action("Mercury"));
        buffer.push_back(make_action("Venus"));
        buffer.settle();
        buffer.fail(failure("disk full"));

        buffer.pop_front();

        assert!(!buffer.is_settled());
        assert_eq!(buffer.current().unwrap().data, json!({ "value": "Venus" }));
    }

    #[test]
    fn pop_front_on_empty_is_none() {
        let mut buffer = ActionBuffer::new();
        assert!(buffer.pop_front().is_none());
    }

    #[test]
    fn clear_is_complete() {
        let mut buffer = ActionBuffer::new();
        buffer.push_back(make_action("Mercury"));
        buffer.fail(failure(":("));
        buffer.clear();

        assert!(buffer.is_empty());
        assert!(buffer.is_complete());
        assert!(!buffer.is_paused());
    }

    #[test]
    fn push_reopens_completed_buffer() {
        let mut buffer = ActionBuffer::new();
        buffer.finish();
        assert!(buffer.is_complete());

        buffer.push_back(make_action("Mercury"));
        assert!(!buffer.is_complete());
    }

    #[test]
    fn serialized_form_drops_ids() {
        let mut buffer = ActionBuffer::new();
        let action = Action::new("_transform", json!(1), json!({ "label": "one" }), None);
        buffer.push_back(action.clone());

        let serialized = buffer.serialize();
        assert_eq!(
            serialized,
            vec![SerializedAction {
                method: "_transform".into(),
                data: json!(1),
                meta: json!({ "label": "one" }),
            }]
        );

        let restored = ActionBuffer::from_serialized(serialized.clone());
        assert_eq!(restored.serialize(), serialized);
        assert_ne!(restored.current().unwrap().id, action.id);
    }

    #[test]
    fn matching_filters_by_data() {
        let mut buffer = ActionBuffer::new();
        buffer.push_back(make_action("Mercury"));
        buffer.push_back(make_action("Venus"));

        let pattern = PatternMatcher::new(json!({ "value": "Venus" }));
        let found = buffer.matching(&pattern);

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].data, json!({ "value": "Venus" }));
    }
}
