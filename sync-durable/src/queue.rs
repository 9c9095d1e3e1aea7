//! ActionQueue - durable, sequential action processing.
//!
//! An [`ActionQueue`] holds deferred invocations of named methods on an
//! [`ActionTarget`] and runs them one at a time, oldest first. A failing
//! action pauses the queue with the action left as `current` until the caller
//! recovers with [`ActionQueue::retry`], [`ActionQueue::skip`],
//! [`ActionQueue::shift`] or [`ActionQueue::clear`].
//!
//! # Architecture
//!
//! ```text
//! push/unshift ─► ActionBuffer (sync-core) ─► Persister ─► Bucket
//!                        │
//!                   run (driver loop) ─► ActionTarget::perform
//!                        │
//!                   Evented<QueueEvent>
//! ```
//!
//! The pending actions are written to the bucket before a change becomes
//! visible, so a restarted process picks up exactly what was still pending.
//!
//! # Example
//!
//! ```ignore
//! let queue = ActionQueue::open(target, &QueueOptions::default(), bucket).await?;
//! queue.push("_transform", ActionOptions::default().with_data(json!({"op": "add"}))).await?;
//! queue.process().await;
//! assert!(queue.is_complete());
//! ```

use async_trait::async_trait;
use keelsync_core::{Action, ActionBuffer, Event, Evented, PatternMatcher};
use keelsync_types::{ActionError, ActionId, QueueError, SerializedAction};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

use crate::bucket::{Bucket, Persister};
use crate::config::QueueOptions;

/// The object whose methods queued actions invoke.
#[async_trait]
pub trait ActionTarget: Send + Sync {
    /// Invoke `method` with `data`.
    ///
    /// An error pauses the queue on the action that raised it.
    async fn perform(&self, method: &str, data: &Value) -> Result<(), ActionError>;
}

/// Optional parts of a queued action.
#[derive(Debug, Clone, Default)]
pub struct ActionOptions {
    /// Payload passed to the method.
    pub data: Value,
    /// Caller metadata, persisted but never interpreted.
    pub meta: Value,
    /// Explicit identifier; generated when `None`.
    pub id: Option<ActionId>,
}

impl ActionOptions {
    /// Set the payload.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Set the metadata.
    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = meta;
        self
    }

    /// Set the identifier.
    pub fn with_id(mut self, id: impl Into<ActionId>) -> Self {
        self.id = Some(id.into());
        self
    }

    fn into_action(self, method: String) -> Action {
        Action::new(method, self.data, self.meta, self.id)
    }
}

/// Events announced by an [`ActionQueue`].
#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// The action is about to be invoked.
    BeforeAction(Action),
    /// The action succeeded and was removed.
    Action(Action),
    /// The run halted on this action.
    Fail(Action, ActionError),
    /// A run drained the queue, or the queue was cleared.
    Complete,
}

/// Registration keys for [`QueueEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueEventKind {
    /// [`QueueEvent::BeforeAction`]
    BeforeAction,
    /// [`QueueEvent::Action`]
    Action,
    /// [`QueueEvent::Fail`]
    Fail,
    /// [`QueueEvent::Complete`]
    Complete,
}

impl Event for QueueEvent {
    type Kind = QueueEventKind;

    fn kind(&self) -> QueueEventKind {
        match self {
            QueueEvent::BeforeAction(_) => QueueEventKind::BeforeAction,
            QueueEvent::Action(_) => QueueEventKind::Action,
            QueueEvent::Fail(..) => QueueEventKind::Fail,
            QueueEvent::Complete => QueueEventKind::Complete,
        }
    }
}

struct Shared {
    name: String,
    target: Arc<dyn ActionTarget>,
    buffer: Mutex<ActionBuffer>,
    events: Evented<QueueEvent>,
    persister: Option<Persister>,
    auto_process: bool,
    /// Serializes mutate-and-persist sections.
    writer: tokio::sync::Mutex<()>,
    /// `true` while a run owns the queue.
    active: watch::Sender<bool>,
}

/// Durable queue of actions processed strictly one at a time.
///
/// Cloning is cheap; clones share the same queue.
#[derive(Clone)]
pub struct ActionQueue {
    shared: Arc<Shared>,
}

impl ActionQueue {
    /// Create an empty, unpersisted queue.
    pub fn new(target: Arc<dyn ActionTarget>, options: &QueueOptions) -> Self {
        Self::build(target, options, ActionBuffer::new(), None)
    }

    /// Open a queue bound to `bucket`, loading any stored actions.
    ///
    /// Loaded actions get fresh identifiers. With `auto_process` enabled, a
    /// run over them starts in the background.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Bucket`] if the stored value cannot be loaded.
    pub async fn open(
        target: Arc<dyn ActionTarget>,
        options: &QueueOptions,
        bucket: Arc<dyn Bucket>,
    ) -> Result<Self, QueueError> {
        let persister = Persister::new(bucket, options.name.as_str());
        let stored: Option<Vec<SerializedAction>> = persister.load().await?;
        let buffer = ActionBuffer::from_serialized(stored.unwrap_or_default());

        tracing::debug!(queue = %options.name, len = buffer.len(), "reified action queue");
        let queue = Self::build(target, options, buffer, Some(persister));
        queue.kick();
        Ok(queue)
    }

    fn build(
        target: Arc<dyn ActionTarget>,
        options: &QueueOptions,
        buffer: ActionBuffer,
        persister: Option<Persister>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: options.name.clone(),
                target,
                buffer: Mutex::new(buffer),
                events: Evented::new(),
                persister,
                auto_process: options.auto_process,
                writer: tokio::sync::Mutex::new(()),
                active: watch::Sender::new(false),
            }),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// The queue's event registry.
    pub fn events(&self) -> &Evented<QueueEvent> {
        &self.shared.events
    }

    /// Whether pushes start a run automatically.
    pub fn auto_process(&self) -> bool {
        self.shared.auto_process
    }

    /// Number of pending actions.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if no actions are pending.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// The earliest pending action.
    pub fn current(&self) -> Option<Action> {
        self.lock().current().cloned()
    }

    /// Snapshot of every pending action, oldest first.
    pub fn actions(&self) -> Vec<Action> {
        self.lock().actions()
    }

    /// Pending actions whose data matches `pattern`.
    pub fn matching(&self, pattern: &PatternMatcher) -> Vec<Action> {
        self.lock().matching(pattern)
    }

    /// Check if an invocation is in flight.
    pub fn is_processing(&self) -> bool {
        self.lock().is_processing()
    }

    /// Check if the last run drained the queue.
    pub fn is_complete(&self) -> bool {
        self.lock().is_complete()
    }

    /// Check if a run currently owns the queue.
    pub fn is_active(&self) -> bool {
        *self.shared.active.borrow()
    }

    /// The failure the queue is paused on.
    pub fn error(&self) -> Option<ActionError> {
        self.lock().error()
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Append an action and persist the queue.
    ///
    /// Starts a background run when `auto_process` is enabled and the queue
    /// is neither active nor paused. Returns once the write completes, not
    /// once the action has run.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Bucket`] if the write fails; the queue is left
    /// unchanged.
    pub async fn push(&self, method: impl Into<String>, options: ActionOptions) -> Result<Action, QueueError> {
        let action = options.into_action(method.into());
        let queued = action.clone();
        self.mutate(move |buffer| buffer.push_back(queued.clone()))
            .await?;

        self.kick();
        Ok(action)
    }

    /// Insert an action at the head so it runs next, and persist the queue.
    ///
    /// # Errors
    ///
    /// [`QueueError::Active`] during a run, [`QueueError::Paused`] while a
    /// failed action is current, [`QueueError::Bucket`] if the write fails.
    pub async fn unshift(&self, method: impl Into<String>, options: ActionOptions) -> Result<Action, QueueError> {
        self.claim()?;
        let paused = self.lock().is_paused();
        if paused {
            self.release();
            return Err(QueueError::Paused);
        }

        let action = options.into_action(method.into());
        let queued = action.clone();
        if let Err(e) = self
            .mutate(move |buffer| buffer.push_front(queued.clone()))
            .await
        {
            self.release();
            return Err(e);
        }

        if self.shared.auto_process {
            self.spawn_run();
        } else {
            self.release();
        }
        Ok(action)
    }

    /// Run pending actions until the queue drains or an action fails.
    ///
    /// If a run is already active, waits for it to halt instead. A paused
    /// queue is left paused. Action failures are reported through
    /// [`ActionQueue::error`] and [`QueueEvent::Fail`], never returned.
    ///
    /// The run itself happens on a background task; dropping this future
    /// stops the wait, not the run.
    pub async fn process(&self) {
        if self.try_claim() {
            self.spawn_run();
        }
        self.wait_inactive().await;
    }

    /// Invoke the failed action again and continue the run.
    ///
    /// An action that already ran but whose removal failed to persist is not
    /// invoked again; only the removal is retried.
    ///
    /// # Errors
    ///
    /// [`QueueError::Active`] during a run, [`QueueError::NotPaused`] if no
    /// action has failed.
    pub async fn retry(&self) -> Result<(), QueueError> {
        self.claim()?;
        {
            let mut buffer = self.lock();
            if !buffer.is_paused() {
                drop(buffer);
                self.release();
                return Err(QueueError::NotPaused);
            }
            buffer.resume();
        }

        self.spawn_run();
        self.wait_inactive().await;
        Ok(())
    }

    /// Drop the failed action without invoking it and continue the run.
    ///
    /// # Errors
    ///
    /// [`QueueError::Active`] during a run, [`QueueError::NotPaused`] if no
    /// action has failed, [`QueueError::Bucket`] if the write fails.
    pub async fn skip(&self) -> Result<(), QueueError> {
        self.claim()?;
        let paused = self.lock().is_paused();
        if !paused {
            self.release();
            return Err(QueueError::NotPaused);
        }

        if let Err(e) = self
            .mutate(|buffer| {
                buffer.pop_front();
            })
            .await
        {
            self.release();
            return Err(e);
        }

        self.spawn_run();
        self.wait_inactive().await;
        Ok(())
    }

    /// Remove and return the current action without invoking it.
    ///
    /// Clears any recorded failure. Does not start a run.
    ///
    /// # Errors
    ///
    /// [`QueueError::Active`] during a run, [`QueueError::Bucket`] if the
    /// write fails.
    pub async fn shift(&self) -> Result<Option<Action>, QueueError> {
        self.claim()?;
        let shifted = self.mutate(|buffer| buffer.pop_front()).await;
        self.release();
        shifted
    }

    /// Remove every action and emit [`QueueEvent::Complete`].
    ///
    /// # Errors
    ///
    /// [`QueueError::Active`] during a run, [`QueueError::Bucket`] if the
    /// write fails.
    pub async fn clear(&self) -> Result<(), QueueError> {
        self.claim()?;
        let cleared = self.mutate(|buffer| buffer.clear()).await;
        self.release();
        cleared?;

        self.shared.events.emit(&QueueEvent::Complete);
        Ok(())
    }

    // =========================================================================
    // Run
    // =========================================================================

    /// Driver loop. Must be entered holding the run claim; releases it on exit.
    async fn run(&self) {
        tracing::debug!(queue = %self.shared.name, "run started");
        let mut announced = false;

        loop {
            let (action, settled) = {
                let mut buffer = self.lock();
                if buffer.is_paused() {
                    self.release();
                    break;
                }
                let current = buffer.current().cloned();
                match current {
                    Some(action) => (action, buffer.is_settled()),
                    None if announced => {
                        // Under the buffer lock: a concurrent push lands either
                        // before this check or after the release.
                        self.release();
                        break;
                    }
                    None => {
                        buffer.finish();
                        drop(buffer);
                        announced = true;
                        self.shared.events.emit(&QueueEvent::Complete);
                        continue;
                    }
                }
            };

            let outcome = if settled {
                Ok(())
            } else {
                self.shared
                    .events
                    .emit(&QueueEvent::BeforeAction(action.clone()));
                self.lock().begin();

                self.shared
                    .target
                    .perform(&action.method, &action.data)
                    .await
            };

            let error = match outcome {
                Ok(()) => {
                    let id = action.id.clone();
                    match self.mutate(move |buffer| buffer.succeed(&id)).await {
                        Ok(_) => {
                            announced = false;
                            self.shared.events.emit(&QueueEvent::Action(action));
                            continue;
                        }
                        Err(e) => {
                            tracing::error!(queue = %self.shared.name, method = %action.method, "failed to persist completed action: {}", e);
                            let error: ActionError = Arc::new(e);
                            let mut buffer = self.lock();
                            buffer.settle();
                            buffer.fail(Arc::clone(&error));
                            error
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(queue = %self.shared.name, method = %action.method, "action failed: {}", e);
                    self.lock().fail(Arc::clone(&e));
                    e
                }
            };

            self.shared.events.emit(&QueueEvent::Fail(action, error));
            self.release();
            break;
        }

        tracing::debug!(queue = %self.shared.name, "run halted");
    }

    /// Start a background run if `auto_process` allows it.
    fn kick(&self) {
        if !self.shared.auto_process || self.lock().is_paused() {
            return;
        }
        if self.try_claim() {
            self.spawn_run();
        }
    }

    /// Hand the run claim to a background task.
    fn spawn_run(&self) {
        let queue = self.clone();
        tokio::spawn(async move {
            queue.run().await;
        });
    }

    // =========================================================================
    // Internal helpers
    // =========================================================================

    /// Apply `change`, persisting the resulting actions before the change
    /// becomes visible.
    ///
    /// `change` runs twice (once on a copy to persist, once on the live
    /// buffer) and must touch the action list the same way both times.
    async fn mutate<F, R>(&self, change: F) -> Result<R, QueueError>
    where
        F: Fn(&mut ActionBuffer) -> R,
    {
        let _writer = self.shared.writer.lock().await;

        if let Some(persister) = &self.shared.persister {
            let mut next = self.lock().clone();
            change(&mut next);
            persister.save(&next.serialize()).await?;
        }

        let mut buffer = self.lock();
        Ok(change(&mut buffer))
    }

    fn try_claim(&self) -> bool {
        self.shared.active.send_if_modified(|active| {
            if *active {
                false
            } else {
                *active = true;
                true
            }
        })
    }

    fn claim(&self) -> Result<(), QueueError> {
        if self.try_claim() {
            Ok(())
        } else {
            Err(QueueError::Active)
        }
    }

    fn release(&self) {
        self.shared.active.send_replace(false);
    }

    async fn wait_inactive(&self) {
        let mut active = self.shared.active.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = active.wait_for(|active| !*active).await;
    }

    fn lock(&self) -> MutexGuard<'_, ActionBuffer> {
        self.shared
            .buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ActionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let buffer = self.lock();
        f.debug_struct("ActionQueue")
            .field("name", &self.shared.name)
            .field("len", &buffer.len())
            .field("processing", &buffer.is_processing())
            .field("complete", &buffer.is_complete())
            .field("paused", &buffer.is_paused())
            .field("active", &self.is_active())
            .finish()
    }
}
