//! Event registry for keelsync.
//!
//! [`Evented`] is embedded by any type that announces events (the action
//! queue and the transform log). Each event type is an enum with one variant
//! per event name; the variant discriminant ([`Event::Kind`]) keys the
//! registrations.
//!
//! Three notification disciplines are offered:
//! - [`Evented::emit`] - synchronous, best-effort fan-out
//! - [`Evented::settle_in_series`] - one listener at a time, failures tolerated
//! - [`Evented::fulfill_in_series`] - one listener at a time, first failure aborts
//!
//! Every listener returns a deferred result ([`ListenerFuture`]), even when
//! it has nothing asynchronous to do.
//!
//! ```text
//! emit ──────────► L1 ─► L2 ─► L3        (errors logged, all run)
//! settle ────────► L1 ⇢ L2 ⇢ L3 ⇢ ()     (each awaited, errors swallowed)
//! fulfill ───────► L1 ⇢ L2 ✗             (L3 never runs, error returned)
//! ```

use futures_util::future::{self, BoxFuture};
use futures_util::FutureExt;
use keelsync_types::ListenerError;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// An event payload with a fixed kind per variant.
pub trait Event: Clone + Send + Sync + 'static {
    /// Discriminant used to register listeners.
    type Kind: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    /// The kind of this event.
    fn kind(&self) -> Self::Kind;
}

/// Outcome of a single listener invocation.
pub type ListenerResult = Result<(), ListenerError>;

/// Deferred outcome returned by every listener.
pub type ListenerFuture = BoxFuture<'static, ListenerResult>;

/// Call context supplied at registration and handed back on every invocation.
pub type Binding = Arc<dyn Any + Send + Sync>;

/// A registered callback.
pub type Listener<E> = Arc<dyn Fn(&E, Option<&Binding>) -> ListenerFuture + Send + Sync>;

/// Wrap an async closure as a [`Listener`].
pub fn listener<E, F, Fut>(f: F) -> Listener<E>
where
    E: Event,
    F: Fn(&E, Option<&Binding>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ListenerResult> + Send + 'static,
{
    Arc::new(move |event: &E, binding: Option<&Binding>| f(event, binding).boxed())
}

/// Wrap a closure that finishes immediately as a [`Listener`].
pub fn sync_listener<E, F>(f: F) -> Listener<E>
where
    E: Event,
    F: Fn(&E, Option<&Binding>) -> ListenerResult + Send + Sync + 'static,
{
    Arc::new(move |event: &E, binding: Option<&Binding>| future::ready(f(event, binding)).boxed())
}

struct Registration<E: Event> {
    listener: Listener<E>,
    binding: Option<Binding>,
    once: bool,
}

impl<E: Event> Clone for Registration<E> {
    fn clone(&self) -> Self {
        Self {
            listener: Arc::clone(&self.listener),
            binding: self.binding.clone(),
            once: self.once,
        }
    }
}

/// Listener registry with ordered, per-kind registrations.
pub struct Evented<E: Event> {
    registry: Mutex<HashMap<E::Kind, Vec<Registration<E>>>>,
}

impl<E: Event> Evented<E> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(HashMap::new()),
        }
    }

    /// Register a persistent listener for `kind`.
    pub fn on(&self, kind: E::Kind, listener: Listener<E>, binding: Option<Binding>) {
        self.register(kind, listener, binding, false);
    }

    /// Register a listener that is detached by the first `emit` reaching it.
    pub fn one(&self, kind: E::Kind, listener: Listener<E>, binding: Option<Binding>) {
        self.register(kind, listener, binding, true);
    }

    /// Remove `listener` from `kind`, or every listener of `kind` when `None`.
    ///
    /// Unknown kinds and listeners are ignored.
    pub fn off(&self, kind: E::Kind, listener: Option<&Listener<E>>) {
        let mut registry = self.lock();
        match listener {
            Some(listener) => {
                if let Some(list) = registry.get_mut(&kind) {
                    list.retain(|r| !same_listener(&r.listener, listener));
                    if list.is_empty() {
                        registry.remove(&kind);
                    }
                }
            }
            None => {
                registry.remove(&kind);
            }
        }
    }

    /// Snapshot of the listeners (with bindings) registered for `kind`.
    pub fn listeners(&self, kind: E::Kind) -> Vec<(Listener<E>, Option<Binding>)> {
        self.lock()
            .get(&kind)
            .map(|list| {
                list.iter()
                    .map(|r| (Arc::clone(&r.listener), r.binding.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Notify every listener of `event`'s kind, in registration order.
    ///
    /// Listener failures and panics are logged and never stop the fan-out.
    /// A listener whose deferred result is still pending after one poll is
    /// left to finish on the current Tokio runtime; without a runtime it is
    /// dropped.
    pub fn emit(&self, event: &E) {
        let kind = event.kind();
        let registrations = {
            let mut registry = self.lock();
            let Some(list) = registry.get_mut(&kind) else {
                return;
            };
            let snapshot = list.clone();
            list.retain(|r| !r.once);
            if list.is_empty() {
                registry.remove(&kind);
            }
            snapshot
        };

        for registration in registrations {
            let called = std::panic::catch_unwind(AssertUnwindSafe(|| {
                (registration.listener)(event, registration.binding.as_ref())
            }));
            let mut pending = match called {
                Ok(pending) => pending,
                Err(_) => {
                    tracing::warn!(?kind, "listener panicked during emit");
                    continue;
                }
            };

            match AssertUnwindSafe(&mut pending).catch_unwind().now_or_never() {
                Some(Ok(Ok(()))) => {}
                Some(Ok(Err(e))) => tracing::warn!(?kind, "listener failed: {}", e),
                Some(Err(_)) => tracing::warn!(?kind, "listener panicked during emit"),
                None => match tokio::runtime::Handle::try_current() {
                    Ok(handle) => {
                        handle.spawn(async move {
                            if let Err(e) = pending.await {
                                tracing::warn!(?kind, "listener failed: {}", e);
                            }
                        });
                    }
                    Err(_) => {
                        tracing::debug!(?kind, "no runtime, dropping pending listener result");
                    }
                },
            }
        }
    }

    /// Invoke listeners one at a time, awaiting each before the next.
    ///
    /// Failures are swallowed; resolves once every listener has settled.
    pub async fn settle_in_series(&self, event: &E) {
        let kind = event.kind();
        for registration in self.snapshot(kind) {
            if let Err(e) = invoke(&registration, event).await {
                tracing::debug!(?kind, "listener settled with error: {}", e);
            }
        }
    }

    /// Invoke listeners one at a time, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first listener error; later listeners are not invoked.
    pub async fn fulfill_in_series(&self, event: &E) -> ListenerResult {
        for registration in self.snapshot(event.kind()) {
            invoke(&registration, event).await?;
        }
        Ok(())
    }

    fn register(&self, kind: E::Kind, listener: Listener<E>, binding: Option<Binding>, once: bool) {
        self.lock().entry(kind).or_default().push(Registration {
            listener,
            binding,
            once,
        });
    }

    fn snapshot(&self, kind: E::Kind) -> Vec<Registration<E>> {
        self.lock().get(&kind).cloned().unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<E::Kind, Vec<Registration<E>>>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<E: Event> Default for Evented<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Event> fmt::Debug for Evented<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.lock();
        let counts: HashMap<_, _> = registry.iter().map(|(k, v)| (*k, v.len())).collect();
        f.debug_struct("Evented").field("listeners", &counts).finish()
    }
}

fn same_listener<E>(a: &Listener<E>, b: &Listener<E>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

async fn invoke<E: Event>(registration: &Registration<E>, event: &E) -> ListenerResult {
    let pending = std::panic::catch_unwind(AssertUnwindSafe(|| {
        (registration.listener)(event, registration.binding.as_ref())
    }))
    .map_err(|_| ListenerError::from("listener panicked"))?;

    match AssertUnwindSafe(pending).catch_unwind().await {
        Ok(result) => result,
        Err(_) => Err(ListenerError::from("listener panicked")),
    }
}
