//! # sync-core
//!
//! Pure logic for keelsync (no I/O, instant tests).
//!
//! This crate implements the in-memory halves of the keelsync primitives
//! without any disk or bucket I/O, enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! Modules here take input and produce output without touching storage:
//! - [`evented`] - listener registry with fan-out and in-series dispatch
//! - [`entries`] - transform log sequence and relative-position math
//! - [`buffer`] - pending actions and queue status bookkeeping
//! - [`pattern`] - structural matching over JSON payloads
//!
//! The persistence and the processing loop live in `sync-durable`, which
//! wraps these types behind locks and a bucket.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod entries;
pub mod evented;
pub mod pattern;

pub use buffer::{Action, ActionBuffer};
pub use entries::LogEntries;
pub use evented::{
    listener, sync_listener, Binding, Event, Evented, Listener, ListenerFuture, ListenerResult,
};
pub use pattern::PatternMatcher;
