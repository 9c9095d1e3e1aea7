//! # sync-types
//!
//! Foundational types shared by all keelsync crates:
//! - [`TransformId`], [`ActionId`] - Identity types
//! - [`SerializedAction`] - Persisted form of a queued action
//! - [`LogError`], [`QueueError`], [`BucketError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod ids;
mod records;

pub use error::{ActionError, BucketError, ListenerError, LogError, QueueError};
pub use ids::{ActionId, TransformId};
pub use records::SerializedAction;
