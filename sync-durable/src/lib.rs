//! # sync-durable
//!
//! Durable keelsync primitives that applications embed.
//!
//! ## Features
//!
//! - **Action Queue**: sequential processing with pause-on-failure recovery
//! - **Transform Log**: ordered record of applied transforms with range queries
//! - **Bucket Abstraction**: pluggable key-value persistence (memory, SQLite)
//! - **Events**: every structure announces its changes through `Evented`
//!
//! ## Example
//!
//! ```ignore
//! use keelsync_durable::{ActionQueue, ActionOptions, Config, SqliteBucket, TransformLog};
//!
//! let config = Config::from_file(Path::new("keelsync.toml"))?;
//! let bucket = Arc::new(SqliteBucket::new(&config.storage.database).await?);
//!
//! let log = TransformLog::open(&config.log, bucket.clone(), Vec::new()).await?;
//! let queue = ActionQueue::open(target, &config.queue, bucket).await?;
//!
//! queue.push("_transform", ActionOptions::default().with_data(transform)).await?;
//! queue.process().await;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bucket;
pub mod config;
pub mod log;
pub mod queue;

pub use bucket::{Bucket, MemoryBucket, SqliteBucket};
pub use config::{Config, ConfigError, LogOptions, QueueOptions, StorageConfig};
pub use log::{LogEvent, LogEventKind, TransformLog};
pub use queue::{ActionOptions, ActionQueue, ActionTarget, QueueEvent, QueueEventKind};

pub use keelsync_core::{
    listener, sync_listener, Action, Binding, Event, Evented, Listener, PatternMatcher,
};
pub use keelsync_types::{
    ActionError, ActionId, BucketError, ListenerError, LogError, QueueError, SerializedAction,
    TransformId,
};
