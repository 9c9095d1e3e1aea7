//! SQLite bucket backend.

use super::Bucket;
use async_trait::async_trait;
use keelsync_types::BucketError;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// SQLite-based bucket.
///
/// Each key maps to one row holding the JSON text of its value. Uses WAL
/// mode for concurrent reads/writes.
#[derive(Clone)]
pub struct SqliteBucket {
    pool: SqlitePool,
}

impl SqliteBucket {
    /// Open a bucket stored in the database file at `path`.
    ///
    /// Creates the database file if it doesn't exist.
    pub async fn new(path: &Path) -> Result<Self, BucketError> {
        let path = path
            .to_str()
            .ok_or_else(|| BucketError::Backend(format!("non UTF-8 path: {}", path.display())))?;
        let options = SqliteConnectOptions::from_str(path)
            .map_err(backend)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(backend)?;

        let bucket = Self { pool };
        bucket.run_migrations().await?;
        tracing::debug!(path, "opened sqlite bucket");
        Ok(bucket)
    }

    /// Create an in-memory SQLite bucket (for testing).
    pub async fn in_memory() -> Result<Self, BucketError> {
        let options = SqliteConnectOptions::from_str(":memory:").map_err(backend)?;

        // A single connection: every `:memory:` connection is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(backend)?;

        let bucket = Self { pool };
        bucket.run_migrations().await?;
        Ok(bucket)
    }

    async fn run_migrations(&self) -> Result<(), BucketError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS items (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }
}

#[async_trait]
impl Bucket for SqliteBucket {
    async fn get_item(&self, key: &str) -> Result<Option<Value>, BucketError> {
        let text: Option<String> = sqlx::query_scalar("SELECT value FROM items WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        match text {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    async fn set_item(&self, key: &str, value: Value) -> Result<(), BucketError> {
        let text = serde_json::to_string(&value)?;

        sqlx::query(
            r#"
            INSERT INTO items (key, value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = strftime('%s', 'now')
            "#,
        )
        .bind(key)
        .bind(text)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }
}

fn backend(err: sqlx::Error) -> BucketError {
    BucketError::Backend(err.to_string())
}
