use async_trait::async_trait;
use sqlx::{PgPool, postgres::PgPoolOptions, types::Json};
use tracing::info;

use crate::{
    error::{Result, SwarmError},
    storage::{Checkpoint, CheckpointStorage, ThreadState, ThreadStorage},
};

const CREATE_THREADS: &str = r#"
CREATE TABLE IF NOT EXISTS threads (
    thread_id TEXT PRIMARY KEY,
    record JSONB NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
)"#;

const CREATE_CHAT_LOGS: &str = r#"
CREATE TABLE IF NOT EXISTS chat_logs (
    thread_id TEXT PRIMARY KEY,
    checkpoint JSONB NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
)"#;

/// Thread and checkpoint storage backed by two JSONB tables.
///
/// Writes are plain upserts; concurrent requests on one thread race and the last
/// writer wins.
#[derive(Clone)]
pub struct PostgresSessionStorage {
    pool: PgPool,
}

impl PostgresSessionStorage {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(storage_error)?;
        Self::from_pool(pool).await
    }

    /// Reuse an existing pool and make sure the tables exist.
    pub async fn from_pool(pool: PgPool) -> Result<Self> {
        sqlx::query(CREATE_THREADS)
            .execute(&pool)
            .await
            .map_err(storage_error)?;
        sqlx::query(CREATE_CHAT_LOGS)
            .execute(&pool)
            .await
            .map_err(storage_error)?;
        info!("Session tables ready");
        Ok(Self { pool })
    }
}

/// Connection-level failures are transient; everything else is a storage bug.
pub fn storage_error(e: sqlx::Error) -> SwarmError {
    match e {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => SwarmError::Upstream(e.to_string()),
        other => SwarmError::StorageError(other.to_string()),
    }
}

#[async_trait]
impl ThreadStorage for PostgresSessionStorage {
    async fn save(&self, thread: ThreadState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO threads (thread_id, record, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (thread_id)
            DO UPDATE SET record = EXCLUDED.record, updated_at = now()
            "#,
        )
        .bind(thread.thread_id())
        .bind(Json(&thread))
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(())
    }

    async fn get(&self, thread_id: &str) -> Result<Option<ThreadState>> {
        let record: Option<Json<ThreadState>> =
            sqlx::query_scalar("SELECT record FROM threads WHERE thread_id = $1")
                .bind(thread_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(storage_error)?;
        Ok(record.map(|Json(thread)| thread))
    }
}

#[async_trait]
impl CheckpointStorage for PostgresSessionStorage {
    async fn save(&self, checkpoint: Checkpoint) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO chat_logs (thread_id, checkpoint, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (thread_id)
            DO UPDATE SET checkpoint = EXCLUDED.checkpoint, updated_at = now()
            "#,
        )
        .bind(&checkpoint.thread_id)
        .bind(Json(&checkpoint))
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(())
    }

    async fn get(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        let record: Option<Json<Checkpoint>> =
            sqlx::query_scalar("SELECT checkpoint FROM chat_logs WHERE thread_id = $1")
                .bind(thread_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(storage_error)?;
        Ok(record.map(|Json(checkpoint)| checkpoint))
    }
}
