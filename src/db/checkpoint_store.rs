use crate::error::{CopilotError, Result};
use crate::orchestrator_service::ports::{Checkpoint, CheckpointStore, PortFuture};
use crate::types::{ConversationState, ThreadId};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use tracing::debug;

/// Durable checkpoints in `conversation_checkpoints`, one row per thread,
/// last writer wins.
#[derive(Clone)]
pub struct PgCheckpointStore {
    pool: PgPool,
}

/// Row summary used by `copilot show`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointSummary {
    pub thread_id: ThreadId,
    pub connection_id: String,
    pub status: String,
    pub current_stage: String,
    pub saved_at: DateTime<Utc>,
}

impl PgCheckpointStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn upsert(&self, checkpoint: &Checkpoint) -> Result<()> {
        let state = serde_json::to_value(&checkpoint.state)?;
        sqlx::query(
            "INSERT INTO conversation_checkpoints
                (thread_id, connection_id, format_version, status, current_stage, state, saved_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (thread_id) DO UPDATE SET
                connection_id = EXCLUDED.connection_id,
                format_version = EXCLUDED.format_version,
                status = EXCLUDED.status,
                current_stage = EXCLUDED.current_stage,
                state = EXCLUDED.state,
                saved_at = EXCLUDED.saved_at",
        )
        .bind(checkpoint.thread_id.value())
        .bind(checkpoint.state.connection_id.value())
        .bind(i32::try_from(checkpoint.format_version).unwrap_or(i32::MAX))
        .bind(checkpoint.state.status.to_string())
        .bind(checkpoint.state.current_stage.to_string())
        .bind(state)
        .bind(checkpoint.saved_at)
        .execute(&self.pool)
        .await
        .map_err(|e| CopilotError::CheckpointError(format!("Failed to save checkpoint: {e}")))?;
        debug!(thread_id = %checkpoint.thread_id, "checkpoint row written");
        Ok(())
    }

    async fn fetch(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>> {
        let row: Option<(i32, Value, DateTime<Utc>)> = sqlx::query_as(
            "SELECT format_version, state, saved_at
             FROM conversation_checkpoints
             WHERE thread_id = $1",
        )
        .bind(thread_id.value())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CopilotError::CheckpointError(format!("Failed to load checkpoint: {e}")))?;

        row.map(|(format_version, state, saved_at)| {
            let state: ConversationState = serde_json::from_value(state)?;
            Ok(Checkpoint {
                format_version: u32::try_from(format_version).unwrap_or_default(),
                thread_id: thread_id.clone(),
                state,
                saved_at,
            })
        })
        .transpose()
    }

    /// Most recently saved threads, newest first.
    ///
    /// # Errors
    /// Returns `CheckpointError` when the query fails.
    pub async fn recent(&self, limit: i64) -> Result<Vec<CheckpointSummary>> {
        let rows: Vec<(String, String, String, String, DateTime<Utc>)> = sqlx::query_as(
            "SELECT thread_id, connection_id, status, current_stage, saved_at
             FROM conversation_checkpoints
             ORDER BY saved_at DESC
             LIMIT $1",
        )
        .bind(limit.max(1))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CopilotError::CheckpointError(format!("Failed to list checkpoints: {e}")))?;

        Ok(rows
            .into_iter()
            .map(
                |(thread_id, connection_id, status, current_stage, saved_at)| CheckpointSummary {
                    thread_id: ThreadId::new(thread_id),
                    connection_id,
                    status,
                    current_stage,
                    saved_at,
                },
            )
            .collect())
    }
}

impl CheckpointStore for PgCheckpointStore {
    fn save_checkpoint<'a>(&'a self, checkpoint: &'a Checkpoint) -> PortFuture<'a, ()> {
        Box::pin(self.upsert(checkpoint))
    }

    fn load_checkpoint<'a>(
        &'a self,
        thread_id: &'a ThreadId,
    ) -> PortFuture<'a, Option<Checkpoint>> {
        Box::pin(self.fetch(thread_id))
    }
}
