use super::ports::{Checkpoint, CheckpointStore, PortFuture};
use crate::error::{CopilotError, Result};
use crate::types::{repair_messages, ConversationState, ThreadId};
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, warn};

pub const CHECKPOINT_FORMAT_VERSION: u32 = 1;

#[must_use]
pub fn envelope(state: &ConversationState) -> Checkpoint {
    Checkpoint {
        format_version: CHECKPOINT_FORMAT_VERSION,
        thread_id: state.thread_id.clone(),
        state: state.clone(),
        saved_at: Utc::now(),
    }
}

/// Persists the state at a stage boundary.
///
/// # Errors
/// Returns the store's error when the snapshot cannot be written.
pub async fn save_state<S>(store: &S, state: &ConversationState) -> Result<()>
where
    S: CheckpointStore + Sync + ?Sized,
{
    let checkpoint = envelope(state);
    store.save_checkpoint(&checkpoint).await?;
    debug!(
        thread_id = %state.thread_id,
        stage = %state.current_stage,
        status = %state.status,
        "Checkpoint saved"
    );
    Ok(())
}

/// Loads, validates and repairs the latest snapshot of a thread.
///
/// # Errors
/// Returns `CopilotError::CheckpointError` on an unknown format version or a
/// snapshot filed under the wrong thread.
pub async fn load_state<S>(store: &S, thread_id: &ThreadId) -> Result<Option<ConversationState>>
where
    S: CheckpointStore + Sync + ?Sized,
{
    let Some(checkpoint) = store.load_checkpoint(thread_id).await? else {
        return Ok(None);
    };

    if checkpoint.format_version != CHECKPOINT_FORMAT_VERSION {
        return Err(CopilotError::CheckpointError(format!(
            "Unsupported checkpoint format version {} for thread {thread_id}",
            checkpoint.format_version
        )));
    }
    if &checkpoint.thread_id != thread_id || &checkpoint.state.thread_id != thread_id {
        return Err(CopilotError::CheckpointError(format!(
            "Checkpoint stored under {thread_id} belongs to another thread"
        )));
    }

    let mut state = checkpoint.state;
    let (messages, dropped) = repair_messages(std::mem::take(&mut state.messages));
    if dropped > 0 {
        warn!(thread_id = %thread_id, dropped, "Repaired replayed transcript entries");
    }
    state.messages = messages;
    Ok(Some(state))
}

/// Process-local store. Snapshots are kept serialized so a load never
/// shares memory with the running state.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    snapshots: RwLock<HashMap<ThreadId, String>>,
}

impl InMemoryCheckpointStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.snapshots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.snapshots.read().await.is_empty()
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn save_checkpoint<'a>(&'a self, checkpoint: &'a Checkpoint) -> PortFuture<'a, ()> {
        Box::pin(async move {
            let encoded = serde_json::to_string(checkpoint)?;
            self.snapshots
                .write()
                .await
                .insert(checkpoint.thread_id.clone(), encoded);
            Ok(())
        })
    }

    fn load_checkpoint<'a>(
        &'a self,
        thread_id: &'a ThreadId,
    ) -> PortFuture<'a, Option<Checkpoint>> {
        Box::pin(async move {
            let snapshots = self.snapshots.read().await;
            snapshots
                .get(thread_id)
                .map(|encoded| serde_json::from_str(encoded).map_err(CopilotError::from))
                .transpose()
        })
    }
}
