use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{RunStatus, Stage, ThreadId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEventKind {
    StageEntered { stage: Stage },
    StepMessage { stage: Stage, message: String },
    PartialResult { stage: Stage, payload: Value },
    Suspended { questions: usize },
    Finished { status: RunStatus },
}

/// Streamed to observers while a turn runs. `sequence` is strictly
/// increasing per thread, across resumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub thread_id: ThreadId,
    pub sequence: u64,
    #[serde(flatten)]
    pub kind: ProgressEventKind,
    pub at: DateTime<Utc>,
}

impl ProgressEvent {
    #[must_use]
    pub fn new(thread_id: ThreadId, sequence: u64, kind: ProgressEventKind) -> Self {
        Self {
            thread_id,
            sequence,
            kind,
            at: Utc::now(),
        }
    }
}
