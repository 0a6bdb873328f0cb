#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use crate::types::{FallbackReason, Intent, Stage};
use serde::{Deserialize, Serialize};

/// What a worker reports back after running its stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepOutcome {
    IntentClassified(Intent),
    CacheHit,
    CacheMiss,
    SchemaResolved { ambiguous: bool },
    ClarificationRequested,
    ClarificationResolved { resume_stage: Stage },
    SqlGenerated,
    GenerationNeedsClarification,
    GenerationFailed,
    SafetyPassed,
    SafetyRejected,
    ExecutionSucceeded,
    ExecutionFailed,
    RecoveryRegenerate,
    RecoveryEscalate(FallbackReason),
    InsightReady,
    ChartReady,
    ChatAnswered,
    Failed(FallbackReason),
}

impl StepOutcome {
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::IntentClassified(_) => "intent_classified",
            Self::CacheHit => "cache_hit",
            Self::CacheMiss => "cache_miss",
            Self::SchemaResolved { .. } => "schema_resolved",
            Self::ClarificationRequested => "clarification_requested",
            Self::ClarificationResolved { .. } => "clarification_resolved",
            Self::SqlGenerated => "sql_generated",
            Self::GenerationNeedsClarification => "generation_needs_clarification",
            Self::GenerationFailed => "generation_failed",
            Self::SafetyPassed => "safety_passed",
            Self::SafetyRejected => "safety_rejected",
            Self::ExecutionSucceeded => "execution_succeeded",
            Self::ExecutionFailed => "execution_failed",
            Self::RecoveryRegenerate => "recovery_regenerate",
            Self::RecoveryEscalate(_) => "recovery_escalate",
            Self::InsightReady => "insight_ready",
            Self::ChartReady => "chart_ready",
            Self::ChatAnswered => "chat_answered",
            Self::Failed(_) => "failed",
        }
    }
}
