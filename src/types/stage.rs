use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    IntentRouting,
    CacheLookup,
    SchemaResolution,
    Clarification,
    SqlGeneration,
    SafetyCheck,
    SqlExecution,
    ErrorRecovery,
    InsightAnalysis,
    ChartRecommendation,
    GeneralChat,
    Completed,
    FailedFallback,
}

impl Stage {
    pub const ALL: [Self; 13] = [
        Self::IntentRouting,
        Self::CacheLookup,
        Self::SchemaResolution,
        Self::Clarification,
        Self::SqlGeneration,
        Self::SafetyCheck,
        Self::SqlExecution,
        Self::ErrorRecovery,
        Self::InsightAnalysis,
        Self::ChartRecommendation,
        Self::GeneralChat,
        Self::Completed,
        Self::FailedFallback,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::IntentRouting => "intent_routing",
            Self::CacheLookup => "cache_lookup",
            Self::SchemaResolution => "schema_resolution",
            Self::Clarification => "clarification",
            Self::SqlGeneration => "sql_generation",
            Self::SafetyCheck => "safety_check",
            Self::SqlExecution => "sql_execution",
            Self::ErrorRecovery => "error_recovery",
            Self::InsightAnalysis => "insight_analysis",
            Self::ChartRecommendation => "chart_recommendation",
            Self::GeneralChat => "general_chat",
            Self::Completed => "completed",
            Self::FailedFallback => "failed_fallback",
        }
    }

    /// Position on the forward path. Loop-backs go to a lower rank.
    #[must_use]
    pub const fn rank(&self) -> u8 {
        match self {
            Self::IntentRouting => 0,
            Self::CacheLookup => 1,
            Self::SchemaResolution => 2,
            Self::Clarification => 3,
            Self::SqlGeneration => 4,
            Self::SafetyCheck => 5,
            Self::SqlExecution => 6,
            Self::ErrorRecovery => 7,
            Self::InsightAnalysis => 8,
            Self::ChartRecommendation => 9,
            Self::GeneralChat => 10,
            Self::Completed | Self::FailedFallback => 11,
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::FailedFallback)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for Stage {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| format!("Unknown stage: {s}"))
    }
}

/// Lifecycle of a conversation run as seen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Suspended,
    Completed,
    Failed,
}

impl RunStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub const fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::{RunStatus, Stage};

    #[test]
    fn stage_string_roundtrip_covers_every_stage() {
        for stage in Stage::ALL {
            assert_eq!(Stage::try_from(stage.as_str()), Ok(stage));
        }
        assert!(Stage::try_from("implement").is_err());
    }

    #[test]
    fn forward_path_ranks_increase() {
        assert!(Stage::IntentRouting.rank() < Stage::SchemaResolution.rank());
        assert!(Stage::SqlGeneration.rank() < Stage::SafetyCheck.rank());
        assert!(Stage::SqlExecution.rank() < Stage::InsightAnalysis.rank());
        assert!(Stage::Completed.is_terminal());
        assert!(!Stage::ErrorRecovery.is_terminal());
    }

    #[test]
    fn run_status_finished_flags() {
        assert!(RunStatus::Completed.is_finished());
        assert!(RunStatus::Failed.is_finished());
        assert!(!RunStatus::Suspended.is_finished());
        assert_eq!(RunStatus::Suspended.to_string(), "suspended");
    }
}
