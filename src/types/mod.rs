mod analysis;
mod clarification;
mod events;
mod execution;
mod identifiers;
mod messages;
mod response;
mod schema;
mod skill;
mod stage;
mod state;

pub use analysis::{
    ChartAlternative, ChartConfig, ChartRecommendation, ChartType, Insight, InsightSource,
};
pub use clarification::{
    ClarificationAnswers, ClarificationQuestion, ClarificationState, ResumeRecord,
};
pub use events::{ProgressEvent, ProgressEventKind};
pub use execution::{ExecutionError, ExecutionOutcome, ExecutionResult, FailureKind};
pub use identifiers::{ConnectionId, ThreadId};
pub use messages::{repair_messages, Message, Role};
pub use response::{FallbackReason, Intent, TurnRequest, TurnResponse, TurnStatus};
pub use schema::{
    Ambiguity, AmbiguityKind, ColumnInfo, ColumnMetadata, Dialect, Relationship, SchemaInfo,
    SchemaMetadata, SemanticType, TableInfo, TableMetadata,
};
pub use skill::{ClarifiedTerm, Skill, SkillContext};
pub use stage::{RunStatus, Stage};
pub use state::{ConversationState, ErrorRecord, FewShotExample};
