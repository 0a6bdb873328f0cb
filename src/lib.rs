pub mod db;
pub mod diagnostics;
pub mod domain;
pub mod error;
pub mod llm;
pub mod orchestrator_service;
pub mod prompts;
pub mod query_cache;
pub mod retrieval_index;
pub mod retry;
pub mod stage_executors;
pub mod types;

pub use error::{CopilotError, Result};
pub use orchestrator_service::{PipelineSettings, Supervisor};
pub use query_cache::QueryCache;
pub use retrieval_index::RetrievalIndex;
pub use types::*;
