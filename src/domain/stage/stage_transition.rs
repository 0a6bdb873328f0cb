#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use crate::types::{FallbackReason, Stage};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageTransition {
    Advance(Stage),
    LoopBack(Stage),
    Suspend,
    Complete,
    Fallback(FallbackReason),
}

impl StageTransition {
    #[must_use]
    pub const fn target(&self) -> Option<Stage> {
        match self {
            Self::Advance(stage) | Self::LoopBack(stage) => Some(*stage),
            Self::Suspend | Self::Complete | Self::Fallback(_) => None,
        }
    }

    #[must_use]
    pub const fn is_loop_back(&self) -> bool {
        matches!(self, Self::LoopBack(_))
    }

    #[must_use]
    pub const fn should_suspend(&self) -> bool {
        matches!(self, Self::Suspend)
    }

    #[must_use]
    pub const fn should_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }

    #[must_use]
    pub const fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback(_))
    }
}
