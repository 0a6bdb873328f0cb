#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

mod stage_transition;
mod step_outcome;
mod transition_decision;

pub use stage_transition::StageTransition;
pub use step_outcome::StepOutcome;
pub use transition_decision::{route, RouteContext, TransitionDecision, TransitionReason};

#[cfg(test)]
mod tests;
