//! Context assembly - budget-bounded prompt building for agent turns.

mod composer;
mod plan;

pub use composer::{
    compose_context, estimate_tokens, ComposeOutcome, ComposeRequest, ContextCandidate,
};
pub use plan::{resolve_context_plan, ContextPlan, ContextPlanRequest, ContextProfile, QuotaMode};
