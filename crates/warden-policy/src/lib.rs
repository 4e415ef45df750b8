//! The policy engine.
//!
//! One call to [`PolicyEngine::evaluate`] runs every check — behavior
//! gates, competence, rate limits, cooldowns, protected entities, spend
//! limits, rule policies, risk scoring, composite risk — and folds them
//! into an immutable [`DecisionTrace`]. The pipeline accumulates: a
//! matched deny never short-circuits the remaining checks, so the trace
//! always shows the complete picture and the final decision is deny iff
//! any matched deny check exists.

mod engine;
mod params;

pub use engine::{EngineInput, EvaluationContext, PolicyEngine, SpendLookup};
pub use params::{entity_candidates, primary_entity_id};
