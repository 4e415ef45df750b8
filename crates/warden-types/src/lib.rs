//! Shared data model for the Warden governance runtime.
//!
//! Every side-effecting operation an agent wants to perform enters the
//! runtime as an [`ActionProposal`] wrapped in an [`ActionEnvelope`]. The
//! envelope tracks the proposal through evaluation, approval, execution,
//! and undo; the types here are the vocabulary every Warden crate shares.
//!
//! Design rules for this crate:
//! - data only — evaluation logic lives in the crates that own it
//! - everything serializes with serde (`snake_case` enum wire forms)
//! - ordered enums ([`RiskCategory`], [`ApprovalLevel`]) derive `Ord` so
//!   "more restrictive" comparisons are plain `>`/`max`

pub mod action;
pub mod approval;
pub mod decision;
pub mod execution;
pub mod guardrail;
pub mod identity;
pub mod pattern;
pub mod risk;

pub use action::{
    ActionEnvelope, ActionPlan, ActionProposal, EnvelopeStatus, PlanApprovalMode, PlanStrategy,
    ResolvedEntity,
};
pub use approval::{
    ApprovalAction, ApprovalEvidence, ApprovalRequest, ApprovalState, ApprovalStatus,
    DelegationRule, ExpiredBehavior,
};
pub use decision::{CheckCode, CheckEffect, DecisionCheck, DecisionTrace, FinalDecision};
pub use execution::{ExecuteResult, UndoRecipe};
pub use guardrail::{CooldownRule, GuardrailScope, Guardrails, ProtectedEntity, RateLimitRule};
pub use identity::{
    ApprovalLevel, CompetenceRecord, GovernanceProfile, IdentitySpec, OverlayActivation,
    OverlayMode, OverlayPatch, Principal, PrincipalType, ResolvedIdentity, RiskCategory,
    RiskTolerance, RoleOverlay, SpendLimits, TimeWindow,
};
pub use pattern::pattern_matches;
pub use risk::{CompositeContext, Exposure, Reversibility, RiskFactor, RiskInput, RiskScore, Sensitivity};
