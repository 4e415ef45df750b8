//! Decision traces: the structured record of every check performed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identity::ApprovalLevel;
use crate::risk::RiskScore;

/// Closed set of check codes a trace can contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckCode {
    ForbiddenBehavior,
    TrustBehavior,
    CompetenceTrust,
    RateLimit,
    Cooldown,
    ProtectedEntity,
    SpendLimit,
    PolicyRule,
    RiskScoring,
    CompositeRisk,
}

/// What a matched check does to the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckEffect {
    Allow,
    Deny,
    Modify,
    Skip,
}

/// One evaluated check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionCheck {
    pub code: CheckCode,
    /// Opaque check-specific data (limits hit, scores, matched patterns).
    pub data: Value,
    pub detail: String,
    pub matched: bool,
    pub effect: CheckEffect,
}

impl DecisionCheck {
    pub fn matched(code: CheckCode, effect: CheckEffect, detail: impl Into<String>, data: Value) -> Self {
        Self {
            code,
            data,
            detail: detail.into(),
            matched: true,
            effect,
        }
    }

    pub fn unmatched(code: CheckCode, detail: impl Into<String>, data: Value) -> Self {
        Self {
            code,
            data,
            detail: detail.into(),
            matched: false,
            effect: CheckEffect::Skip,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalDecision {
    Allow,
    Deny,
    Modify,
}

/// The full, immutable record of one evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTrace {
    pub checks: Vec<DecisionCheck>,
    pub risk_score: RiskScore,
    pub final_decision: FinalDecision,
    pub approval_required: ApprovalLevel,
    pub explanation: String,
    pub evaluated_at: DateTime<Utc>,
}

impl DecisionTrace {
    pub fn is_denied(&self) -> bool {
        self.final_decision == FinalDecision::Deny
    }

    pub fn needs_approval(&self) -> bool {
        !self.is_denied() && self.approval_required > ApprovalLevel::None
    }

    /// First matched deny check, if any.
    pub fn deny_check(&self) -> Option<&DecisionCheck> {
        self.checks
            .iter()
            .find(|c| c.matched && c.effect == CheckEffect::Deny)
    }

    pub fn has_matched(&self, code: CheckCode) -> bool {
        self.checks.iter().any(|c| c.matched && c.code == code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::RiskCategory;
    use serde_json::json;

    fn trace_with(checks: Vec<DecisionCheck>, decision: FinalDecision) -> DecisionTrace {
        DecisionTrace {
            checks,
            risk_score: RiskScore {
                raw: 0.0,
                category: RiskCategory::None,
                factors: vec![],
            },
            final_decision: decision,
            approval_required: ApprovalLevel::None,
            explanation: String::new(),
            evaluated_at: Utc::now(),
        }
    }

    #[test]
    fn check_codes_use_spec_wire_form() {
        assert_eq!(
            serde_json::to_string(&CheckCode::ForbiddenBehavior).unwrap(),
            "\"FORBIDDEN_BEHAVIOR\""
        );
        assert_eq!(
            serde_json::to_string(&CheckCode::RateLimit).unwrap(),
            "\"RATE_LIMIT\""
        );
    }

    #[test]
    fn deny_check_finds_first_matched_deny() {
        let trace = trace_with(
            vec![
                DecisionCheck::unmatched(CheckCode::RateLimit, "under limit", json!({})),
                DecisionCheck::matched(
                    CheckCode::ForbiddenBehavior,
                    CheckEffect::Deny,
                    "matched pattern",
                    json!({}),
                ),
            ],
            FinalDecision::Deny,
        );
        assert!(trace.is_denied());
        assert_eq!(
            trace.deny_check().map(|c| c.code),
            Some(CheckCode::ForbiddenBehavior)
        );
    }

    #[test]
    fn needs_approval_only_when_not_denied() {
        let mut trace = trace_with(vec![], FinalDecision::Allow);
        trace.approval_required = ApprovalLevel::Standard;
        assert!(trace.needs_approval());

        trace.final_decision = FinalDecision::Deny;
        assert!(!trace.needs_approval());
    }
}
