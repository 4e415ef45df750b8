//! Approval requests, the state-machine half, and delegation rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::decision::DecisionTrace;
use crate::identity::{ResolvedIdentity, RiskCategory};

/// What happens when a request expires without a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiredBehavior {
    Deny,
    Escalate,
}

/// Everything an approver sees when deciding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalEvidence {
    pub decision_trace: DecisionTrace,
    pub context_snapshot: Value,
    pub identity_snapshot: ResolvedIdentity,
}

/// A pending request for human sign-off on one action.
///
/// `binding_hash` covers {envelope id, envelope version, action id,
/// parameters, decision-trace hash, context-snapshot hash}; a response
/// carrying a different hash is stale and must be rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub action_id: String,
    pub envelope_id: String,
    pub summary: String,
    pub risk_category: RiskCategory,
    pub binding_hash: String,
    pub evidence: ApprovalEvidence,
    #[serde(default)]
    pub suggested_actions: Vec<String>,
    pub approvers: Vec<String>,
    pub fallback_approver: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub expired_behavior: ExpiredBehavior,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Patched,
    Expired,
}

/// The mutable half of an approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalState {
    pub status: ApprovalStatus,
    pub responded_by: Option<String>,
    pub responded_at: Option<DateTime<Utc>>,
    pub patch_value: Option<Value>,
    pub expires_at: DateTime<Utc>,
}

impl ApprovalState {
    pub fn pending(expires_at: DateTime<Utc>) -> Self {
        Self {
            status: ApprovalStatus::Pending,
            responded_by: None,
            responded_at: None,
            patch_value: None,
            expires_at,
        }
    }

    /// True when the request is still pending but its deadline has passed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == ApprovalStatus::Pending && now >= self.expires_at
    }
}

/// What a responder asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalAction {
    Approve,
    Reject,
    Patch,
}

/// Authority to approve, granted from one principal to another.
///
/// `scope` is `"*"`, an exact action type, or a `"prefix.*"` glob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationRule {
    pub id: String,
    pub grantor: String,
    pub grantee: String,
    pub scope: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub max_chain_depth: u32,
}
