//! Proposals, plans, and the action envelope.
//!
//! The envelope is the unit of lifecycle: it accumulates decision traces,
//! approval ids, execution results, and audit pointers as the proposal
//! moves through the status graph. Only the transitions in
//! [`EnvelopeStatus::can_transition_to`] are legal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::decision::DecisionTrace;
use crate::execution::ExecuteResult;

/// One atomic intended action.
///
/// `parameters` is an opaque JSON object owned by the cartridge; the
/// runtime stamps the hidden `_principal_id` / `_cartridge_id` fields into
/// it for later stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionProposal {
    pub id: String,
    /// Dotted namespace, e.g. `ads.campaign.pause`.
    pub action_type: String,
    pub parameters: Value,
    pub evidence: Option<String>,
    pub confidence: f64,
    pub source_message_id: Option<String>,
}

impl ActionProposal {
    pub fn new(action_type: impl Into<String>, parameters: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            action_type: action_type.into(),
            parameters,
            evidence: None,
            confidence: 1.0,
            source_message_id: None,
        }
    }

    /// Read a hidden string parameter such as `_principal_id`.
    pub fn hidden_param(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStrategy {
    Atomic,
    BestEffort,
    Sequential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanApprovalMode {
    PerAction,
    PerPlan,
}

/// Optional grouping of proposals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionPlan {
    pub id: String,
    pub strategy: PlanStrategy,
    pub approval_mode: PlanApprovalMode,
}

/// An entity reference resolved to a canonical id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedEntity {
    pub input_ref: String,
    pub entity_type: String,
    pub resolved_id: String,
    pub resolved_name: Option<String>,
    pub confidence: f64,
}

/// Lifecycle state of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeStatus {
    Proposed,
    PendingApproval,
    Approved,
    Executing,
    Executed,
    Failed,
    Denied,
    Expired,
}

impl EnvelopeStatus {
    /// The envelope status graph:
    /// proposed → {denied | pending_approval | approved};
    /// pending_approval → {approved | denied | expired};
    /// approved → executing; executing → {executed | failed}.
    pub fn can_transition_to(self, to: EnvelopeStatus) -> bool {
        use EnvelopeStatus::*;
        matches!(
            (self, to),
            (Proposed, Denied)
                | (Proposed, PendingApproval)
                | (Proposed, Approved)
                | (PendingApproval, Approved)
                | (PendingApproval, Denied)
                | (PendingApproval, Expired)
                | (Approved, Executing)
                | (Executing, Executed)
                | (Executing, Failed)
        )
    }

    /// Terminal states cannot be left.
    pub fn is_terminal(self) -> bool {
        use EnvelopeStatus::*;
        matches!(self, Executed | Failed | Denied | Expired)
    }
}

/// The versioned state object tracking one proposal through its lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionEnvelope {
    pub id: String,
    /// Starts at 1; bumped on any mutation of the proposals. Part of every
    /// binding hash.
    pub version: u32,
    pub original_message: Option<String>,
    pub conversation_id: Option<String>,
    pub proposals: Vec<ActionProposal>,
    #[serde(default)]
    pub resolved_entities: Vec<ResolvedEntity>,
    pub plan: Option<ActionPlan>,
    #[serde(default)]
    pub decision_traces: Vec<DecisionTrace>,
    #[serde(default)]
    pub approval_ids: Vec<String>,
    #[serde(default)]
    pub execution_results: Vec<ExecuteResult>,
    #[serde(default)]
    pub audit_entry_ids: Vec<String>,
    pub status: EnvelopeStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set on undo envelopes, pointing at the envelope being reversed.
    pub parent_envelope_id: Option<String>,
}

impl ActionEnvelope {
    pub fn new(proposals: Vec<ActionProposal>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            version: 1,
            original_message: None,
            conversation_id: None,
            proposals,
            resolved_entities: Vec::new(),
            plan: None,
            decision_traces: Vec::new(),
            approval_ids: Vec::new(),
            execution_results: Vec::new(),
            audit_entry_ids: Vec::new(),
            status: EnvelopeStatus::Proposed,
            created_at: now,
            updated_at: now,
            parent_envelope_id: None,
        }
    }

    /// Mutate the proposal list, bumping the envelope version. Any binding
    /// hash computed against the previous version becomes stale.
    pub fn mutate_proposals(&mut self, f: impl FnOnce(&mut Vec<ActionProposal>)) {
        f(&mut self.proposals);
        self.version += 1;
        self.updated_at = Utc::now();
    }

    pub fn primary_proposal(&self) -> Option<&ActionProposal> {
        self.proposals.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_graph_allows_lifecycle_paths() {
        use EnvelopeStatus::*;
        assert!(Proposed.can_transition_to(PendingApproval));
        assert!(Proposed.can_transition_to(Approved));
        assert!(Proposed.can_transition_to(Denied));
        assert!(PendingApproval.can_transition_to(Approved));
        assert!(PendingApproval.can_transition_to(Expired));
        assert!(Approved.can_transition_to(Executing));
        assert!(Executing.can_transition_to(Executed));
        assert!(Executing.can_transition_to(Failed));
    }

    #[test]
    fn status_graph_rejects_shortcuts() {
        use EnvelopeStatus::*;
        assert!(!Proposed.can_transition_to(Executing));
        assert!(!Proposed.can_transition_to(Executed));
        assert!(!Denied.can_transition_to(Approved));
        assert!(!Executed.can_transition_to(Executing));
        assert!(!Approved.can_transition_to(Denied));
    }

    #[test]
    fn terminal_states() {
        assert!(EnvelopeStatus::Executed.is_terminal());
        assert!(EnvelopeStatus::Denied.is_terminal());
        assert!(!EnvelopeStatus::PendingApproval.is_terminal());
    }

    #[test]
    fn mutating_proposals_bumps_version() {
        let mut envelope = ActionEnvelope::new(vec![ActionProposal::new(
            "ads.campaign.pause",
            json!({"campaign_id": "c1"}),
        )]);
        assert_eq!(envelope.version, 1);
        envelope.mutate_proposals(|proposals| {
            proposals[0].parameters = json!({"campaign_id": "c2"});
        });
        assert_eq!(envelope.version, 2);
    }

    #[test]
    fn hidden_params_are_readable() {
        let proposal = ActionProposal::new(
            "ads.campaign.pause",
            json!({"campaign_id": "c1", "_principal_id": "p1"}),
        );
        assert_eq!(proposal.hidden_param("_principal_id"), Some("p1"));
        assert_eq!(proposal.hidden_param("_cartridge_id"), None);
    }
}
