use async_trait::async_trait;
use chrono::{DateTime, Utc};

use warden_rules::Policy;
use warden_types::{
    ActionEnvelope, ApprovalRequest, ApprovalState, CompetenceRecord, DelegationRule,
    EnvelopeStatus, IdentitySpec, Principal, RoleOverlay,
};

use crate::StorageResult;

/// Filter for envelope listings. All set fields must match.
#[derive(Debug, Clone, Default)]
pub struct EnvelopeFilter {
    pub status: Option<EnvelopeStatus>,
    pub conversation_id: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub parent_envelope_id: Option<String>,
    pub limit: Option<usize>,
}

impl EnvelopeFilter {
    pub fn matches(&self, envelope: &ActionEnvelope) -> bool {
        if let Some(status) = self.status {
            if envelope.status != status {
                return false;
            }
        }
        if let Some(ref conversation) = self.conversation_id {
            if envelope.conversation_id.as_ref() != Some(conversation) {
                return false;
            }
        }
        if let Some(after) = self.created_after {
            if envelope.created_at < after {
                return false;
            }
        }
        if let Some(ref parent) = self.parent_envelope_id {
            if envelope.parent_envelope_id.as_ref() != Some(parent) {
                return false;
            }
        }
        true
    }
}

/// Persistence for action envelopes.
#[async_trait]
pub trait EnvelopeStore: Send + Sync {
    /// Insert a new envelope; conflicts on duplicate id.
    async fn save(&self, envelope: ActionEnvelope) -> StorageResult<()>;

    /// Replace an existing envelope.
    async fn update(&self, envelope: ActionEnvelope) -> StorageResult<()>;

    async fn get_by_id(&self, id: &str) -> StorageResult<Option<ActionEnvelope>>;

    /// Newest-first listing.
    async fn list(&self, filter: &EnvelopeFilter) -> StorageResult<Vec<ActionEnvelope>>;
}

/// An approval request together with its mutable state.
#[derive(Debug, Clone)]
pub struct ApprovalRecord {
    pub request: ApprovalRequest,
    pub state: ApprovalState,
    pub envelope_id: String,
}

/// Persistence for approvals.
#[async_trait]
pub trait ApprovalStore: Send + Sync {
    async fn save(&self, record: ApprovalRecord) -> StorageResult<()>;

    async fn get_by_id(&self, id: &str) -> StorageResult<Option<ApprovalRecord>>;

    async fn update_state(&self, id: &str, state: ApprovalState) -> StorageResult<()>;

    async fn list_for_envelope(&self, envelope_id: &str) -> StorageResult<Vec<ApprovalRecord>>;
}

/// Persistence for principals, identity specs, overlays, delegations,
/// and competence records.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn get_spec(&self, principal_id: &str) -> StorageResult<Option<IdentitySpec>>;

    async fn save_spec(&self, spec: IdentitySpec) -> StorageResult<()>;

    /// Overlays targeting a principal's spec, in stored order.
    async fn list_overlays(&self, principal_id: &str) -> StorageResult<Vec<RoleOverlay>>;

    async fn save_overlay(&self, overlay: RoleOverlay) -> StorageResult<()>;

    async fn get_principal(&self, id: &str) -> StorageResult<Option<Principal>>;

    async fn save_principal(&self, principal: Principal) -> StorageResult<()>;

    async fn save_delegation_rule(&self, rule: DelegationRule) -> StorageResult<()>;

    async fn list_delegation_rules(&self) -> StorageResult<Vec<DelegationRule>>;

    async fn get_competence_record(
        &self,
        principal_id: &str,
        action_type: &str,
    ) -> StorageResult<Option<CompetenceRecord>>;

    async fn save_competence_record(&self, record: CompetenceRecord) -> StorageResult<()>;
}

/// Persistence for policies.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Active policies, optionally narrowed to one cartridge (policies
    /// with no cartridge scope always apply), sorted by ascending
    /// priority.
    async fn list_active(&self, cartridge_id: Option<&str>) -> StorageResult<Vec<Policy>>;

    async fn save(&self, policy: Policy) -> StorageResult<()>;
}
