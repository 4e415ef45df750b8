//! In-memory reference implementations.
//!
//! Deterministic and test-friendly. Production deployments should use a
//! transactional backend for source-of-truth data.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use warden_rules::Policy;
use warden_types::{
    ActionEnvelope, ApprovalState, CompetenceRecord, DelegationRule, IdentitySpec, Principal,
    RoleOverlay,
};

use crate::traits::{
    ApprovalRecord, ApprovalStore, EnvelopeFilter, EnvelopeStore, IdentityStore, PolicyStore,
};
use crate::{StorageError, StorageResult};

#[derive(Default)]
pub struct MemoryEnvelopeStore {
    envelopes: RwLock<HashMap<String, ActionEnvelope>>,
}

impl MemoryEnvelopeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EnvelopeStore for MemoryEnvelopeStore {
    async fn save(&self, envelope: ActionEnvelope) -> StorageResult<()> {
        let mut guard = self.envelopes.write();
        if guard.contains_key(&envelope.id) {
            return Err(StorageError::Conflict(format!(
                "envelope {} already exists",
                envelope.id
            )));
        }
        guard.insert(envelope.id.clone(), envelope);
        Ok(())
    }

    async fn update(&self, envelope: ActionEnvelope) -> StorageResult<()> {
        let mut guard = self.envelopes.write();
        if !guard.contains_key(&envelope.id) {
            return Err(StorageError::NotFound(format!(
                "envelope {} not found",
                envelope.id
            )));
        }
        guard.insert(envelope.id.clone(), envelope);
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> StorageResult<Option<ActionEnvelope>> {
        Ok(self.envelopes.read().get(id).cloned())
    }

    async fn list(&self, filter: &EnvelopeFilter) -> StorageResult<Vec<ActionEnvelope>> {
        let guard = self.envelopes.read();
        let mut matching: Vec<ActionEnvelope> =
            guard.values().filter(|e| filter.matches(e)).cloned().collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            matching.truncate(limit);
        }
        Ok(matching)
    }
}

#[derive(Default)]
pub struct MemoryApprovalStore {
    approvals: RwLock<HashMap<String, ApprovalRecord>>,
}

impl MemoryApprovalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApprovalStore for MemoryApprovalStore {
    async fn save(&self, record: ApprovalRecord) -> StorageResult<()> {
        let mut guard = self.approvals.write();
        let id = record.request.id.clone();
        if guard.contains_key(&id) {
            return Err(StorageError::Conflict(format!("approval {id} already exists")));
        }
        guard.insert(id, record);
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> StorageResult<Option<ApprovalRecord>> {
        Ok(self.approvals.read().get(id).cloned())
    }

    async fn update_state(&self, id: &str, state: ApprovalState) -> StorageResult<()> {
        let mut guard = self.approvals.write();
        let record = guard
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(format!("approval {id} not found")))?;
        record.state = state;
        Ok(())
    }

    async fn list_for_envelope(&self, envelope_id: &str) -> StorageResult<Vec<ApprovalRecord>> {
        Ok(self
            .approvals
            .read()
            .values()
            .filter(|r| r.envelope_id == envelope_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryIdentityStore {
    specs: RwLock<HashMap<String, IdentitySpec>>,
    overlays: RwLock<Vec<RoleOverlay>>,
    principals: RwLock<HashMap<String, Principal>>,
    delegations: RwLock<Vec<DelegationRule>>,
    competence: RwLock<HashMap<(String, String), CompetenceRecord>>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn get_spec(&self, principal_id: &str) -> StorageResult<Option<IdentitySpec>> {
        Ok(self.specs.read().get(principal_id).cloned())
    }

    async fn save_spec(&self, spec: IdentitySpec) -> StorageResult<()> {
        self.specs.write().insert(spec.principal_id.clone(), spec);
        Ok(())
    }

    async fn list_overlays(&self, principal_id: &str) -> StorageResult<Vec<RoleOverlay>> {
        Ok(self
            .overlays
            .read()
            .iter()
            .filter(|o| o.spec_id == principal_id)
            .cloned()
            .collect())
    }

    async fn save_overlay(&self, overlay: RoleOverlay) -> StorageResult<()> {
        let mut guard = self.overlays.write();
        if let Some(existing) = guard.iter_mut().find(|o| o.id == overlay.id) {
            *existing = overlay;
        } else {
            guard.push(overlay);
        }
        Ok(())
    }

    async fn get_principal(&self, id: &str) -> StorageResult<Option<Principal>> {
        Ok(self.principals.read().get(id).cloned())
    }

    async fn save_principal(&self, principal: Principal) -> StorageResult<()> {
        self.principals
            .write()
            .insert(principal.id.clone(), principal);
        Ok(())
    }

    async fn save_delegation_rule(&self, rule: DelegationRule) -> StorageResult<()> {
        let mut guard = self.delegations.write();
        if let Some(existing) = guard.iter_mut().find(|r| r.id == rule.id) {
            *existing = rule;
        } else {
            guard.push(rule);
        }
        Ok(())
    }

    async fn list_delegation_rules(&self) -> StorageResult<Vec<DelegationRule>> {
        Ok(self.delegations.read().clone())
    }

    async fn get_competence_record(
        &self,
        principal_id: &str,
        action_type: &str,
    ) -> StorageResult<Option<CompetenceRecord>> {
        Ok(self
            .competence
            .read()
            .get(&(principal_id.to_string(), action_type.to_string()))
            .cloned())
    }

    async fn save_competence_record(&self, record: CompetenceRecord) -> StorageResult<()> {
        self.competence.write().insert(
            (record.principal_id.clone(), record.action_type.clone()),
            record,
        );
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryPolicyStore {
    policies: RwLock<Vec<Policy>>,
}

impl MemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PolicyStore for MemoryPolicyStore {
    async fn list_active(&self, cartridge_id: Option<&str>) -> StorageResult<Vec<Policy>> {
        let guard = self.policies.read();
        let mut active: Vec<Policy> = guard
            .iter()
            .filter(|p| p.active)
            .filter(|p| match (&p.cartridge_id, cartridge_id) {
                (Some(scope), Some(wanted)) => scope == wanted,
                (Some(_), None) => false,
                (None, _) => true,
            })
            .cloned()
            .collect();
        // Stable sort keeps listing order for equal priorities.
        active.sort_by_key(|p| p.priority);
        Ok(active)
    }

    async fn save(&self, policy: Policy) -> StorageResult<()> {
        let mut guard = self.policies.write();
        if let Some(existing) = guard.iter_mut().find(|p| p.id == policy.id) {
            *existing = policy;
        } else {
            guard.push(policy);
        }
        Ok(())
    }
}
