//! Audit entry types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use warden_canonical::hash_value;
use warden_types::RiskCategory;

/// The closed event-type set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditEventType {
    #[serde(rename = "action.proposed")]
    ActionProposed,
    #[serde(rename = "action.denied")]
    ActionDenied,
    #[serde(rename = "action.approved")]
    ActionApproved,
    #[serde(rename = "action.rejected")]
    ActionRejected,
    #[serde(rename = "action.patched")]
    ActionPatched,
    #[serde(rename = "action.executing")]
    ActionExecuting,
    #[serde(rename = "action.executed")]
    ActionExecuted,
    #[serde(rename = "action.failed")]
    ActionFailed,
    #[serde(rename = "action.expired")]
    ActionExpired,
    #[serde(rename = "action.undo_requested")]
    ActionUndoRequested,
    #[serde(rename = "delegation.chain_resolved")]
    DelegationChainResolved,
    #[serde(rename = "competence.trust_changed")]
    CompetenceTrustChanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    User,
    Agent,
    System,
}

/// Who caused the event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditActor {
    pub id: String,
    pub actor_type: ActorType,
}

impl AuditActor {
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            actor_type: ActorType::User,
        }
    }

    pub fn agent(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            actor_type: ActorType::Agent,
        }
    }

    pub fn system(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            actor_type: ActorType::System,
        }
    }
}

/// What the event is about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntityRef {
    pub id: String,
    pub entity_type: String,
}

impl AuditEntityRef {
    pub fn envelope(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            entity_type: "envelope".into(),
        }
    }

    pub fn approval(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            entity_type: "approval".into(),
        }
    }

    pub fn principal(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            entity_type: "principal".into(),
        }
    }
}

/// One immutable, hash-chained ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub schema_version: u32,
    pub canonical_version: u32,
    pub chain_hash_version: u32,
    pub event_type: AuditEventType,
    pub actor: AuditActor,
    pub entity: AuditEntityRef,
    pub risk_category: Option<RiskCategory>,
    /// Stored post-redaction; these are the bytes the hash covers.
    pub snapshot: Value,
    #[serde(default)]
    pub evidence_refs: Vec<String>,
    pub summary: String,
    pub previous_entry_hash: Option<String>,
    pub entry_hash: String,
    pub timestamp: DateTime<Utc>,
    pub envelope_id: Option<String>,
    pub organization_id: Option<String>,
    pub redaction_applied: bool,
}

impl AuditEntry {
    /// The hash this entry should carry: SHA-256 of its canonical JSON
    /// with the `entry_hash` field removed.
    pub fn compute_hash(&self) -> String {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Some(map) = value.as_object_mut() {
            map.remove("entry_hash");
        }
        hash_value(&value)
    }
}

/// What callers supply to [`crate::AuditLedger::record`]; the ledger
/// fills in ids, versions, hashes, and the timestamp.
#[derive(Debug, Clone)]
pub struct RecordParams {
    pub event_type: AuditEventType,
    pub actor: AuditActor,
    pub entity: AuditEntityRef,
    pub risk_category: Option<RiskCategory>,
    pub snapshot: Value,
    pub evidence_refs: Vec<String>,
    pub summary: String,
    pub envelope_id: Option<String>,
    pub organization_id: Option<String>,
}

impl RecordParams {
    pub fn new(
        event_type: AuditEventType,
        actor: AuditActor,
        entity: AuditEntityRef,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            actor,
            entity,
            risk_category: None,
            snapshot: Value::Object(Default::default()),
            evidence_refs: Vec::new(),
            summary: summary.into(),
            envelope_id: None,
            organization_id: None,
        }
    }

    pub fn with_snapshot(mut self, snapshot: Value) -> Self {
        self.snapshot = snapshot;
        self
    }

    pub fn with_risk(mut self, category: RiskCategory) -> Self {
        self.risk_category = Some(category);
        self
    }

    pub fn with_envelope(mut self, envelope_id: impl Into<String>) -> Self {
        self.envelope_id = Some(envelope_id.into());
        self
    }

    pub fn with_organization(mut self, organization_id: Option<String>) -> Self {
        self.organization_id = organization_id;
        self
    }

    pub fn with_evidence(mut self, refs: Vec<String>) -> Self {
        self.evidence_refs = refs;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_types_use_dotted_wire_form() {
        assert_eq!(
            serde_json::to_string(&AuditEventType::ActionProposed).unwrap(),
            "\"action.proposed\""
        );
        assert_eq!(
            serde_json::to_string(&AuditEventType::DelegationChainResolved).unwrap(),
            "\"delegation.chain_resolved\""
        );
        let back: AuditEventType = serde_json::from_str("\"action.undo_requested\"").unwrap();
        assert_eq!(back, AuditEventType::ActionUndoRequested);
    }

    #[test]
    fn compute_hash_excludes_entry_hash_field() {
        let mut entry = AuditEntry {
            id: "e1".into(),
            schema_version: 1,
            canonical_version: 1,
            chain_hash_version: 1,
            event_type: AuditEventType::ActionProposed,
            actor: AuditActor::agent("a1"),
            entity: AuditEntityRef::envelope("env-1"),
            risk_category: None,
            snapshot: json!({"k": "v"}),
            evidence_refs: vec![],
            summary: "test".into(),
            previous_entry_hash: None,
            entry_hash: String::new(),
            timestamp: Utc::now(),
            envelope_id: Some("env-1".into()),
            organization_id: None,
            redaction_applied: false,
        };

        let h1 = entry.compute_hash();
        entry.entry_hash = h1.clone();
        // Hash is stable regardless of what entry_hash currently holds.
        assert_eq!(entry.compute_hash(), h1);

        entry.summary = "tampered".into();
        assert_ne!(entry.compute_hash(), h1);
    }
}
