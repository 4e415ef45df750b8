//! Ledger query support.

use chrono::{DateTime, Utc};

use crate::entry::{AuditEntry, AuditEventType};

/// Filter over ledger entries. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub event_type: Option<AuditEventType>,
    pub actor_id: Option<String>,
    pub envelope_id: Option<String>,
    pub organization_id: Option<String>,
    /// Inclusive lower bound.
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound.
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    /// Newest first when set; insertion order otherwise.
    pub descending: bool,
}

impl AuditQuery {
    pub fn builder() -> AuditQueryBuilder {
        AuditQueryBuilder::default()
    }

    pub fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(event_type) = self.event_type {
            if entry.event_type != event_type {
                return false;
            }
        }
        if let Some(ref actor_id) = self.actor_id {
            if &entry.actor.id != actor_id {
                return false;
            }
        }
        if let Some(ref envelope_id) = self.envelope_id {
            if entry.envelope_id.as_ref() != Some(envelope_id) {
                return false;
            }
        }
        if let Some(ref organization_id) = self.organization_id {
            if entry.organization_id.as_ref() != Some(organization_id) {
                return false;
            }
        }
        if let Some(from) = self.from {
            if entry.timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if entry.timestamp >= to {
                return false;
            }
        }
        true
    }

    /// Filter, order, and paginate a slice of entries.
    pub fn apply(&self, entries: &[AuditEntry]) -> Vec<AuditEntry> {
        let mut results: Vec<AuditEntry> =
            entries.iter().filter(|e| self.matches(e)).cloned().collect();
        if self.descending {
            results.reverse();
        }
        if let Some(offset) = self.offset {
            results = results.into_iter().skip(offset).collect();
        }
        if let Some(limit) = self.limit {
            results.truncate(limit);
        }
        results
    }
}

#[derive(Debug, Default)]
pub struct AuditQueryBuilder {
    query: AuditQuery,
}

impl AuditQueryBuilder {
    pub fn event_type(mut self, event_type: AuditEventType) -> Self {
        self.query.event_type = Some(event_type);
        self
    }

    pub fn actor_id(mut self, id: impl Into<String>) -> Self {
        self.query.actor_id = Some(id.into());
        self
    }

    pub fn envelope_id(mut self, id: impl Into<String>) -> Self {
        self.query.envelope_id = Some(id.into());
        self
    }

    pub fn organization_id(mut self, id: impl Into<String>) -> Self {
        self.query.organization_id = Some(id.into());
        self
    }

    pub fn from(mut self, time: DateTime<Utc>) -> Self {
        self.query.from = Some(time);
        self
    }

    pub fn to(mut self, time: DateTime<Utc>) -> Self {
        self.query.to = Some(time);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.query.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.query.offset = Some(offset);
        self
    }

    pub fn descending(mut self) -> Self {
        self.query.descending = true;
        self
    }

    pub fn build(self) -> AuditQuery {
        self.query
    }
}
