//! The ledger itself: serialized appends, queries, and verification.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, error};
use uuid::Uuid;

use warden_canonical::{FileSystemEvidenceStore, CANONICAL_VERSION, CHAIN_HASH_VERSION};

use crate::entry::{AuditEntry, RecordParams};
use crate::query::AuditQuery;
use crate::redaction::Redactor;
use crate::storage::LedgerStorage;
use crate::LedgerError;

/// Schema version stamped on every entry.
pub const SCHEMA_VERSION: u32 = 1;

/// A recorded entry plus the redactions that were applied to it.
#[derive(Debug, Clone)]
pub struct RecordedAudit {
    pub entry: AuditEntry,
    pub redacted_paths: Vec<String>,
}

/// Result of linkage verification.
#[derive(Debug, Clone)]
pub struct ChainVerification {
    pub valid: bool,
    pub total_entries: usize,
    /// Zero-based index of the first break, if any.
    pub first_break: Option<usize>,
    pub detail: Option<String>,
}

/// One recomputed-hash mismatch found by deep verification.
#[derive(Debug, Clone)]
pub struct HashMismatch {
    pub index: usize,
    pub stored: String,
    pub computed: String,
}

/// Result of deep verification: linkage plus recomputed hashes.
#[derive(Debug, Clone)]
pub struct DeepVerification {
    pub valid: bool,
    pub chain: ChainVerification,
    pub mismatches: Vec<HashMismatch>,
}

/// Append-only, hash-chained audit ledger.
///
/// Appends are serialized behind one lock: the read of the previous hash
/// and the write of the new entry are atomic with respect to each other,
/// which is the invariant the whole chain rests on.
pub struct AuditLedger {
    storage: Arc<dyn LedgerStorage>,
    redactor: Redactor,
    /// When set, snapshots over the store's inline threshold are written
    /// as evidence blobs and the entry keeps a pointer instead.
    evidence: Option<FileSystemEvidenceStore>,
    append_lock: Mutex<()>,
}

impl AuditLedger {
    pub fn new(storage: Arc<dyn LedgerStorage>, redactor: Redactor) -> Self {
        Self {
            storage,
            redactor,
            evidence: None,
            append_lock: Mutex::new(()),
        }
    }

    pub fn with_evidence_store(mut self, store: FileSystemEvidenceStore) -> Self {
        self.evidence = Some(store);
        self
    }

    /// Record one event. Redaction happens before hashing, so the stored
    /// snapshot and the hashed snapshot are identical bytes. Oversized
    /// snapshots are offloaded post-redaction; the hash then covers the
    /// pointer form, which is exactly what the entry stores.
    pub async fn record(&self, params: RecordParams) -> Result<RecordedAudit, LedgerError> {
        let _guard = self.append_lock.lock().await;

        let entry_id = Uuid::new_v4().to_string();
        let (snapshot, redacted_paths) = self.redactor.redact(&params.snapshot);
        let mut evidence_refs = params.evidence_refs.clone();
        let snapshot = match &self.evidence {
            Some(store) if !store.should_inline(&snapshot) => {
                let blob_id = format!("audit-{entry_id}");
                let pointer = store.put(&blob_id, &snapshot).await?;
                evidence_refs.push(pointer.id.clone());
                json!({
                    "evidence_ref": pointer.id,
                    "evidence_hash": pointer.hash,
                })
            }
            _ => snapshot,
        };
        let previous_entry_hash = self.storage.latest_hash().await?;

        let mut entry = AuditEntry {
            id: entry_id,
            schema_version: SCHEMA_VERSION,
            canonical_version: CANONICAL_VERSION,
            chain_hash_version: CHAIN_HASH_VERSION,
            event_type: params.event_type,
            actor: params.actor,
            entity: params.entity,
            risk_category: params.risk_category,
            snapshot,
            evidence_refs,
            summary: params.summary,
            previous_entry_hash,
            entry_hash: String::new(),
            timestamp: Utc::now(),
            envelope_id: params.envelope_id,
            organization_id: params.organization_id,
            redaction_applied: !redacted_paths.is_empty(),
        };
        entry.entry_hash = entry.compute_hash();

        if let Err(e) = self.storage.append(entry.clone()).await {
            error!(error = %e, "Ledger append failed");
            return Err(e);
        }

        debug!(
            entry_id = %entry.id,
            event = ?entry.event_type,
            redactions = redacted_paths.len(),
            "Audit entry recorded"
        );

        Ok(RecordedAudit {
            entry,
            redacted_paths,
        })
    }

    pub async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>, LedgerError> {
        Ok(query.apply(&self.storage.get_all().await?))
    }

    pub async fn get_all(&self) -> Result<Vec<AuditEntry>, LedgerError> {
        self.storage.get_all().await
    }

    /// Verify previous-hash linkage over a slice of entries.
    pub fn verify_chain(entries: &[AuditEntry]) -> ChainVerification {
        for (i, entry) in entries.iter().enumerate() {
            let expected_previous = if i == 0 {
                None
            } else {
                Some(entries[i - 1].entry_hash.as_str())
            };
            if entry.previous_entry_hash.as_deref() != expected_previous {
                return ChainVerification {
                    valid: false,
                    total_entries: entries.len(),
                    first_break: Some(i),
                    detail: Some(format!(
                        "entry {} expected previous hash {:?}, found {:?}",
                        entry.id, expected_previous, entry.previous_entry_hash
                    )),
                };
            }
        }
        ChainVerification {
            valid: true,
            total_entries: entries.len(),
            first_break: None,
            detail: None,
        }
    }

    /// Verify linkage and recompute every entry hash from its fields.
    pub fn deep_verify(entries: &[AuditEntry]) -> DeepVerification {
        let chain = Self::verify_chain(entries);
        let mismatches: Vec<HashMismatch> = entries
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| {
                let computed = entry.compute_hash();
                if computed != entry.entry_hash {
                    Some(HashMismatch {
                        index,
                        stored: entry.entry_hash.clone(),
                        computed,
                    })
                } else {
                    None
                }
            })
            .collect();
        DeepVerification {
            valid: chain.valid && mismatches.is_empty(),
            chain,
            mismatches,
        }
    }
}
