//! The append-only, hash-chained audit ledger.
//!
//! Every governance event becomes an [`AuditEntry`] whose `entry_hash` is
//! the SHA-256 of its own canonical JSON (minus the hash field) and whose
//! `previous_entry_hash` is the hash of the entry before it. Snapshots
//! are redacted before hashing, so the stored bytes and the hashed bytes
//! are the same bytes. A broken chain is a fatal integrity error, never
//! silently retried.

mod entry;
mod ledger;
mod query;
mod redaction;
mod storage;

pub use entry::{ActorType, AuditActor, AuditEntityRef, AuditEntry, AuditEventType, RecordParams};
pub use ledger::{AuditLedger, ChainVerification, DeepVerification, HashMismatch, RecordedAudit};
pub use query::{AuditQuery, AuditQueryBuilder};
pub use redaction::{RedactionConfig, Redactor};
pub use storage::{FileLedgerStorage, LedgerStorage, MemoryLedgerStorage};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger append failed: {0}")]
    AppendFailed(String),

    #[error("ledger chain broken at index {index}: {detail}")]
    ChainBroken { index: usize, detail: String },

    #[error("ledger io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ledger entry malformed: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("evidence store error: {0}")]
    Evidence(#[from] warden_canonical::CanonicalError),
}
