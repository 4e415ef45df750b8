//! Ledger storage backends.
//!
//! The trait is intentionally tiny: append, read-all, and the latest
//! chain anchor. Query evaluation happens in the ledger, not the
//! backend.

use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::entry::AuditEntry;
use crate::LedgerError;

#[async_trait]
pub trait LedgerStorage: Send + Sync {
    async fn append(&self, entry: AuditEntry) -> Result<(), LedgerError>;

    /// All entries in insertion order.
    async fn get_all(&self) -> Result<Vec<AuditEntry>, LedgerError>;

    /// Hash of the most recent entry, if any.
    async fn latest_hash(&self) -> Result<Option<String>, LedgerError>;
}

/// In-memory backend: the canonical test double.
#[derive(Default)]
pub struct MemoryLedgerStorage {
    entries: RwLock<Vec<AuditEntry>>,
}

impl MemoryLedgerStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStorage for MemoryLedgerStorage {
    async fn append(&self, entry: AuditEntry) -> Result<(), LedgerError> {
        self.entries.write().push(entry);
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<AuditEntry>, LedgerError> {
        Ok(self.entries.read().clone())
    }

    async fn latest_hash(&self) -> Result<Option<String>, LedgerError> {
        Ok(self.entries.read().last().map(|e| e.entry_hash.clone()))
    }
}

/// Append-only JSONL file backend. Existing entries are loaded on open so
/// the chain continues across restarts.
pub struct FileLedgerStorage {
    path: PathBuf,
    cache: RwLock<Vec<AuditEntry>>,
}

impl FileLedgerStorage {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        let mut entries = Vec::new();
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                for line in contents.lines() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    entries.push(serde_json::from_str::<AuditEntry>(line)?);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
            Err(e) => return Err(e.into()),
        }
        if !entries.is_empty() {
            info!(path = %path.display(), entries = entries.len(), "Ledger file reopened");
        }
        Ok(Self {
            path,
            cache: RwLock::new(entries),
        })
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl LedgerStorage for FileLedgerStorage {
    async fn append(&self, entry: AuditEntry) -> Result<(), LedgerError> {
        let line = serde_json::to_string(&entry)?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        self.cache.write().push(entry);
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<AuditEntry>, LedgerError> {
        Ok(self.cache.read().clone())
    }

    async fn latest_hash(&self) -> Result<Option<String>, LedgerError> {
        Ok(self.cache.read().last().map(|e| e.entry_hash.clone()))
    }
}
