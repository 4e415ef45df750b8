//! Storage trait boundaries for the Warden core.
//!
//! The core mandates semantics, not schemas: every store is an async
//! trait, and the in-memory implementations here are the canonical test
//! doubles. Production deployments plug in transactional backends behind
//! the same traits.

mod memory;
mod traits;

pub use memory::{
    MemoryApprovalStore, MemoryEnvelopeStore, MemoryIdentityStore, MemoryPolicyStore,
};
pub use traits::{
    ApprovalRecord, ApprovalStore, EnvelopeFilter, EnvelopeStore, IdentityStore, PolicyStore,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type StorageResult<T> = Result<T, StorageError>;
