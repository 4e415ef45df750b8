//! Identity resolution and competence tracking.
//!
//! [`resolver`] merges an identity spec with its active role overlays and
//! competence adjustments into the effective identity a proposal is
//! evaluated against. [`competence`] maintains the per (principal,
//! action-type) track record that shifts effective trust over time.

pub mod competence;
pub mod resolver;

pub use competence::{CompetenceConfig, CompetenceTracker, TrustTransition, TrustTransitionKind};
pub use resolver::{ActivationContext, IdentityResolver};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("unknown principal: {0}")]
    UnknownPrincipal(String),

    #[error(transparent)]
    Storage(#[from] warden_storage::StorageError),
}
