//! The approval sub-system: cryptographic binding, the response state
//! machine, routing, and delegation chains.
//!
//! An approval authorizes exactly the action it was created for. The
//! binding hash covers the envelope id and version, the action id, its
//! parameters, and digests of the decision trace and context snapshot —
//! if any of those change between request and response, the response is
//! stale and must be rejected.

pub mod binding;
pub mod delegation;
pub mod routing;
pub mod state;

pub use binding::{apply_patch, compute_binding_hash, verify_binding, BindingInput};
pub use delegation::{can_approve_with_chain, ChainResolution};
pub use routing::{ApprovalRoute, ApprovalRoutingConfig};
pub use state::{expire, respond};

use thiserror::Error;

use warden_types::ApprovalStatus;

#[derive(Error, Debug)]
pub enum ApprovalError {
    #[error("stale approval: binding hash does not match the recorded action")]
    StaleApproval,

    #[error("approval already {0:?}: no further transitions allowed")]
    InvalidTransition(ApprovalStatus),

    #[error("approval expired")]
    Expired,

    #[error("responder {0} is not a known principal")]
    UnknownResponder(String),

    #[error("responder {0} is not authorized to approve this action")]
    NotAuthorized(String),

    #[error("no approvers configured and deny_when_no_approvers is set")]
    NoApprovers,

    #[error("patch must be a JSON object")]
    InvalidPatch,
}
