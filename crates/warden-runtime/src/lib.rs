//! The Warden lifecycle orchestrator.
//!
//! [`WardenRuntime`] is the glue across every sub-system: a proposal is
//! identity-resolved, risk-shaped by its cartridge, evaluated against
//! policies and guardrails, routed for approval when required, executed
//! through the cartridge, and recorded in the audit ledger at every step.
//!
//! Each public entry point — [`WardenRuntime::propose`],
//! [`WardenRuntime::respond_to_approval`],
//! [`WardenRuntime::execute_approved`], [`WardenRuntime::request_undo`],
//! [`WardenRuntime::simulate`], [`WardenRuntime::resolve_and_propose`] —
//! is one logical transaction with no suspension points beyond awaiting
//! its storage, cartridge, and ledger collaborators. Deadlines are the
//! caller's concern: wrap calls in `tokio::time::timeout` as needed.

mod backpressure;
mod runtime;

pub use backpressure::ProposalLimiter;
pub use runtime::{
    ProposeOutcome, ProposeParams, ResolveOutcome, RespondOutcome, RespondParams, RuntimeConfig,
    SimulationOutcome, WardenRuntime, WardenRuntimeBuilder,
};

use thiserror::Error;

use warden_approvals::ApprovalError;
use warden_cartridge::CartridgeError;
use warden_guardrails::GuardrailError;
use warden_identity::IdentityError;
use warden_ledger::LedgerError;
use warden_storage::StorageError;
use warden_types::EnvelopeStatus;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("unknown principal: {0}")]
    UnknownPrincipal(String),

    #[error("no cartridge for action: {0}")]
    UnknownCartridge(String),

    #[error("proposal rate limit exceeded for principal {principal_id}")]
    RateLimited { principal_id: String },

    #[error("envelope {envelope_id} is {actual:?}, expected {expected}")]
    InvalidStatus {
        envelope_id: String,
        expected: &'static str,
        actual: EnvelopeStatus,
    },

    #[error(transparent)]
    Approval(#[from] ApprovalError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Guardrail(#[from] GuardrailError),

    #[error(transparent)]
    Cartridge(#[from] CartridgeError),
}
