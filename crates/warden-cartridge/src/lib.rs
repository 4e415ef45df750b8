//! The cartridge contract.
//!
//! A cartridge is an external integration plugin — ads, payments,
//! trading — that describes action risk, declares guardrails, and
//! performs the actual side effects. The core never decodes
//! cartridge-specific fields; parameters and snapshots are opaque bags.
//!
//! Optional capabilities (entity resolution, pre-execution snapshots) are
//! explicit accessors returning `Option<&dyn _>` rather than method
//! probing: a capability is either present or absent, visibly.

pub mod entity;
pub mod mock;
pub mod registry;

pub use entity::{
    resolve_entities, EntityCandidate, EntityLookup, EntityRef, EntityResolution, LookupStatus,
};
pub use mock::MockCartridge;
pub use registry::CartridgeRegistry;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use warden_types::{ExecuteResult, Guardrails, RiskInput};

#[derive(Error, Debug)]
pub enum CartridgeError {
    #[error("cartridge {0} is not registered")]
    NotRegistered(String),

    #[error("cartridge initialization failed: {0}")]
    InitFailed(String),

    #[error("provider call failed: {0}")]
    Provider(String),

    #[error("cartridge {cartridge} does not support {capability}")]
    MissingCapability {
        cartridge: String,
        capability: &'static str,
    },
}

/// Ambient context passed into every cartridge call.
#[derive(Debug, Clone, Default)]
pub struct CartridgeContext {
    pub principal_id: Option<String>,
    pub organization_id: Option<String>,
    pub metadata: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unavailable,
}

/// What a cartridge reports about itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartridgeHealth {
    pub status: HealthStatus,
    pub capabilities: Vec<String>,
}

/// Resolves user-supplied entity references to canonical ids.
#[async_trait]
pub trait EntityResolver: Send + Sync {
    async fn resolve_entity(
        &self,
        input_ref: &str,
        entity_type: &str,
        context: &CartridgeContext,
    ) -> Result<EntityLookup, CartridgeError>;
}

/// Captures pre-execution state for undo construction.
#[async_trait]
pub trait Snapshotter: Send + Sync {
    async fn capture_snapshot(
        &self,
        action_type: &str,
        parameters: &Value,
        context: &CartridgeContext,
    ) -> Result<Value, CartridgeError>;
}

/// The capability set every cartridge implements.
#[async_trait]
pub trait Cartridge: Send + Sync {
    /// Stable id, e.g. `ads-spend`.
    fn id(&self) -> &str;

    /// One-time setup: provider clients, credentials.
    async fn initialize(&self, context: &CartridgeContext) -> Result<(), CartridgeError>;

    /// Describe the risk shape of an action before evaluation.
    async fn get_risk_input(
        &self,
        action_type: &str,
        parameters: &Value,
        context: &CartridgeContext,
    ) -> Result<RiskInput, CartridgeError>;

    /// Static guardrail declarations.
    fn get_guardrails(&self) -> Guardrails;

    /// Read-only context enrichment. Callers treat errors as fail-closed
    /// and substitute worst-case defaults.
    async fn enrich_context(
        &self,
        action_type: &str,
        parameters: &Value,
        context: &CartridgeContext,
    ) -> Result<BTreeMap<String, Value>, CartridgeError>;

    /// Perform the side effect. Implementations are responsible for their
    /// own idempotency; the core never retries.
    async fn execute(
        &self,
        action_type: &str,
        parameters: &Value,
        context: &CartridgeContext,
    ) -> Result<ExecuteResult, CartridgeError>;

    async fn health_check(&self) -> CartridgeHealth;

    /// Present when the cartridge can resolve entity references.
    fn entity_resolver(&self) -> Option<&dyn EntityResolver> {
        None
    }

    /// Present when the cartridge can capture pre-execution snapshots.
    fn snapshotter(&self) -> Option<&dyn Snapshotter> {
        None
    }
}
