//! Execution results and undo recipes, as reported by cartridges.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identity::RiskCategory;

/// The reverse action a cartridge supplies after a successful execute.
/// An undo is a new proposal: it is fully re-evaluated and may itself
/// require approval or be denied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UndoRecipe {
    pub original_action_id: String,
    pub original_envelope_id: String,
    pub reverse_action_type: String,
    pub reverse_parameters: Value,
    pub undo_expires_at: Option<DateTime<Utc>>,
    pub undo_risk_category: Option<RiskCategory>,
    pub undo_approval_required: bool,
}

/// Outcome of one cartridge execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteResult {
    pub success: bool,
    pub summary: String,
    #[serde(default)]
    pub external_refs: Vec<String>,
    #[serde(default)]
    pub rollback_available: bool,
    #[serde(default)]
    pub partial_failures: Vec<String>,
    pub duration_ms: u64,
    pub undo_recipe: Option<UndoRecipe>,
}

impl ExecuteResult {
    pub fn succeeded(summary: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: true,
            summary: summary.into(),
            external_refs: Vec::new(),
            rollback_available: false,
            partial_failures: Vec::new(),
            duration_ms,
            undo_recipe: None,
        }
    }

    /// A synthesized failure, used when a cartridge errors instead of
    /// returning a result.
    pub fn failed(summary: impl Into<String>, failures: Vec<String>) -> Self {
        Self {
            success: false,
            summary: summary.into(),
            external_refs: Vec::new(),
            rollback_available: false,
            partial_failures: failures,
            duration_ms: 0,
            undo_recipe: None,
        }
    }
}
