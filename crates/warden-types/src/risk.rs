//! Risk inputs and scores.
//!
//! Cartridges describe an action's risk shape as a [`RiskInput`]; the
//! scorer in `warden-risk` turns it into a [`RiskScore`].

use serde::{Deserialize, Serialize};

use crate::identity::RiskCategory;

/// How exposed the action is.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Exposure {
    pub dollars_at_risk: f64,
    /// Number of entities the action can affect. Minimum 1.
    pub blast_radius: u32,
}

impl Default for Exposure {
    fn default() -> Self {
        Self {
            dollars_at_risk: 0.0,
            blast_radius: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reversibility {
    None,
    Partial,
    Full,
}

/// Situational sensitivity flags, each adding a fixed bump.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Sensitivity {
    #[serde(default)]
    pub entity_volatile: bool,
    #[serde(default)]
    pub learning_phase: bool,
    #[serde(default)]
    pub recently_modified: bool,
}

/// What a cartridge knows about an action's risk before scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskInput {
    pub base_risk: RiskCategory,
    #[serde(default)]
    pub exposure: Exposure,
    pub reversibility: Reversibility,
    #[serde(default)]
    pub sensitivity: Sensitivity,
}

impl RiskInput {
    /// Worst-case input, used when a cartridge fails closed.
    pub fn worst_case() -> Self {
        Self {
            base_risk: RiskCategory::Critical,
            exposure: Exposure {
                dollars_at_risk: 0.0,
                blast_radius: 1,
            },
            reversibility: Reversibility::None,
            sensitivity: Sensitivity {
                entity_volatile: true,
                learning_phase: false,
                recently_modified: false,
            },
        }
    }
}

/// One named contribution to a score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskFactor {
    pub name: String,
    pub contribution: f64,
}

/// A scored risk: raw 0–100, its band, and the ordered factor breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskScore {
    pub raw: f64,
    pub category: RiskCategory,
    pub factors: Vec<RiskFactor>,
}

/// Recent-activity aggregate used for composite (burst) risk.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CompositeContext {
    pub recent_action_count: u32,
    pub cumulative_dollars: f64,
    pub distinct_entities: u32,
    pub distinct_cartridges: u32,
    pub window_minutes: u32,
}
