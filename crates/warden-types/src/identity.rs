//! Principals, identity specs, role overlays, and the resolved identity.
//!
//! An [`IdentitySpec`] is the governance policy attached to a principal.
//! [`RoleOverlay`]s are conditional modifiers selected at evaluation time;
//! the merge itself lives in `warden-identity`. A [`ResolvedIdentity`] is
//! the computed result — never persisted, recomputed per proposal.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of actor a principal represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalType {
    User,
    Agent,
    System,
}

/// A user, agent, or system identity. Persisted by an external admin
/// surface; read-only to the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub principal_type: PrincipalType,
    pub display_name: String,
    pub organization_id: Option<String>,
    pub roles: Vec<String>,
}

impl Principal {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Risk bands a scored action can land in.
///
/// Ordered: `None < Low < Medium < High < Critical`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskCategory {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskCategory::None => "none",
            RiskCategory::Low => "low",
            RiskCategory::Medium => "medium",
            RiskCategory::High => "high",
            RiskCategory::Critical => "critical",
        }
    }
}

/// Required human-approval level for an action.
///
/// Ordered: `None < Standard < Elevated < Mandatory`. "More restrictive"
/// comparisons are ordinary `>` on this enum.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalLevel {
    None,
    Standard,
    Elevated,
    Mandatory,
}

impl ApprovalLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalLevel::None => "none",
            ApprovalLevel::Standard => "standard",
            ApprovalLevel::Elevated => "elevated",
            ApprovalLevel::Mandatory => "mandatory",
        }
    }

    /// One step more restrictive, saturating at `Mandatory`.
    pub fn raised(self) -> ApprovalLevel {
        match self {
            ApprovalLevel::None => ApprovalLevel::Standard,
            ApprovalLevel::Standard => ApprovalLevel::Elevated,
            ApprovalLevel::Elevated | ApprovalLevel::Mandatory => ApprovalLevel::Mandatory,
        }
    }
}

/// Named baseline for the tolerance matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GovernanceProfile {
    /// Auto-approve everything while still tracing intent.
    Observe,
    /// The spec's matrix applies unchanged.
    Guarded,
    /// Thresholds raised one level, spend limits tightened.
    Strict,
    /// Everything requires mandatory approval; per-action spend is zero.
    Locked,
}

/// Per-risk-category required approval level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskTolerance {
    pub none: ApprovalLevel,
    pub low: ApprovalLevel,
    pub medium: ApprovalLevel,
    pub high: ApprovalLevel,
    pub critical: ApprovalLevel,
}

impl RiskTolerance {
    /// The guarded baseline: low-risk actions flow, medium needs a person,
    /// critical needs mandatory sign-off.
    pub fn guarded() -> Self {
        Self {
            none: ApprovalLevel::None,
            low: ApprovalLevel::None,
            medium: ApprovalLevel::Standard,
            high: ApprovalLevel::Elevated,
            critical: ApprovalLevel::Mandatory,
        }
    }

    /// Every category forced to a single level.
    pub fn uniform(level: ApprovalLevel) -> Self {
        Self {
            none: level,
            low: level,
            medium: level,
            high: level,
            critical: level,
        }
    }

    pub fn level_for(&self, category: RiskCategory) -> ApprovalLevel {
        match category {
            RiskCategory::None => self.none,
            RiskCategory::Low => self.low,
            RiskCategory::Medium => self.medium,
            RiskCategory::High => self.high,
            RiskCategory::Critical => self.critical,
        }
    }

    pub fn set(&mut self, category: RiskCategory, level: ApprovalLevel) {
        match category {
            RiskCategory::None => self.none = level,
            RiskCategory::Low => self.low = level,
            RiskCategory::Medium => self.medium = level,
            RiskCategory::High => self.high = level,
            RiskCategory::Critical => self.critical = level,
        }
    }

    /// Apply `f` to every category's level.
    pub fn map(mut self, f: impl Fn(ApprovalLevel) -> ApprovalLevel) -> Self {
        self.none = f(self.none);
        self.low = f(self.low);
        self.medium = f(self.medium);
        self.high = f(self.high);
        self.critical = f(self.critical);
        self
    }
}

impl Default for RiskTolerance {
    fn default() -> Self {
        Self::guarded()
    }
}

/// Spend ceilings in account currency. `None` means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SpendLimits {
    pub per_action: Option<f64>,
    pub daily: Option<f64>,
    pub weekly: Option<f64>,
    pub monthly: Option<f64>,
}

/// The governance policy attached to a principal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentitySpec {
    pub principal_id: String,
    pub risk_tolerance: RiskTolerance,
    pub spend_limits: SpendLimits,
    /// Cartridge-scoped spend overrides, keyed by cartridge id.
    #[serde(default)]
    pub cartridge_spend_overrides: BTreeMap<String, SpendLimits>,
    /// Action-type patterns always denied.
    #[serde(default)]
    pub forbidden_behaviors: Vec<String>,
    /// Action-type patterns auto-allowed.
    #[serde(default)]
    pub trust_behaviors: Vec<String>,
    #[serde(default)]
    pub delegated_approvers: Vec<String>,
    pub governance_profile: Option<GovernanceProfile>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IdentitySpec {
    pub fn new(principal_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            principal_id: principal_id.into(),
            risk_tolerance: RiskTolerance::guarded(),
            spend_limits: SpendLimits::default(),
            cartridge_spend_overrides: BTreeMap::new(),
            forbidden_behaviors: Vec::new(),
            trust_behaviors: Vec::new(),
            delegated_approvers: Vec::new(),
            governance_profile: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Whether an overlay tightens or loosens the base spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayMode {
    Restrict,
    Extend,
}

/// A recurring activation window. Hours are half-open: `start_hour`
/// inclusive, `end_hour` exclusive, in the window's own UTC offset.
/// Windows where `start_hour > end_hour` wrap past midnight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Days of week the window applies to, 0 = Monday. Empty = every day.
    #[serde(default)]
    pub days: Vec<u8>,
    pub start_hour: u8,
    pub end_hour: u8,
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

/// Conditions under which an overlay activates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OverlayActivation {
    #[serde(default)]
    pub time_windows: Vec<TimeWindow>,
    /// Only active for these cartridges when set.
    pub cartridge_filter: Option<Vec<String>>,
    /// Every listed key must be present and equal in the activation metadata.
    #[serde(default)]
    pub metadata_equals: BTreeMap<String, Value>,
}

/// Partial override applied when an overlay is active.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OverlayPatch {
    /// Per-category tolerance overrides; categories not listed are untouched.
    #[serde(default)]
    pub risk_tolerance: BTreeMap<RiskCategory, ApprovalLevel>,
    #[serde(default)]
    pub additional_forbidden_behaviors: Vec<String>,
    #[serde(default)]
    pub remove_trust_behaviors: Vec<String>,
    /// Spend-limit deltas; `None` fields leave the base value unchanged.
    #[serde(default)]
    pub spend_limits: SpendLimits,
}

/// A conditional modifier of an [`IdentitySpec`], selected at evaluation
/// time. Lower `priority` is applied earlier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleOverlay {
    pub id: String,
    /// The principal whose spec this overlay targets.
    pub spec_id: String,
    pub mode: OverlayMode,
    pub priority: i32,
    pub active: bool,
    #[serde(default)]
    pub activation: OverlayActivation,
    #[serde(default)]
    pub patch: OverlayPatch,
}

/// Per (principal, action-type) runtime track record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompetenceRecord {
    pub principal_id: String,
    pub action_type: String,
    pub success_count: u32,
    pub failure_count: u32,
    pub rollback_count: u32,
    pub current_streak: u32,
    /// 0–100; starts at the configured baseline.
    pub score: f64,
    pub should_trust: bool,
    pub should_deny: bool,
    pub updated_at: DateTime<Utc>,
}

/// The computed effective identity: spec + active overlays + competence.
/// Recomputed per proposal; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedIdentity {
    pub principal_id: String,
    pub risk_tolerance: RiskTolerance,
    pub spend_limits: SpendLimits,
    pub forbidden_behaviors: Vec<String>,
    pub trust_behaviors: Vec<String>,
    pub delegated_approvers: Vec<String>,
    /// Ids of overlays that were active and applied, in application order.
    pub applied_overlays: Vec<String>,
    pub governance_profile: Option<GovernanceProfile>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approval_levels_are_ordered() {
        assert!(ApprovalLevel::None < ApprovalLevel::Standard);
        assert!(ApprovalLevel::Standard < ApprovalLevel::Elevated);
        assert!(ApprovalLevel::Elevated < ApprovalLevel::Mandatory);
        assert_eq!(
            ApprovalLevel::Standard.max(ApprovalLevel::Elevated),
            ApprovalLevel::Elevated
        );
    }

    #[test]
    fn raised_saturates_at_mandatory() {
        assert_eq!(ApprovalLevel::None.raised(), ApprovalLevel::Standard);
        assert_eq!(ApprovalLevel::Mandatory.raised(), ApprovalLevel::Mandatory);
    }

    #[test]
    fn risk_categories_are_ordered() {
        assert!(RiskCategory::None < RiskCategory::Critical);
        assert!(RiskCategory::Medium > RiskCategory::Low);
    }

    #[test]
    fn tolerance_lookup_and_set() {
        let mut t = RiskTolerance::guarded();
        assert_eq!(t.level_for(RiskCategory::Medium), ApprovalLevel::Standard);
        t.set(RiskCategory::Medium, ApprovalLevel::Mandatory);
        assert_eq!(t.level_for(RiskCategory::Medium), ApprovalLevel::Mandatory);
    }

    #[test]
    fn uniform_tolerance() {
        let t = RiskTolerance::uniform(ApprovalLevel::Mandatory);
        assert_eq!(t.level_for(RiskCategory::None), ApprovalLevel::Mandatory);
        assert_eq!(t.level_for(RiskCategory::Critical), ApprovalLevel::Mandatory);
    }

    #[test]
    fn enum_wire_forms_are_snake_case() {
        assert_eq!(
            serde_json::to_string(&RiskCategory::Critical).unwrap(),
            "\"critical\""
        );
        assert_eq!(
            serde_json::to_string(&GovernanceProfile::Observe).unwrap(),
            "\"observe\""
        );
    }

    #[test]
    fn overlay_patch_tolerance_keys_round_trip() {
        let mut patch = OverlayPatch::default();
        patch
            .risk_tolerance
            .insert(RiskCategory::High, ApprovalLevel::Mandatory);
        let json = serde_json::to_string(&patch).unwrap();
        let back: OverlayPatch = serde_json::from_str(&json).unwrap();
        assert_eq!(
            back.risk_tolerance.get(&RiskCategory::High),
            Some(&ApprovalLevel::Mandatory)
        );
    }
}
