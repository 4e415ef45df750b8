//! Merging an identity spec with overlays, governance profiles, and
//! competence into the effective identity.
//!
//! Resolution order:
//! 1. filter overlays (active flag, time windows, cartridge filter,
//!    metadata equality) and sort by ascending priority
//! 2. apply the governance-profile baseline to the spec's matrix
//! 3. fold overlays in priority order — restrict takes the more
//!    restrictive value, extend the less
//! 4. apply competence adjustments to the trust / forbidden sets

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use serde_json::Value;
use tracing::debug;

use warden_types::{
    ApprovalLevel, CompetenceRecord, GovernanceProfile, IdentitySpec, OverlayMode, ResolvedIdentity, RiskTolerance, RoleOverlay, SpendLimits, TimeWindow,
};
#[cfg(test)]
use warden_types::RiskCategory;

/// The situation an overlay is evaluated in.
#[derive(Debug, Clone, Default)]
pub struct ActivationContext {
    pub cartridge_id: Option<String>,
    pub now: Option<DateTime<Utc>>,
    pub metadata: BTreeMap<String, Value>,
}

impl ActivationContext {
    pub fn for_cartridge(cartridge_id: impl Into<String>) -> Self {
        Self {
            cartridge_id: Some(cartridge_id.into()),
            now: None,
            metadata: BTreeMap::new(),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.now.unwrap_or_else(Utc::now)
    }
}

/// Stateless resolver; all inputs arrive per call.
pub struct IdentityResolver;

impl IdentityResolver {
    /// Compute the effective identity for one evaluation.
    pub fn resolve(
        spec: &IdentitySpec,
        overlays: &[RoleOverlay],
        context: &ActivationContext,
        competence: &[CompetenceRecord],
    ) -> ResolvedIdentity {
        let now = context.now();

        let mut active: Vec<&RoleOverlay> = overlays
            .iter()
            .filter(|o| o.active && overlay_applies(o, context, now))
            .collect();
        active.sort_by_key(|o| o.priority);

        // A cartridge-scoped spend override replaces the base limits
        // before profiles and overlays act on them, so a locked or
        // strict profile still tightens the override.
        let base_spend = context
            .cartridge_id
            .as_deref()
            .and_then(|id| spec.cartridge_spend_overrides.get(id).copied())
            .unwrap_or(spec.spend_limits);

        let profile = spec.governance_profile;
        let (mut tolerance, mut spend) = profile_baseline(spec, profile, base_spend);

        let mut forbidden = spec.forbidden_behaviors.clone();
        let mut trust = spec.trust_behaviors.clone();
        let mut applied = Vec::new();

        for overlay in &active {
            apply_overlay(overlay, &mut tolerance, &mut spend, &mut forbidden, &mut trust);
            applied.push(overlay.id.clone());
        }

        for record in competence {
            if record.should_deny {
                trust.retain(|p| p != &record.action_type);
                if !forbidden.contains(&record.action_type) {
                    forbidden.push(record.action_type.clone());
                }
            } else if record.should_trust {
                if !trust.contains(&record.action_type) {
                    trust.push(record.action_type.clone());
                }
            } else if record.score < 40.0 {
                // Chronically shaky without being deny-worthy: pull trust.
                trust.retain(|p| p != &record.action_type);
            }
        }

        if !applied.is_empty() {
            debug!(
                principal = %spec.principal_id,
                overlays = applied.len(),
                "Resolved identity with active overlays"
            );
        }

        ResolvedIdentity {
            principal_id: spec.principal_id.clone(),
            risk_tolerance: tolerance,
            spend_limits: spend,
            forbidden_behaviors: forbidden,
            trust_behaviors: trust,
            delegated_approvers: spec.delegated_approvers.clone(),
            applied_overlays: applied,
            governance_profile: profile,
        }
    }
}

fn profile_baseline(
    spec: &IdentitySpec,
    profile: Option<GovernanceProfile>,
    spend: SpendLimits,
) -> (RiskTolerance, SpendLimits) {
    let base = spec.risk_tolerance;
    match profile {
        None | Some(GovernanceProfile::Guarded) => (base, spend),
        Some(GovernanceProfile::Observe) => (RiskTolerance::uniform(ApprovalLevel::None), spend),
        Some(GovernanceProfile::Strict) => {
            let tightened = SpendLimits {
                per_action: spend.per_action.map(|v| v / 2.0),
                daily: spend.daily.map(|v| v / 2.0),
                weekly: spend.weekly.map(|v| v / 2.0),
                monthly: spend.monthly.map(|v| v / 2.0),
            };
            (base.map(ApprovalLevel::raised), tightened)
        }
        Some(GovernanceProfile::Locked) => {
            let mut locked = spend;
            locked.per_action = Some(0.0);
            (RiskTolerance::uniform(ApprovalLevel::Mandatory), locked)
        }
    }
}

fn overlay_applies(overlay: &RoleOverlay, context: &ActivationContext, now: DateTime<Utc>) -> bool {
    let activation = &overlay.activation;

    if let Some(ref filter) = activation.cartridge_filter {
        match context.cartridge_id.as_deref() {
            Some(id) if filter.iter().any(|f| f == id) => {}
            _ => return false,
        }
    }

    if !activation.time_windows.is_empty()
        && !activation.time_windows.iter().any(|w| window_contains(w, now))
    {
        return false;
    }

    for (key, expected) in &activation.metadata_equals {
        if context.metadata.get(key) != Some(expected) {
            return false;
        }
    }

    true
}

fn window_contains(window: &TimeWindow, now: DateTime<Utc>) -> bool {
    let local = now + Duration::minutes(window.utc_offset_minutes as i64);
    let day = local.weekday().num_days_from_monday() as u8;
    if !window.days.is_empty() && !window.days.contains(&day) {
        return false;
    }
    let hour = local.hour() as u8;
    if window.start_hour <= window.end_hour {
        window.start_hour <= hour && hour < window.end_hour
    } else {
        // Wraps past midnight.
        hour >= window.start_hour || hour < window.end_hour
    }
}

fn apply_overlay(
    overlay: &RoleOverlay,
    tolerance: &mut RiskTolerance,
    spend: &mut SpendLimits,
    forbidden: &mut Vec<String>,
    trust: &mut Vec<String>,
) {
    let patch = &overlay.patch;

    for (category, level) in &patch.risk_tolerance {
        let current = tolerance.level_for(*category);
        let merged = match overlay.mode {
            OverlayMode::Restrict => current.max(*level),
            OverlayMode::Extend => current.min(*level),
        };
        tolerance.set(*category, merged);
    }

    for behavior in &patch.additional_forbidden_behaviors {
        if !forbidden.contains(behavior) {
            forbidden.push(behavior.clone());
        }
    }

    trust.retain(|t| !patch.remove_trust_behaviors.contains(t));

    merge_limit(&mut spend.per_action, patch.spend_limits.per_action, overlay.mode);
    merge_limit(&mut spend.daily, patch.spend_limits.daily, overlay.mode);
    merge_limit(&mut spend.weekly, patch.spend_limits.weekly, overlay.mode);
    merge_limit(&mut spend.monthly, patch.spend_limits.monthly, overlay.mode);
}

fn merge_limit(base: &mut Option<f64>, patch: Option<f64>, mode: OverlayMode) {
    let Some(patched) = patch else { return };
    *base = Some(match (*base, mode) {
        // Restrict: the smaller non-null limit wins; a limit where none
        // existed is itself a restriction.
        (Some(current), OverlayMode::Restrict) => current.min(patched),
        (None, OverlayMode::Restrict) => patched,
        // Extend: the larger limit wins.
        (Some(current), OverlayMode::Extend) => current.max(patched),
        (None, OverlayMode::Extend) => return, // unlimited stays unlimited
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use warden_types::{OverlayActivation, OverlayPatch};

    fn spec() -> IdentitySpec {
        let mut spec = IdentitySpec::new("p1");
        spec.trust_behaviors = vec!["ads.campaign.pause".into()];
        spec.spend_limits.per_action = Some(1000.0);
        spec.spend_limits.daily = Some(5000.0);
        spec
    }

    fn overlay(id: &str, mode: OverlayMode, priority: i32) -> RoleOverlay {
        RoleOverlay {
            id: id.into(),
            spec_id: "p1".into(),
            mode,
            priority,
            active: true,
            activation: OverlayActivation::default(),
            patch: OverlayPatch::default(),
        }
    }

    fn ctx() -> ActivationContext {
        ActivationContext::default()
    }

    #[test]
    fn no_overlays_yields_spec_values() {
        let resolved = IdentityResolver::resolve(&spec(), &[], &ctx(), &[]);
        assert_eq!(resolved.risk_tolerance, RiskTolerance::guarded());
        assert_eq!(resolved.trust_behaviors, vec!["ads.campaign.pause"]);
        assert!(resolved.applied_overlays.is_empty());
    }

    #[test]
    fn restrict_overlay_takes_more_restrictive_level() {
        let mut o = overlay("o1", OverlayMode::Restrict, 0);
        o.patch
            .risk_tolerance
            .insert(RiskCategory::Low, ApprovalLevel::Elevated);
        let resolved = IdentityResolver::resolve(&spec(), &[o], &ctx(), &[]);
        assert_eq!(
            resolved.risk_tolerance.level_for(RiskCategory::Low),
            ApprovalLevel::Elevated
        );
    }

    #[test]
    fn extend_overlay_takes_less_restrictive_level() {
        let mut o = overlay("o1", OverlayMode::Extend, 0);
        o.patch
            .risk_tolerance
            .insert(RiskCategory::Critical, ApprovalLevel::Standard);
        let resolved = IdentityResolver::resolve(&spec(), &[o], &ctx(), &[]);
        assert_eq!(
            resolved.risk_tolerance.level_for(RiskCategory::Critical),
            ApprovalLevel::Standard
        );
    }

    #[test]
    fn restrict_cannot_be_loosened_by_extend_value() {
        // A restrict overlay carrying a looser level than the base keeps
        // the base.
        let mut o = overlay("o1", OverlayMode::Restrict, 0);
        o.patch
            .risk_tolerance
            .insert(RiskCategory::Critical, ApprovalLevel::None);
        let resolved = IdentityResolver::resolve(&spec(), &[o], &ctx(), &[]);
        assert_eq!(
            resolved.risk_tolerance.level_for(RiskCategory::Critical),
            ApprovalLevel::Mandatory
        );
    }

    #[test]
    fn overlays_apply_in_priority_order() {
        let mut first = overlay("first", OverlayMode::Restrict, 1);
        first
            .patch
            .risk_tolerance
            .insert(RiskCategory::Low, ApprovalLevel::Standard);
        let mut second = overlay("second", OverlayMode::Extend, 2);
        second
            .patch
            .risk_tolerance
            .insert(RiskCategory::Low, ApprovalLevel::None);

        // Listed out of order on purpose.
        let resolved =
            IdentityResolver::resolve(&spec(), &[second.clone(), first.clone()], &ctx(), &[]);
        assert_eq!(resolved.applied_overlays, vec!["first", "second"]);
        // Extend ran last, so Low ends at None.
        assert_eq!(
            resolved.risk_tolerance.level_for(RiskCategory::Low),
            ApprovalLevel::None
        );
    }

    #[test]
    fn inactive_overlay_is_skipped() {
        let mut o = overlay("o1", OverlayMode::Restrict, 0);
        o.active = false;
        o.patch
            .risk_tolerance
            .insert(RiskCategory::Low, ApprovalLevel::Mandatory);
        let resolved = IdentityResolver::resolve(&spec(), &[o], &ctx(), &[]);
        assert!(resolved.applied_overlays.is_empty());
    }

    #[test]
    fn cartridge_filter_gates_activation() {
        let mut o = overlay("o1", OverlayMode::Restrict, 0);
        o.activation.cartridge_filter = Some(vec!["pay-core".into()]);
        o.patch
            .additional_forbidden_behaviors
            .push("pay.invoice.send".into());

        let for_ads = IdentityResolver::resolve(
            &spec(),
            std::slice::from_ref(&o),
            &ActivationContext::for_cartridge("ads-spend"),
            &[],
        );
        assert!(for_ads.applied_overlays.is_empty());

        let for_pay = IdentityResolver::resolve(
            &spec(),
            &[o],
            &ActivationContext::for_cartridge("pay-core"),
            &[],
        );
        assert_eq!(for_pay.applied_overlays, vec!["o1"]);
        assert!(for_pay
            .forbidden_behaviors
            .contains(&"pay.invoice.send".to_string()));
    }

    #[test]
    fn time_window_gates_activation() {
        let mut o = overlay("nights", OverlayMode::Restrict, 0);
        o.activation.time_windows = vec![TimeWindow {
            days: vec![],
            start_hour: 22,
            end_hour: 6,
            utc_offset_minutes: 0,
        }];
        o.patch
            .risk_tolerance
            .insert(RiskCategory::Low, ApprovalLevel::Elevated);

        let midnight = Utc.with_ymd_and_hms(2025, 6, 2, 0, 30, 0).unwrap();
        let noon = Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap();

        let mut ctx_night = ctx();
        ctx_night.now = Some(midnight);
        let at_night =
            IdentityResolver::resolve(&spec(), std::slice::from_ref(&o), &ctx_night, &[]);
        assert_eq!(at_night.applied_overlays, vec!["nights"]);

        let mut ctx_noon = ctx();
        ctx_noon.now = Some(noon);
        let at_noon = IdentityResolver::resolve(&spec(), &[o], &ctx_noon, &[]);
        assert!(at_noon.applied_overlays.is_empty());
    }

    #[test]
    fn day_filter_uses_window_offset() {
        let mut o = overlay("weekdays", OverlayMode::Restrict, 0);
        o.activation.time_windows = vec![TimeWindow {
            days: vec![0, 1, 2, 3, 4], // Monday–Friday
            start_hour: 9,
            end_hour: 17,
            utc_offset_minutes: 0,
        }];

        // 2025-06-01 is a Sunday.
        let sunday = Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap();
        let monday = Utc.with_ymd_and_hms(2025, 6, 2, 10, 0, 0).unwrap();

        let mut c = ctx();
        c.now = Some(sunday);
        assert!(IdentityResolver::resolve(&spec(), std::slice::from_ref(&o), &c, &[])
            .applied_overlays
            .is_empty());

        c.now = Some(monday);
        assert_eq!(
            IdentityResolver::resolve(&spec(), &[o], &c, &[]).applied_overlays,
            vec!["weekdays"]
        );
    }

    #[test]
    fn metadata_equality_gates_activation() {
        let mut o = overlay("incident", OverlayMode::Restrict, 0);
        o.activation
            .metadata_equals
            .insert("incident_mode".into(), serde_json::json!(true));

        let mut quiet = ctx();
        assert!(IdentityResolver::resolve(&spec(), std::slice::from_ref(&o), &quiet, &[])
            .applied_overlays
            .is_empty());

        quiet
            .metadata
            .insert("incident_mode".into(), serde_json::json!(true));
        assert_eq!(
            IdentityResolver::resolve(&spec(), &[o], &quiet, &[]).applied_overlays,
            vec!["incident"]
        );
    }

    #[test]
    fn spend_limits_merge_by_mode() {
        let mut tighten = overlay("tighten", OverlayMode::Restrict, 0);
        tighten.patch.spend_limits.per_action = Some(200.0);
        tighten.patch.spend_limits.weekly = Some(900.0); // base has none

        let resolved = IdentityResolver::resolve(&spec(), &[tighten], &ctx(), &[]);
        assert_eq!(resolved.spend_limits.per_action, Some(200.0));
        assert_eq!(resolved.spend_limits.weekly, Some(900.0));

        let mut loosen = overlay("loosen", OverlayMode::Extend, 0);
        loosen.patch.spend_limits.per_action = Some(5000.0);
        loosen.patch.spend_limits.weekly = Some(100.0); // base unlimited stays unlimited

        let resolved = IdentityResolver::resolve(&spec(), &[loosen], &ctx(), &[]);
        assert_eq!(resolved.spend_limits.per_action, Some(5000.0));
        assert_eq!(resolved.spend_limits.weekly, None);
    }

    #[test]
    fn forbidden_union_and_trust_removal() {
        let mut o = overlay("o1", OverlayMode::Restrict, 0);
        o.patch
            .additional_forbidden_behaviors
            .push("ads.budget.increase".into());
        o.patch
            .remove_trust_behaviors
            .push("ads.campaign.pause".into());

        let resolved = IdentityResolver::resolve(&spec(), &[o], &ctx(), &[]);
        assert!(resolved
            .forbidden_behaviors
            .contains(&"ads.budget.increase".to_string()));
        assert!(resolved.trust_behaviors.is_empty());
    }

    #[test]
    fn observe_profile_forces_all_none() {
        let mut s = spec();
        s.governance_profile = Some(GovernanceProfile::Observe);
        let resolved = IdentityResolver::resolve(&s, &[], &ctx(), &[]);
        assert_eq!(
            resolved.risk_tolerance,
            RiskTolerance::uniform(ApprovalLevel::None)
        );
    }

    #[test]
    fn strict_profile_raises_and_halves() {
        let mut s = spec();
        s.governance_profile = Some(GovernanceProfile::Strict);
        let resolved = IdentityResolver::resolve(&s, &[], &ctx(), &[]);
        assert_eq!(
            resolved.risk_tolerance.level_for(RiskCategory::Low),
            ApprovalLevel::Standard
        );
        assert_eq!(
            resolved.risk_tolerance.level_for(RiskCategory::Critical),
            ApprovalLevel::Mandatory
        );
        assert_eq!(resolved.spend_limits.per_action, Some(500.0));
        assert_eq!(resolved.spend_limits.daily, Some(2500.0));
    }

    #[test]
    fn locked_profile_is_all_mandatory_zero_spend() {
        let mut s = spec();
        s.governance_profile = Some(GovernanceProfile::Locked);
        let resolved = IdentityResolver::resolve(&s, &[], &ctx(), &[]);
        assert_eq!(
            resolved.risk_tolerance,
            RiskTolerance::uniform(ApprovalLevel::Mandatory)
        );
        assert_eq!(resolved.spend_limits.per_action, Some(0.0));
    }

    #[test]
    fn trusted_competence_adds_trust_behavior() {
        let record = CompetenceRecord {
            principal_id: "p1".into(),
            action_type: "ads.budget.decrease".into(),
            success_count: 12,
            failure_count: 0,
            rollback_count: 0,
            current_streak: 12,
            score: 88.0,
            should_trust: true,
            should_deny: false,
            updated_at: Utc::now(),
        };
        let resolved = IdentityResolver::resolve(&spec(), &[], &ctx(), &[record]);
        assert!(resolved
            .trust_behaviors
            .contains(&"ads.budget.decrease".to_string()));
    }

    #[test]
    fn deny_worthy_competence_promotes_to_forbidden() {
        let record = CompetenceRecord {
            principal_id: "p1".into(),
            action_type: "ads.campaign.pause".into(),
            success_count: 1,
            failure_count: 9,
            rollback_count: 2,
            current_streak: 0,
            score: 8.0,
            should_trust: false,
            should_deny: true,
            updated_at: Utc::now(),
        };
        let resolved = IdentityResolver::resolve(&spec(), &[], &ctx(), &[record]);
        assert!(!resolved
            .trust_behaviors
            .contains(&"ads.campaign.pause".to_string()));
        assert!(resolved
            .forbidden_behaviors
            .contains(&"ads.campaign.pause".to_string()));
    }

    #[test]
    fn cartridge_spend_override_wins() {
        let mut s = spec();
        s.cartridge_spend_overrides.insert(
            "pay-core".into(),
            SpendLimits {
                per_action: Some(50.0),
                ..Default::default()
            },
        );

        let for_pay = IdentityResolver::resolve(
            &s,
            &[],
            &ActivationContext::for_cartridge("pay-core"),
            &[],
        );
        assert_eq!(for_pay.spend_limits.per_action, Some(50.0));

        let for_ads = IdentityResolver::resolve(
            &s,
            &[],
            &ActivationContext::for_cartridge("ads-spend"),
            &[],
        );
        assert_eq!(for_ads.spend_limits.per_action, Some(1000.0));
    }

    #[test]
    fn locked_profile_tightens_cartridge_override_too() {
        let mut s = spec();
        s.governance_profile = Some(GovernanceProfile::Locked);
        s.cartridge_spend_overrides.insert(
            "pay-core".into(),
            SpendLimits {
                per_action: Some(50.0),
                ..Default::default()
            },
        );
        let resolved = IdentityResolver::resolve(
            &s,
            &[],
            &ActivationContext::for_cartridge("pay-core"),
            &[],
        );
        assert_eq!(resolved.spend_limits.per_action, Some(0.0));
    }
}
