//! Routing: who approves, and how long they get.

use serde::{Deserialize, Serialize};

use warden_types::{ApprovalLevel, ExpiredBehavior, ResolvedIdentity, RiskCategory};

use crate::ApprovalError;

/// Routing configuration. Delegated approvers from the identity spec are
/// merged with the configured defaults at routing time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRoutingConfig {
    pub default_approvers: Vec<String>,
    pub default_fallback_approver: Option<String>,
    /// Expiry for standard (and none-level) approvals.
    pub default_expiry_ms: u64,
    pub elevated_expiry_ms: u64,
    pub mandatory_expiry_ms: u64,
    pub default_expired_behavior: ExpiredBehavior,
    /// When set and no approver can be determined, the engine denies
    /// instead of creating an unanswerable request.
    pub deny_when_no_approvers: bool,
}

impl Default for ApprovalRoutingConfig {
    fn default() -> Self {
        Self {
            default_approvers: Vec::new(),
            default_fallback_approver: None,
            default_expiry_ms: 24 * 60 * 60 * 1000,
            elevated_expiry_ms: 12 * 60 * 60 * 1000,
            mandatory_expiry_ms: 4 * 60 * 60 * 1000,
            default_expired_behavior: ExpiredBehavior::Deny,
            deny_when_no_approvers: false,
        }
    }
}

/// Where an approval request should go.
#[derive(Debug, Clone)]
pub struct ApprovalRoute {
    pub level: ApprovalLevel,
    pub expiry_ms: u64,
    pub approvers: Vec<String>,
    pub fallback_approver: Option<String>,
    pub expired_behavior: ExpiredBehavior,
}

impl ApprovalRoutingConfig {
    pub fn expiry_for(&self, level: ApprovalLevel) -> u64 {
        match level {
            ApprovalLevel::Mandatory => self.mandatory_expiry_ms,
            ApprovalLevel::Elevated => self.elevated_expiry_ms,
            ApprovalLevel::Standard | ApprovalLevel::None => self.default_expiry_ms,
        }
    }

    /// Build the route for an identity at a risk category. The level is
    /// the identity's tolerance for that category unless the caller
    /// already computed one.
    pub fn route(
        &self,
        identity: &ResolvedIdentity,
        category: RiskCategory,
        level: Option<ApprovalLevel>,
    ) -> Result<ApprovalRoute, ApprovalError> {
        let level = level.unwrap_or_else(|| identity.risk_tolerance.level_for(category));

        let mut approvers = self.default_approvers.clone();
        for delegated in &identity.delegated_approvers {
            if !approvers.contains(delegated) {
                approvers.push(delegated.clone());
            }
        }
        let fallback = self.default_fallback_approver.clone();

        if self.deny_when_no_approvers && approvers.is_empty() && fallback.is_none() {
            return Err(ApprovalError::NoApprovers);
        }

        Ok(ApprovalRoute {
            level,
            expiry_ms: self.expiry_for(level),
            approvers,
            fallback_approver: fallback,
            expired_behavior: self.default_expired_behavior,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_types::{RiskTolerance, SpendLimits};

    fn identity() -> ResolvedIdentity {
        ResolvedIdentity {
            principal_id: "p1".into(),
            risk_tolerance: RiskTolerance::guarded(),
            spend_limits: SpendLimits::default(),
            forbidden_behaviors: vec![],
            trust_behaviors: vec![],
            delegated_approvers: vec!["delegate-1".into()],
            applied_overlays: vec![],
            governance_profile: None,
        }
    }

    fn config() -> ApprovalRoutingConfig {
        ApprovalRoutingConfig {
            default_approvers: vec!["admin".into()],
            ..Default::default()
        }
    }

    #[test]
    fn expiry_tiers() {
        let cfg = ApprovalRoutingConfig::default();
        assert_eq!(cfg.expiry_for(ApprovalLevel::Mandatory), 4 * 3_600_000);
        assert_eq!(cfg.expiry_for(ApprovalLevel::Elevated), 12 * 3_600_000);
        assert_eq!(cfg.expiry_for(ApprovalLevel::Standard), 24 * 3_600_000);
    }

    #[test]
    fn level_comes_from_tolerance_when_not_given() {
        let route = config()
            .route(&identity(), RiskCategory::Medium, None)
            .unwrap();
        assert_eq!(route.level, ApprovalLevel::Standard);
    }

    #[test]
    fn explicit_level_wins() {
        let route = config()
            .route(&identity(), RiskCategory::Medium, Some(ApprovalLevel::Mandatory))
            .unwrap();
        assert_eq!(route.level, ApprovalLevel::Mandatory);
        assert_eq!(route.expiry_ms, 4 * 3_600_000);
    }

    #[test]
    fn delegated_approvers_are_merged() {
        let route = config()
            .route(&identity(), RiskCategory::Medium, None)
            .unwrap();
        assert_eq!(route.approvers, vec!["admin".to_string(), "delegate-1".to_string()]);
    }

    #[test]
    fn deny_when_no_approvers() {
        let mut cfg = ApprovalRoutingConfig {
            deny_when_no_approvers: true,
            ..Default::default()
        };
        let mut id = identity();
        id.delegated_approvers.clear();

        assert!(matches!(
            cfg.route(&id, RiskCategory::Medium, None),
            Err(ApprovalError::NoApprovers)
        ));

        cfg.default_fallback_approver = Some("fallback".into());
        assert!(cfg.route(&id, RiskCategory::Medium, None).is_ok());
    }
}
