//! Composite (burst) risk: recent activity by the same principal bumps
//! the score of the next action. A lone $200 change is not the same risk
//! as the twentieth change in an hour.

use serde::{Deserialize, Serialize};
use tracing::debug;

use warden_types::{CompositeContext, RiskFactor, RiskScore};
#[cfg(test)]
use warden_types::RiskCategory;

use crate::RiskScoringConfig;

/// Thresholds and weights for the burst bumps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeConfig {
    /// Recent actions tolerated before the velocity bump kicks in.
    pub action_count_grace: u32,
    /// Bump added per `action_count_step` actions beyond the grace count.
    pub action_count_step: u32,
    pub action_count_bump: f64,
    /// Cumulative dollars beyond which the exposure bump applies.
    pub cumulative_dollar_threshold: f64,
    pub cumulative_dollar_bump: f64,
    /// Distinct entities / cartridges beyond which fan-out bumps apply.
    pub entity_fanout_threshold: u32,
    pub cartridge_fanout_threshold: u32,
    pub fanout_bump: f64,
}

impl Default for CompositeConfig {
    fn default() -> Self {
        Self {
            action_count_grace: 5,
            action_count_step: 5,
            action_count_bump: 5.0,
            cumulative_dollar_threshold: 10_000.0,
            cumulative_dollar_bump: 5.0,
            entity_fanout_threshold: 3,
            cartridge_fanout_threshold: 2,
            fanout_bump: 5.0,
        }
    }
}

/// Result of applying composite context to a base score.
#[derive(Debug, Clone)]
pub struct CompositeOutcome {
    pub score: RiskScore,
    /// True when the bump pushed the score into a higher band.
    pub category_increased: bool,
    pub bump: f64,
}

/// Re-score under recent-activity pressure. The factor list of the
/// returned score extends the base factors with the bump contributions.
pub fn apply_composite(
    base: &RiskScore,
    context: &CompositeContext,
    composite: &CompositeConfig,
    scoring: &RiskScoringConfig,
) -> CompositeOutcome {
    let mut factors = base.factors.clone();
    let mut bump = 0.0;

    if context.recent_action_count > composite.action_count_grace {
        let excess = context.recent_action_count - composite.action_count_grace;
        let steps = excess.div_ceil(composite.action_count_step.max(1));
        let term = steps as f64 * composite.action_count_bump;
        bump += term;
        factors.push(RiskFactor {
            name: "composite:velocity".into(),
            contribution: term,
        });
    }

    if context.cumulative_dollars > composite.cumulative_dollar_threshold {
        bump += composite.cumulative_dollar_bump;
        factors.push(RiskFactor {
            name: "composite:cumulative_exposure".into(),
            contribution: composite.cumulative_dollar_bump,
        });
    }

    if context.distinct_entities >= composite.entity_fanout_threshold
        || context.distinct_cartridges >= composite.cartridge_fanout_threshold
    {
        bump += composite.fanout_bump;
        factors.push(RiskFactor {
            name: "composite:fanout".into(),
            contribution: composite.fanout_bump,
        });
    }

    let raw = (base.raw + bump).min(100.0);
    let category = scoring.categorize(raw);
    let category_increased = category > base.category;
    if category_increased {
        debug!(
            base = base.raw,
            bumped = raw,
            from = base.category.as_str(),
            to = category.as_str(),
            "Composite risk raised category"
        );
    }

    CompositeOutcome {
        score: RiskScore {
            raw,
            category,
            factors,
        },
        category_increased,
        bump,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(raw: f64, category: RiskCategory) -> RiskScore {
        RiskScore {
            raw,
            category,
            factors: vec![],
        }
    }

    fn quiet() -> CompositeContext {
        CompositeContext {
            recent_action_count: 0,
            cumulative_dollars: 0.0,
            distinct_entities: 0,
            distinct_cartridges: 0,
            window_minutes: 60,
        }
    }

    #[test]
    fn quiet_window_adds_nothing() {
        let outcome = apply_composite(
            &base(30.0, RiskCategory::Low),
            &quiet(),
            &CompositeConfig::default(),
            &RiskScoringConfig::default(),
        );
        assert_eq!(outcome.bump, 0.0);
        assert!(!outcome.category_increased);
        assert_eq!(outcome.score.raw, 30.0);
    }

    #[test]
    fn velocity_bump_scales_with_excess() {
        let mut ctx = quiet();
        ctx.recent_action_count = 6; // 1 over grace → 1 step
        let one = apply_composite(
            &base(10.0, RiskCategory::None),
            &ctx,
            &CompositeConfig::default(),
            &RiskScoringConfig::default(),
        );
        assert_eq!(one.bump, 5.0);

        ctx.recent_action_count = 16; // 11 over grace → 3 steps
        let three = apply_composite(
            &base(10.0, RiskCategory::None),
            &ctx,
            &CompositeConfig::default(),
            &RiskScoringConfig::default(),
        );
        assert_eq!(three.bump, 15.0);
    }

    #[test]
    fn category_increase_is_flagged() {
        let mut ctx = quiet();
        ctx.recent_action_count = 6;
        // 38 + 5 = 43 crosses the 40 boundary into medium
        let outcome = apply_composite(
            &base(38.0, RiskCategory::Low),
            &ctx,
            &CompositeConfig::default(),
            &RiskScoringConfig::default(),
        );
        assert!(outcome.category_increased);
        assert_eq!(outcome.score.category, RiskCategory::Medium);
    }

    #[test]
    fn fanout_and_exposure_bumps_combine() {
        let mut ctx = quiet();
        ctx.cumulative_dollars = 25_000.0;
        ctx.distinct_entities = 4;
        let outcome = apply_composite(
            &base(10.0, RiskCategory::None),
            &ctx,
            &CompositeConfig::default(),
            &RiskScoringConfig::default(),
        );
        assert_eq!(outcome.bump, 10.0);
        assert_eq!(outcome.score.factors.len(), 2);
    }

    #[test]
    fn bumped_score_saturates() {
        let mut ctx = quiet();
        ctx.recent_action_count = 100;
        let outcome = apply_composite(
            &base(95.0, RiskCategory::Critical),
            &ctx,
            &CompositeConfig::default(),
            &RiskScoringConfig::default(),
        );
        assert_eq!(outcome.score.raw, 100.0);
        assert!(!outcome.category_increased);
    }
}
