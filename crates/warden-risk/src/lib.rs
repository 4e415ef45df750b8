//! Risk scoring.
//!
//! Maps a [`RiskInput`] — base class, dollar exposure, blast radius,
//! reversibility, sensitivity flags — onto a 0–100 score with a band and
//! an ordered factor breakdown. All weights live in [`RiskScoringConfig`]
//! so deployments can tune them without touching the algorithm.

mod composite;

pub use composite::{apply_composite, CompositeConfig, CompositeOutcome};

use serde::{Deserialize, Serialize};

use warden_types::{Reversibility, RiskCategory, RiskFactor, RiskInput, RiskScore};

/// Additive weight per base risk class.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BaseWeights {
    pub none: f64,
    pub low: f64,
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl BaseWeights {
    fn weight_for(&self, category: RiskCategory) -> f64 {
        match category {
            RiskCategory::None => self.none,
            RiskCategory::Low => self.low,
            RiskCategory::Medium => self.medium,
            RiskCategory::High => self.high,
            RiskCategory::Critical => self.critical,
        }
    }
}

impl Default for BaseWeights {
    fn default() -> Self {
        Self {
            none: 0.0,
            low: 15.0,
            medium: 35.0,
            high: 55.0,
            critical: 80.0,
        }
    }
}

/// Upper bound (inclusive) of each band below critical.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CategoryThresholds {
    pub none_max: f64,
    pub low_max: f64,
    pub medium_max: f64,
    pub high_max: f64,
}

impl Default for CategoryThresholds {
    fn default() -> Self {
        Self {
            none_max: 20.0,
            low_max: 40.0,
            medium_max: 60.0,
            high_max: 80.0,
        }
    }
}

/// All scoring weights. Defaults match the documented algorithm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskScoringConfig {
    pub base_weights: BaseWeights,
    pub dollar_weight: f64,
    /// Dollars at which the exposure term saturates.
    pub dollar_saturation: f64,
    pub blast_radius_weight: f64,
    /// Cap on the log₂ blast-radius multiplier.
    pub blast_radius_log_cap: f64,
    pub irreversibility_penalty: f64,
    pub entity_volatile_weight: f64,
    pub learning_phase_weight: f64,
    pub recently_modified_weight: f64,
    pub thresholds: CategoryThresholds,
}

impl Default for RiskScoringConfig {
    fn default() -> Self {
        Self {
            base_weights: BaseWeights::default(),
            dollar_weight: 20.0,
            dollar_saturation: 10_000.0,
            blast_radius_weight: 10.0,
            blast_radius_log_cap: 2.0,
            irreversibility_penalty: 20.0,
            entity_volatile_weight: 5.0,
            learning_phase_weight: 5.0,
            recently_modified_weight: 5.0,
            thresholds: CategoryThresholds::default(),
        }
    }
}

impl RiskScoringConfig {
    /// Band for a raw score. Boundaries are inclusive on the left: a score
    /// exactly at a threshold stays in the lower band.
    pub fn categorize(&self, score: f64) -> RiskCategory {
        let t = &self.thresholds;
        if score <= t.none_max {
            RiskCategory::None
        } else if score <= t.low_max {
            RiskCategory::Low
        } else if score <= t.medium_max {
            RiskCategory::Medium
        } else if score <= t.high_max {
            RiskCategory::High
        } else {
            RiskCategory::Critical
        }
    }
}

/// Computes risk scores from cartridge-supplied inputs.
#[derive(Debug, Clone, Default)]
pub struct RiskScorer {
    config: RiskScoringConfig,
}

impl RiskScorer {
    pub fn new(config: RiskScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskScoringConfig {
        &self.config
    }

    /// Score an input. The factor list records every non-zero
    /// contribution in evaluation order.
    pub fn score(&self, input: &RiskInput) -> RiskScore {
        let cfg = &self.config;
        let mut factors = Vec::new();
        let mut raw = 0.0;

        let base = cfg.base_weights.weight_for(input.base_risk);
        raw += base;
        factors.push(RiskFactor {
            name: format!("base_risk:{}", input.base_risk.as_str()),
            contribution: base,
        });

        let dollars = input.exposure.dollars_at_risk.max(0.0);
        let dollar_term = (dollars / cfg.dollar_saturation).min(1.0) * cfg.dollar_weight;
        if dollar_term > 0.0 {
            raw += dollar_term;
            factors.push(RiskFactor {
                name: "dollars_at_risk".into(),
                contribution: dollar_term,
            });
        }

        let radius = input.exposure.blast_radius.max(1) as f64;
        let radius_term = radius.log2().min(cfg.blast_radius_log_cap) * cfg.blast_radius_weight;
        if radius_term > 0.0 {
            raw += radius_term;
            factors.push(RiskFactor {
                name: "blast_radius".into(),
                contribution: radius_term,
            });
        }

        let irreversibility = match input.reversibility {
            Reversibility::Full => 0.0,
            Reversibility::Partial => 0.5,
            Reversibility::None => 1.0,
        } * cfg.irreversibility_penalty;
        if irreversibility > 0.0 {
            raw += irreversibility;
            factors.push(RiskFactor {
                name: "irreversibility".into(),
                contribution: irreversibility,
            });
        }

        for (flag, name, weight) in [
            (
                input.sensitivity.entity_volatile,
                "entity_volatile",
                cfg.entity_volatile_weight,
            ),
            (
                input.sensitivity.learning_phase,
                "learning_phase",
                cfg.learning_phase_weight,
            ),
            (
                input.sensitivity.recently_modified,
                "recently_modified",
                cfg.recently_modified_weight,
            ),
        ] {
            if flag {
                raw += weight;
                factors.push(RiskFactor {
                    name: name.into(),
                    contribution: weight,
                });
            }
        }

        let raw = raw.min(100.0);
        RiskScore {
            raw,
            category: self.config.categorize(raw),
            factors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_types::{Exposure, Sensitivity};

    fn input(base: RiskCategory, dollars: f64, radius: u32, rev: Reversibility) -> RiskInput {
        RiskInput {
            base_risk: base,
            exposure: Exposure {
                dollars_at_risk: dollars,
                blast_radius: radius,
            },
            reversibility: rev,
            sensitivity: Sensitivity::default(),
        }
    }

    #[test]
    fn base_weights_alone() {
        let scorer = RiskScorer::default();
        let score = scorer.score(&input(RiskCategory::Medium, 0.0, 1, Reversibility::Full));
        assert_eq!(score.raw, 35.0);
        assert_eq!(score.category, RiskCategory::Low);
    }

    #[test]
    fn dollar_exposure_saturates() {
        let scorer = RiskScorer::default();
        let at_cap = scorer.score(&input(RiskCategory::None, 10_000.0, 1, Reversibility::Full));
        let over_cap = scorer.score(&input(RiskCategory::None, 1_000_000.0, 1, Reversibility::Full));
        assert_eq!(at_cap.raw, 20.0);
        assert_eq!(over_cap.raw, 20.0);
    }

    #[test]
    fn blast_radius_is_log_scaled_and_capped() {
        let scorer = RiskScorer::default();
        let r1 = scorer.score(&input(RiskCategory::None, 0.0, 1, Reversibility::Full));
        let r4 = scorer.score(&input(RiskCategory::None, 0.0, 4, Reversibility::Full));
        let r64 = scorer.score(&input(RiskCategory::None, 0.0, 64, Reversibility::Full));
        assert_eq!(r1.raw, 0.0);
        assert_eq!(r4.raw, 20.0); // log2(4) = 2
        assert_eq!(r64.raw, 20.0); // capped at 2 × weight
    }

    #[test]
    fn irreversibility_penalty_scales() {
        let scorer = RiskScorer::default();
        let partial = scorer.score(&input(RiskCategory::None, 0.0, 1, Reversibility::Partial));
        let none = scorer.score(&input(RiskCategory::None, 0.0, 1, Reversibility::None));
        assert_eq!(partial.raw, 10.0);
        assert_eq!(none.raw, 20.0);
    }

    #[test]
    fn sensitivity_bumps_add_up() {
        let scorer = RiskScorer::default();
        let mut input = input(RiskCategory::None, 0.0, 1, Reversibility::Full);
        input.sensitivity = Sensitivity {
            entity_volatile: true,
            learning_phase: true,
            recently_modified: true,
        };
        let score = scorer.score(&input);
        assert_eq!(score.raw, 15.0);
        assert_eq!(score.factors.len(), 4); // base + three flags
    }

    #[test]
    fn score_saturates_at_100() {
        let scorer = RiskScorer::default();
        let mut worst = input(RiskCategory::Critical, 1_000_000.0, 1000, Reversibility::None);
        worst.sensitivity = Sensitivity {
            entity_volatile: true,
            learning_phase: true,
            recently_modified: true,
        };
        let score = scorer.score(&worst);
        assert_eq!(score.raw, 100.0);
        assert_eq!(score.category, RiskCategory::Critical);
    }

    #[test]
    fn band_boundaries_are_inclusive_left() {
        let cfg = RiskScoringConfig::default();
        assert_eq!(cfg.categorize(0.0), RiskCategory::None);
        assert_eq!(cfg.categorize(20.0), RiskCategory::None);
        assert_eq!(cfg.categorize(20.01), RiskCategory::Low);
        assert_eq!(cfg.categorize(40.0), RiskCategory::Low);
        assert_eq!(cfg.categorize(60.0), RiskCategory::Medium);
        assert_eq!(cfg.categorize(80.0), RiskCategory::High);
        assert_eq!(cfg.categorize(80.01), RiskCategory::Critical);
        assert_eq!(cfg.categorize(100.0), RiskCategory::Critical);
    }

    #[test]
    fn spec_scenario_medium_band() {
        // high base + $500 + radius 1 + fully reversible ≈ 56 → medium
        let scorer = RiskScorer::default();
        let score = scorer.score(&input(RiskCategory::High, 500.0, 1, Reversibility::Full));
        assert_eq!(score.raw, 56.0);
        assert_eq!(score.category, RiskCategory::Medium);
    }

    #[test]
    fn factors_record_contributions_in_order() {
        let scorer = RiskScorer::default();
        let score = scorer.score(&input(RiskCategory::High, 5_000.0, 2, Reversibility::Partial));
        let names: Vec<&str> = score.factors.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["base_risk:high", "dollars_at_risk", "blast_radius", "irreversibility"]
        );
        let total: f64 = score.factors.iter().map(|f| f.contribution).sum();
        assert!((total - score.raw).abs() < 1e-9);
    }
}
