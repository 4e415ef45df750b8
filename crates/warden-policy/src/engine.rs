use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use warden_guardrails::GuardrailState;
use warden_risk::{apply_composite, CompositeConfig, RiskScorer, RiskScoringConfig};
use warden_rules::{evaluate_rule, Policy, PolicyEffect};
use warden_types::{
    pattern_matches, ActionProposal, ApprovalLevel, CheckCode, CheckEffect, CompetenceRecord,
    CompositeContext, CooldownRule, DecisionCheck, DecisionTrace, FinalDecision, Guardrails,
    ResolvedIdentity, RiskInput,
};

use crate::params::{entity_candidates, primary_entity_id};

/// Ambient facts about the evaluation, beyond the proposal itself.
#[derive(Debug, Clone)]
pub struct EvaluationContext {
    pub cartridge_id: Option<String>,
    pub principal_id: String,
    pub organization_id: Option<String>,
    pub metadata: BTreeMap<String, Value>,
    pub now: DateTime<Utc>,
}

/// Spend already accumulated in each window, supplied by the caller when
/// windowed limits should be enforced.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SpendLookup {
    pub daily_spend: f64,
    pub weekly_spend: f64,
    pub monthly_spend: f64,
}

/// Everything one evaluation reads. The engine never mutates any of it.
pub struct EngineInput<'a> {
    pub context: &'a EvaluationContext,
    /// Active policies sorted by ascending priority (the store contract).
    pub policies: &'a [Policy],
    pub guardrails: &'a Guardrails,
    pub guardrail_state: &'a GuardrailState,
    pub identity: &'a ResolvedIdentity,
    pub risk_input: &'a RiskInput,
    pub spend_lookup: Option<SpendLookup>,
    pub composite: Option<CompositeContext>,
    pub competence: &'a [CompetenceRecord],
}

/// Runs the full check pipeline. Stateless; one instance serves every
/// evaluation.
pub struct PolicyEngine {
    scorer: RiskScorer,
    composite_config: CompositeConfig,
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new(RiskScoringConfig::default())
    }
}

impl PolicyEngine {
    pub fn new(config: RiskScoringConfig) -> Self {
        Self {
            scorer: RiskScorer::new(config),
            composite_config: CompositeConfig::default(),
        }
    }

    pub fn with_composite_config(mut self, config: CompositeConfig) -> Self {
        self.composite_config = config;
        self
    }

    /// Evaluate one proposal. Pure with respect to storage and guardrail
    /// state: both `propose` and `simulate` call exactly this.
    pub fn evaluate(&self, proposal: &ActionProposal, input: &EngineInput<'_>) -> DecisionTrace {
        let mut checks: Vec<DecisionCheck> = Vec::new();
        let mut requested_levels: Vec<ApprovalLevel> = Vec::new();
        let mut trusted = false;
        let mut modified = false;

        let action_type = proposal.action_type.as_str();
        let identity = input.identity;
        let now = input.context.now;

        // 1. Forbidden behaviors.
        for pattern in &identity.forbidden_behaviors {
            if pattern_matches(pattern, action_type) {
                checks.push(DecisionCheck::matched(
                    CheckCode::ForbiddenBehavior,
                    CheckEffect::Deny,
                    format!("action type {action_type} matches forbidden pattern {pattern}"),
                    json!({ "pattern": pattern }),
                ));
            }
        }

        // 2. Trust behaviors.
        for pattern in &identity.trust_behaviors {
            if pattern_matches(pattern, action_type) {
                trusted = true;
                checks.push(DecisionCheck::matched(
                    CheckCode::TrustBehavior,
                    CheckEffect::Allow,
                    format!("action type {action_type} matches trusted pattern {pattern}"),
                    json!({ "pattern": pattern }),
                ));
            }
        }

        // 3. Competence trust.
        for record in input
            .competence
            .iter()
            .filter(|r| r.action_type == action_type)
        {
            if record.should_deny {
                checks.push(DecisionCheck::matched(
                    CheckCode::CompetenceTrust,
                    CheckEffect::Deny,
                    format!(
                        "competence score {:.1} is deny-worthy for {action_type}",
                        record.score
                    ),
                    json!({ "score": record.score, "failures": record.failure_count }),
                ));
            } else if record.should_trust {
                trusted = true;
                checks.push(DecisionCheck::matched(
                    CheckCode::CompetenceTrust,
                    CheckEffect::Allow,
                    format!(
                        "competence score {:.1} earns trust for {action_type}",
                        record.score
                    ),
                    json!({ "score": record.score, "successes": record.success_count }),
                ));
            }
        }

        // 4. Rate limits.
        for rule in input
            .guardrails
            .rate_limits
            .iter()
            .filter(|r| r.applies_to(action_type))
        {
            let key = rule.scope_key(&input.context.principal_id, action_type);
            let count = input
                .guardrail_state
                .effective_count(&key, rule.window_ms, now);
            let data = json!({
                "scope_key": key,
                "count": count,
                "max_actions": rule.max_actions,
                "window_ms": rule.window_ms,
            });
            if count >= rule.max_actions {
                checks.push(DecisionCheck::matched(
                    CheckCode::RateLimit,
                    CheckEffect::Deny,
                    format!(
                        "{count} of {} actions used in window for {key}",
                        rule.max_actions
                    ),
                    data,
                ));
            } else {
                checks.push(DecisionCheck::unmatched(
                    CheckCode::RateLimit,
                    format!("{count} of {} actions used in window", rule.max_actions),
                    data,
                ));
            }
        }

        // 5. Cooldowns.
        if let Some(entity_id) = primary_entity_id(&proposal.parameters) {
            let key = CooldownRule::entity_key(&input.context.principal_id, &entity_id);
            for rule in input
                .guardrails
                .cooldowns
                .iter()
                .filter(|c| c.applies_to(action_type))
            {
                let data = json!({
                    "entity_key": key,
                    "cooldown_ms": rule.cooldown_ms,
                });
                if input.guardrail_state.is_cooling(&key, rule.cooldown_ms, now) {
                    checks.push(DecisionCheck::matched(
                        CheckCode::Cooldown,
                        CheckEffect::Deny,
                        format!("entity {entity_id} is cooling down ({} ms)", rule.cooldown_ms),
                        data,
                    ));
                } else {
                    checks.push(DecisionCheck::unmatched(
                        CheckCode::Cooldown,
                        format!("entity {entity_id} is not cooling down"),
                        data,
                    ));
                }
            }
        }

        // 6. Protected entities.
        let candidates = entity_candidates(&proposal.parameters);
        for protected in &input.guardrails.protected_entities {
            if candidates.iter().any(|c| c == &protected.entity_id) {
                checks.push(DecisionCheck::matched(
                    CheckCode::ProtectedEntity,
                    CheckEffect::Deny,
                    match &protected.reason {
                        Some(reason) => {
                            format!("entity {} is protected: {reason}", protected.entity_id)
                        }
                        None => format!("entity {} is protected", protected.entity_id),
                    },
                    json!({ "entity_id": protected.entity_id }),
                ));
            }
        }

        // 7 + 8. Spend limits.
        let amount = proposal.parameters.get("amount").and_then(Value::as_f64);
        self.check_spend(&mut checks, identity, amount, input.spend_lookup.as_ref());

        // 9. Rule policies, in ascending priority; ties keep listing order.
        let rule_context = self.rule_context(proposal, input.context);
        for policy in input.policies {
            let outcome = evaluate_rule(&policy.rule, &rule_context);
            let data = json!({
                "policy_id": policy.id,
                "priority": policy.priority,
                "conditions_evaluated": outcome.condition_results.len(),
            });
            if !outcome.matched {
                checks.push(DecisionCheck::unmatched(
                    CheckCode::PolicyRule,
                    format!("policy {} did not match", policy.name),
                    data,
                ));
                continue;
            }
            match &policy.effect {
                PolicyEffect::Allow => checks.push(DecisionCheck::matched(
                    CheckCode::PolicyRule,
                    CheckEffect::Allow,
                    format!("policy {} allows", policy.name),
                    data,
                )),
                PolicyEffect::Deny => checks.push(DecisionCheck::matched(
                    CheckCode::PolicyRule,
                    CheckEffect::Deny,
                    format!("policy {} denies", policy.name),
                    data,
                )),
                PolicyEffect::RequireApproval { level } => {
                    requested_levels.push(*level);
                    checks.push(DecisionCheck::matched(
                        CheckCode::PolicyRule,
                        CheckEffect::Allow,
                        format!("policy {} requires {} approval", policy.name, level.as_str()),
                        json!({
                            "policy_id": policy.id,
                            "priority": policy.priority,
                            "requires_approval": level,
                        }),
                    ));
                }
                PolicyEffect::Modify { patch } => {
                    modified = true;
                    checks.push(DecisionCheck::matched(
                        CheckCode::PolicyRule,
                        CheckEffect::Modify,
                        format!("policy {} modifies parameters", policy.name),
                        json!({
                            "policy_id": policy.id,
                            "priority": policy.priority,
                            "patch": patch,
                        }),
                    ));
                }
            }
        }

        // 10. Risk scoring (+ composite).
        let base_score = self.scorer.score(input.risk_input);
        checks.push(DecisionCheck::matched(
            CheckCode::RiskScoring,
            CheckEffect::Allow,
            format!(
                "risk score {:.1} ({})",
                base_score.raw,
                base_score.category.as_str()
            ),
            json!({
                "raw": base_score.raw,
                "category": base_score.category,
                "factors": base_score.factors,
            }),
        ));

        let risk_score = match input.composite {
            Some(composite_ctx) => {
                let outcome = apply_composite(
                    &base_score,
                    &composite_ctx,
                    &self.composite_config,
                    self.scorer.config(),
                );
                if outcome.category_increased {
                    checks.push(DecisionCheck::matched(
                        CheckCode::CompositeRisk,
                        CheckEffect::Modify,
                        format!(
                            "recent activity raised risk from {} to {}",
                            base_score.category.as_str(),
                            outcome.score.category.as_str()
                        ),
                        json!({
                            "bump": outcome.bump,
                            "recent_action_count": composite_ctx.recent_action_count,
                            "cumulative_dollars": composite_ctx.cumulative_dollars,
                        }),
                    ));
                }
                outcome.score
            }
            None => base_score,
        };

        // 11. Approval level selection.
        let denied = checks
            .iter()
            .any(|c| c.matched && c.effect == CheckEffect::Deny);
        let mut approval_required = requested_levels
            .iter()
            .copied()
            .max()
            .unwrap_or(ApprovalLevel::None);
        if !trusted {
            approval_required =
                approval_required.max(identity.risk_tolerance.level_for(risk_score.category));
        }

        // 12. Final decision + explanation.
        let final_decision = if denied {
            FinalDecision::Deny
        } else if modified {
            FinalDecision::Modify
        } else {
            FinalDecision::Allow
        };

        let explanation = if denied {
            let detail = checks
                .iter()
                .find(|c| c.matched && c.effect == CheckEffect::Deny)
                .map(|c| c.detail.clone())
                .unwrap_or_default();
            format!("Denied: {detail}")
        } else if approval_required > ApprovalLevel::None {
            format!(
                "Action allowed pending {} approval.",
                approval_required.as_str()
            )
        } else {
            "Action allowed.".to_string()
        };

        debug!(
            action = action_type,
            principal = %input.context.principal_id,
            decision = ?final_decision,
            approval = approval_required.as_str(),
            checks = checks.len(),
            "Evaluation complete"
        );

        DecisionTrace {
            checks,
            risk_score,
            final_decision,
            approval_required,
            explanation,
            evaluated_at: now,
        }
    }

    fn check_spend(
        &self,
        checks: &mut Vec<DecisionCheck>,
        identity: &ResolvedIdentity,
        amount: Option<f64>,
        lookup: Option<&SpendLookup>,
    ) {
        let limits = &identity.spend_limits;

        if let Some(limit) = limits.per_action {
            let data = json!({ "field": "per_action", "limit": limit, "amount": amount });
            match amount {
                Some(amount) if amount > limit => checks.push(DecisionCheck::matched(
                    CheckCode::SpendLimit,
                    CheckEffect::Deny,
                    format!("amount {amount:.2} exceeds per-action limit {limit:.2}"),
                    data,
                )),
                _ => checks.push(DecisionCheck::unmatched(
                    CheckCode::SpendLimit,
                    "within per-action limit",
                    data,
                )),
            }
        }

        let Some(lookup) = lookup else { return };
        let amount = amount.unwrap_or(0.0);
        for (field, current, limit) in [
            ("daily", lookup.daily_spend, limits.daily),
            ("weekly", lookup.weekly_spend, limits.weekly),
            ("monthly", lookup.monthly_spend, limits.monthly),
        ] {
            let Some(limit) = limit else { continue };
            let projected = current + amount;
            let data = json!({
                "field": field,
                "limit": limit,
                "current_spend": current,
                "projected": projected,
            });
            if projected > limit {
                checks.push(DecisionCheck::matched(
                    CheckCode::SpendLimit,
                    CheckEffect::Deny,
                    format!("projected {field} spend {projected:.2} exceeds limit {limit:.2}"),
                    data,
                ));
            } else {
                checks.push(DecisionCheck::unmatched(
                    CheckCode::SpendLimit,
                    format!("within {field} limit"),
                    data,
                ));
            }
        }
    }

    fn rule_context(&self, proposal: &ActionProposal, context: &EvaluationContext) -> Value {
        json!({
            "action_type": proposal.action_type,
            "parameters": proposal.parameters,
            "cartridge_id": context.cartridge_id,
            "principal_id": context.principal_id,
            "organization_id": context.organization_id,
            "confidence": proposal.confidence,
            "metadata": context.metadata,
        })
    }
}
