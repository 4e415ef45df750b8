//! Per (principal, action-type) competence tracking.
//!
//! Successes raise the score with a streak bonus, failures and rollbacks
//! pull it down. Crossing the trust or deny thresholds returns a
//! [`TrustTransition`] so the orchestrator can audit the change; the
//! tracker itself only touches the identity store.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use warden_storage::IdentityStore;
use warden_types::CompetenceRecord;

use crate::IdentityError;

/// Scoring thresholds and weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompetenceConfig {
    /// Score a fresh record starts at.
    pub initial_score: f64,
    /// Added per success before the streak bonus.
    pub success_base: f64,
    /// Streak length at which the bonus stops growing.
    pub streak_cap: u32,
    /// Streak bonus is `min(streak, streak_cap) / streak_divisor`.
    pub streak_divisor: f64,
    pub failure_penalty: f64,
    pub rollback_penalty: f64,
    /// Trust requires both the score and the success count.
    pub trust_score: f64,
    pub trust_min_successes: u32,
    /// Below this, trust is withdrawn.
    pub untrust_score: f64,
    /// Below this, the action becomes deny-worthy.
    pub deny_score: f64,
}

impl Default for CompetenceConfig {
    fn default() -> Self {
        Self {
            initial_score: 50.0,
            success_base: 3.0,
            streak_cap: 10,
            streak_divisor: 2.0,
            failure_penalty: 8.0,
            rollback_penalty: 15.0,
            trust_score: 80.0,
            trust_min_successes: 10,
            untrust_score: 60.0,
            deny_score: 20.0,
        }
    }
}

/// A flag flip worth auditing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustTransitionKind {
    TrustGained,
    TrustLost,
    DenyImposed,
    DenyLifted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustTransition {
    pub principal_id: String,
    pub action_type: String,
    pub kind: TrustTransitionKind,
    pub score: f64,
}

/// Tracks outcomes and derives should_trust / should_deny.
pub struct CompetenceTracker {
    store: Arc<dyn IdentityStore>,
    config: CompetenceConfig,
}

impl CompetenceTracker {
    pub fn new(store: Arc<dyn IdentityStore>, config: CompetenceConfig) -> Self {
        Self { store, config }
    }

    pub async fn record_success(
        &self,
        principal_id: &str,
        action_type: &str,
    ) -> Result<Vec<TrustTransition>, IdentityError> {
        self.mutate(principal_id, action_type, |record, config| {
            record.success_count += 1;
            record.current_streak += 1;
            let streak_bonus =
                record.current_streak.min(config.streak_cap) as f64 / config.streak_divisor;
            record.score += config.success_base + streak_bonus;
        })
        .await
    }

    pub async fn record_failure(
        &self,
        principal_id: &str,
        action_type: &str,
    ) -> Result<Vec<TrustTransition>, IdentityError> {
        self.mutate(principal_id, action_type, |record, config| {
            record.failure_count += 1;
            record.current_streak = 0;
            record.score -= config.failure_penalty;
        })
        .await
    }

    /// Applied against the original action of an undone envelope, not the
    /// reverse action.
    pub async fn record_rollback(
        &self,
        principal_id: &str,
        action_type: &str,
    ) -> Result<Vec<TrustTransition>, IdentityError> {
        self.mutate(principal_id, action_type, |record, config| {
            record.rollback_count += 1;
            record.score -= config.rollback_penalty;
        })
        .await
    }

    /// Current record, if any outcome has ever been tracked.
    pub async fn get_adjustment(
        &self,
        principal_id: &str,
        action_type: &str,
    ) -> Result<Option<CompetenceRecord>, IdentityError> {
        Ok(self
            .store
            .get_competence_record(principal_id, action_type)
            .await?)
    }

    async fn mutate(
        &self,
        principal_id: &str,
        action_type: &str,
        apply: impl FnOnce(&mut CompetenceRecord, &CompetenceConfig),
    ) -> Result<Vec<TrustTransition>, IdentityError> {
        let mut record = self
            .store
            .get_competence_record(principal_id, action_type)
            .await?
            .unwrap_or_else(|| self.fresh_record(principal_id, action_type));

        let trusted_before = record.should_trust;
        let denied_before = record.should_deny;

        apply(&mut record, &self.config);
        record.score = record.score.clamp(0.0, 100.0);
        record.updated_at = Utc::now();

        self.reflag(&mut record);

        let mut transitions = Vec::new();
        if record.should_trust != trusted_before {
            transitions.push(self.transition(
                &record,
                if record.should_trust {
                    TrustTransitionKind::TrustGained
                } else {
                    TrustTransitionKind::TrustLost
                },
            ));
        }
        if record.should_deny != denied_before {
            transitions.push(self.transition(
                &record,
                if record.should_deny {
                    TrustTransitionKind::DenyImposed
                } else {
                    TrustTransitionKind::DenyLifted
                },
            ));
        }

        for t in &transitions {
            info!(
                principal = %t.principal_id,
                action = %t.action_type,
                kind = ?t.kind,
                score = t.score,
                "Competence flag changed"
            );
        }

        self.store.save_competence_record(record).await?;
        Ok(transitions)
    }

    fn reflag(&self, record: &mut CompetenceRecord) {
        let config = &self.config;
        if record.score >= config.trust_score
            && record.success_count >= config.trust_min_successes
        {
            record.should_trust = true;
        } else if record.score < config.untrust_score {
            record.should_trust = false;
        }
        record.should_deny = record.score < config.deny_score;
    }

    fn fresh_record(&self, principal_id: &str, action_type: &str) -> CompetenceRecord {
        CompetenceRecord {
            principal_id: principal_id.to_string(),
            action_type: action_type.to_string(),
            success_count: 0,
            failure_count: 0,
            rollback_count: 0,
            current_streak: 0,
            score: self.config.initial_score,
            should_trust: false,
            should_deny: false,
            updated_at: Utc::now(),
        }
    }

    fn transition(&self, record: &CompetenceRecord, kind: TrustTransitionKind) -> TrustTransition {
        TrustTransition {
            principal_id: record.principal_id.clone(),
            action_type: record.action_type.clone(),
            kind,
            score: record.score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_storage::MemoryIdentityStore;

    fn tracker() -> CompetenceTracker {
        CompetenceTracker::new(
            Arc::new(MemoryIdentityStore::new()),
            CompetenceConfig::default(),
        )
    }

    #[tokio::test]
    async fn success_raises_score_with_streak_bonus() {
        let tracker = tracker();
        tracker.record_success("p1", "a").await.unwrap();
        let record = tracker.get_adjustment("p1", "a").await.unwrap().unwrap();
        // 50 + 3 + min(1, 10)/2
        assert_eq!(record.score, 53.5);
        assert_eq!(record.current_streak, 1);
    }

    #[tokio::test]
    async fn failure_resets_streak_and_drops_score() {
        let tracker = tracker();
        tracker.record_success("p1", "a").await.unwrap();
        tracker.record_success("p1", "a").await.unwrap();
        tracker.record_failure("p1", "a").await.unwrap();

        let record = tracker.get_adjustment("p1", "a").await.unwrap().unwrap();
        assert_eq!(record.current_streak, 0);
        assert_eq!(record.failure_count, 1);
        // 50 + 3.5 + 4 − 8
        assert_eq!(record.score, 49.5);
    }

    #[tokio::test]
    async fn trust_requires_score_and_volume() {
        let tracker = tracker();
        for _ in 0..9 {
            let transitions = tracker.record_success("p1", "a").await.unwrap();
            assert!(transitions.is_empty());
        }
        // Tenth success crosses both thresholds.
        let transitions = tracker.record_success("p1", "a").await.unwrap();
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].kind, TrustTransitionKind::TrustGained);

        let record = tracker.get_adjustment("p1", "a").await.unwrap().unwrap();
        assert!(record.should_trust);
        assert!(record.score >= 80.0);
    }

    #[tokio::test]
    async fn repeated_failures_impose_deny() {
        let tracker = tracker();
        let mut saw_deny = false;
        for _ in 0..5 {
            let transitions = tracker.record_failure("p1", "a").await.unwrap();
            saw_deny |= transitions
                .iter()
                .any(|t| t.kind == TrustTransitionKind::DenyImposed);
        }
        assert!(saw_deny);
        let record = tracker.get_adjustment("p1", "a").await.unwrap().unwrap();
        assert!(record.should_deny);
        assert!(record.score < 20.0);
    }

    #[tokio::test]
    async fn rollback_hits_harder_than_failure() {
        let tracker = tracker();
        tracker.record_rollback("p1", "a").await.unwrap();
        let record = tracker.get_adjustment("p1", "a").await.unwrap().unwrap();
        assert_eq!(record.score, 35.0);
        assert_eq!(record.rollback_count, 1);
    }

    #[tokio::test]
    async fn score_clamps_to_bounds() {
        let tracker = tracker();
        for _ in 0..10 {
            tracker.record_rollback("p1", "a").await.unwrap();
        }
        let record = tracker.get_adjustment("p1", "a").await.unwrap().unwrap();
        assert_eq!(record.score, 0.0);

        for _ in 0..100 {
            tracker.record_success("p1", "b").await.unwrap();
        }
        let record = tracker.get_adjustment("p1", "b").await.unwrap().unwrap();
        assert_eq!(record.score, 100.0);
    }

    #[tokio::test]
    async fn trust_lost_when_score_sinks() {
        let tracker = tracker();
        for _ in 0..10 {
            tracker.record_success("p1", "a").await.unwrap();
        }
        assert!(tracker
            .get_adjustment("p1", "a")
            .await
            .unwrap()
            .unwrap()
            .should_trust);

        let mut lost = false;
        for _ in 0..6 {
            let transitions = tracker.record_failure("p1", "a").await.unwrap();
            lost |= transitions
                .iter()
                .any(|t| t.kind == TrustTransitionKind::TrustLost);
        }
        assert!(lost);
    }

    #[tokio::test]
    async fn unknown_pair_has_no_adjustment() {
        let tracker = tracker();
        assert!(tracker.get_adjustment("p1", "never").await.unwrap().is_none());
    }
}
