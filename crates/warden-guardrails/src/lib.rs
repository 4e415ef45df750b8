//! Guardrail state and its pluggable store.
//!
//! [`GuardrailState`] is a process-local cache of rate counters and
//! cooldown stamps, hydrated from a [`GuardrailStateStore`] before policy
//! evaluation and flushed back after a successful execution. The store is
//! the source of truth; nothing here survives a restart except through it.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use warden_types::{CooldownRule, Guardrails, RateLimitRule};

#[derive(Error, Debug)]
pub enum GuardrailError {
    #[error("guardrail store backend error: {0}")]
    Backend(String),
}

/// One rate-limit window counter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateCounter {
    pub count: u32,
    pub window_start: DateTime<Utc>,
}

impl RateCounter {
    pub fn start(now: DateTime<Utc>) -> Self {
        Self {
            count: 1,
            window_start: now,
        }
    }

    /// Has this counter's window lapsed?
    pub fn is_stale(&self, window_ms: u64, now: DateTime<Utc>) -> bool {
        now - self.window_start >= Duration::milliseconds(window_ms as i64)
    }
}

/// Hydrated guardrail state for one evaluation.
#[derive(Debug, Clone, Default)]
pub struct GuardrailState {
    pub rate_counters: HashMap<String, RateCounter>,
    pub cooldowns: HashMap<String, DateTime<Utc>>,
}

impl GuardrailState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Effective counter for a key: a stale window reads as empty.
    pub fn effective_count(&self, key: &str, window_ms: u64, now: DateTime<Utc>) -> u32 {
        match self.rate_counters.get(key) {
            Some(counter) if !counter.is_stale(window_ms, now) => counter.count,
            _ => 0,
        }
    }

    /// Record one execution against a rate key, resetting lapsed windows.
    pub fn bump_rate(&mut self, key: &str, window_ms: u64, now: DateTime<Utc>) -> RateCounter {
        let next = match self.rate_counters.get(key) {
            Some(counter) if !counter.is_stale(window_ms, now) => RateCounter {
                count: counter.count + 1,
                window_start: counter.window_start,
            },
            _ => RateCounter::start(now),
        };
        self.rate_counters.insert(key.to_string(), next);
        next
    }

    /// Stamp a cooldown key with the execution time.
    pub fn stamp_cooldown(&mut self, key: &str, now: DateTime<Utc>) {
        self.cooldowns.insert(key.to_string(), now);
    }

    /// Is the entity still cooling down? Exactly at the boundary is NOT
    /// cooling: denial requires `elapsed < cooldown_ms`.
    pub fn is_cooling(&self, key: &str, cooldown_ms: u64, now: DateTime<Utc>) -> bool {
        match self.cooldowns.get(key) {
            Some(last) => now - *last < Duration::milliseconds(cooldown_ms as i64),
            None => false,
        }
    }
}

/// The scope keys an action may touch, precomputed for hydration.
pub fn collect_keys(
    guardrails: &Guardrails,
    principal_id: &str,
    action_type: &str,
    entity_id: Option<&str>,
) -> (Vec<String>, Vec<String>) {
    let rate_keys: Vec<String> = guardrails
        .rate_limits
        .iter()
        .filter(|r| r.applies_to(action_type))
        .map(|r| r.scope_key(principal_id, action_type))
        .collect();
    let cooldown_keys: Vec<String> = match entity_id {
        Some(entity) => guardrails
            .cooldowns
            .iter()
            .filter(|c| c.applies_to(action_type))
            .map(|_| CooldownRule::entity_key(principal_id, entity))
            .collect(),
        None => Vec::new(),
    };
    (rate_keys, cooldown_keys)
}

/// Matching rate rules paired with their scope keys, used when mutating
/// state after a successful execution.
pub fn matching_rate_rules<'a>(
    guardrails: &'a Guardrails,
    principal_id: &str,
    action_type: &str,
) -> Vec<(&'a RateLimitRule, String)> {
    guardrails
        .rate_limits
        .iter()
        .filter(|r| r.applies_to(action_type))
        .map(|r| (r, r.scope_key(principal_id, action_type)))
        .collect()
}

/// Abstract persistence for guardrail state. Implementations may expire
/// entries lazily once their TTL passes.
#[async_trait]
pub trait GuardrailStateStore: Send + Sync {
    async fn get_rate_limits(
        &self,
        keys: &[String],
    ) -> Result<HashMap<String, RateCounter>, GuardrailError>;

    async fn get_cooldowns(
        &self,
        keys: &[String],
    ) -> Result<HashMap<String, DateTime<Utc>>, GuardrailError>;

    async fn set_rate_limit(
        &self,
        key: &str,
        counter: RateCounter,
        ttl_ms: u64,
    ) -> Result<(), GuardrailError>;

    async fn set_cooldown(
        &self,
        key: &str,
        at: DateTime<Utc>,
        ttl_ms: u64,
    ) -> Result<(), GuardrailError>;
}

/// Hydrate a [`GuardrailState`] from the store for the given keys.
pub async fn hydrate(
    store: &dyn GuardrailStateStore,
    rate_keys: &[String],
    cooldown_keys: &[String],
) -> Result<GuardrailState, GuardrailError> {
    Ok(GuardrailState {
        rate_counters: store.get_rate_limits(rate_keys).await?,
        cooldowns: store.get_cooldowns(cooldown_keys).await?,
    })
}

/// In-memory store: the canonical test double.
#[derive(Default)]
pub struct MemoryGuardrailStore {
    rates: RwLock<HashMap<String, (RateCounter, DateTime<Utc>)>>,
    cooldowns: RwLock<HashMap<String, (DateTime<Utc>, DateTime<Utc>)>>,
}

impl MemoryGuardrailStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GuardrailStateStore for MemoryGuardrailStore {
    async fn get_rate_limits(
        &self,
        keys: &[String],
    ) -> Result<HashMap<String, RateCounter>, GuardrailError> {
        let now = Utc::now();
        let mut guard = self.rates.write();
        guard.retain(|_, (_, expires)| *expires > now);
        Ok(keys
            .iter()
            .filter_map(|k| guard.get(k).map(|(counter, _)| (k.clone(), *counter)))
            .collect())
    }

    async fn get_cooldowns(
        &self,
        keys: &[String],
    ) -> Result<HashMap<String, DateTime<Utc>>, GuardrailError> {
        let now = Utc::now();
        let mut guard = self.cooldowns.write();
        guard.retain(|_, (_, expires)| *expires > now);
        Ok(keys
            .iter()
            .filter_map(|k| guard.get(k).map(|(at, _)| (k.clone(), *at)))
            .collect())
    }

    async fn set_rate_limit(
        &self,
        key: &str,
        counter: RateCounter,
        ttl_ms: u64,
    ) -> Result<(), GuardrailError> {
        let expires = Utc::now() + Duration::milliseconds(ttl_ms as i64);
        self.rates.write().insert(key.to_string(), (counter, expires));
        Ok(())
    }

    async fn set_cooldown(
        &self,
        key: &str,
        at: DateTime<Utc>,
        ttl_ms: u64,
    ) -> Result<(), GuardrailError> {
        let expires = Utc::now() + Duration::milliseconds(ttl_ms as i64);
        self.cooldowns.write().insert(key.to_string(), (at, expires));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_types::GuardrailScope;

    fn rules() -> Guardrails {
        Guardrails {
            rate_limits: vec![RateLimitRule {
                scope: GuardrailScope::User,
                action_type: Some("ads.campaign.pause".into()),
                max_actions: 2,
                window_ms: 60_000,
            }],
            cooldowns: vec![CooldownRule {
                action_type: "*".into(),
                cooldown_ms: 30_000,
            }],
            protected_entities: vec![],
        }
    }

    #[test]
    fn effective_count_ignores_stale_windows() {
        let mut state = GuardrailState::new();
        let now = Utc::now();
        state.rate_counters.insert(
            "k".into(),
            RateCounter {
                count: 5,
                window_start: now - Duration::milliseconds(120_000),
            },
        );
        assert_eq!(state.effective_count("k", 60_000, now), 0);
        assert_eq!(state.effective_count("k", 300_000, now), 5);
    }

    #[test]
    fn bump_rate_resets_lapsed_window() {
        let mut state = GuardrailState::new();
        let now = Utc::now();
        state.bump_rate("k", 60_000, now);
        state.bump_rate("k", 60_000, now);
        assert_eq!(state.effective_count("k", 60_000, now), 2);

        let later = now + Duration::milliseconds(61_000);
        let counter = state.bump_rate("k", 60_000, later);
        assert_eq!(counter.count, 1);
        assert_eq!(counter.window_start, later);
    }

    #[test]
    fn cooldown_boundary_is_exclusive() {
        let mut state = GuardrailState::new();
        let now = Utc::now();
        state.stamp_cooldown("e", now);
        let at_boundary = now + Duration::milliseconds(30_000);
        let just_before = now + Duration::milliseconds(29_999);
        assert!(state.is_cooling("e", 30_000, just_before));
        assert!(!state.is_cooling("e", 30_000, at_boundary));
    }

    #[test]
    fn collect_keys_builds_scope_and_entity_keys() {
        let (rate_keys, cooldown_keys) =
            collect_keys(&rules(), "p1", "ads.campaign.pause", Some("c1"));
        assert_eq!(rate_keys, vec!["p1:ads.campaign.pause".to_string()]);
        assert_eq!(cooldown_keys, vec!["p1:c1".to_string()]);
    }

    #[tokio::test]
    async fn memory_store_round_trips() {
        let store = MemoryGuardrailStore::new();
        let now = Utc::now();
        let counter = RateCounter {
            count: 3,
            window_start: now,
        };
        store.set_rate_limit("k", counter, 60_000).await.unwrap();
        store.set_cooldown("e", now, 60_000).await.unwrap();

        let rates = store.get_rate_limits(&["k".to_string()]).await.unwrap();
        assert_eq!(rates.get("k"), Some(&counter));

        let cooldowns = store.get_cooldowns(&["e".to_string()]).await.unwrap();
        assert_eq!(cooldowns.get("e"), Some(&now));
    }

    #[tokio::test]
    async fn memory_store_expires_entries() {
        let store = MemoryGuardrailStore::new();
        let now = Utc::now();
        store
            .set_rate_limit("k", RateCounter::start(now), 0)
            .await
            .unwrap();
        let rates = store.get_rate_limits(&["k".to_string()]).await.unwrap();
        assert!(rates.is_empty());
    }

    #[tokio::test]
    async fn hydrate_reads_only_requested_keys() {
        let store = MemoryGuardrailStore::new();
        let now = Utc::now();
        store
            .set_rate_limit("a", RateCounter::start(now), 60_000)
            .await
            .unwrap();
        store
            .set_rate_limit("b", RateCounter::start(now), 60_000)
            .await
            .unwrap();

        let state = hydrate(&store, &["a".to_string()], &[]).await.unwrap();
        assert!(state.rate_counters.contains_key("a"));
        assert!(!state.rate_counters.contains_key("b"));
    }
}
