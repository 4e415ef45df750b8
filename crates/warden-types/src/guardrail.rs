//! Guardrail configuration supplied by cartridges: rate limits,
//! cooldowns, and protected entities. The runtime state that backs them
//! lives in `warden-guardrails`.

use serde::{Deserialize, Serialize};

/// What a rate limit or cooldown is keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailScope {
    /// One shared counter for everyone.
    Global,
    /// One counter per principal.
    User,
}

/// At most `max_actions` executions per `window_ms` for matching actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitRule {
    pub scope: GuardrailScope,
    /// Action type this limit applies to; `None` covers every action the
    /// cartridge handles.
    pub action_type: Option<String>,
    pub max_actions: u32,
    pub window_ms: u64,
}

impl RateLimitRule {
    /// Counter key: `"global"` for global scope, otherwise
    /// `"<principal>:<action-type>"`.
    pub fn scope_key(&self, principal_id: &str, action_type: &str) -> String {
        match self.scope {
            GuardrailScope::Global => "global".to_string(),
            GuardrailScope::User => {
                let action = self.action_type.as_deref().unwrap_or(action_type);
                format!("{principal_id}:{action}")
            }
        }
    }

    pub fn applies_to(&self, action_type: &str) -> bool {
        match &self.action_type {
            Some(t) => t == action_type,
            None => true,
        }
    }
}

/// Minimum quiet period per entity between matching actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CooldownRule {
    /// Action type, or `"*"` for all actions.
    pub action_type: String,
    pub cooldown_ms: u64,
}

impl CooldownRule {
    pub fn applies_to(&self, action_type: &str) -> bool {
        self.action_type == "*" || self.action_type == action_type
    }

    /// Cooldown stamp key: `"<principal>:<entity-id>"`.
    pub fn entity_key(principal_id: &str, entity_id: &str) -> String {
        format!("{principal_id}:{entity_id}")
    }
}

/// An entity no action may touch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectedEntity {
    pub entity_id: String,
    pub reason: Option<String>,
}

/// The full guardrail set a cartridge declares.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Guardrails {
    #[serde(default)]
    pub rate_limits: Vec<RateLimitRule>,
    #[serde(default)]
    pub cooldowns: Vec<CooldownRule>,
    #[serde(default)]
    pub protected_entities: Vec<ProtectedEntity>,
}
