//! Per-principal proposal rate limiting at the orchestrator boundary.
//!
//! Independent of cartridge guardrails: this bounds evaluation compute
//! from a misbehaving caller, denied proposals included.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

/// Fixed-window counter per principal.
pub struct ProposalLimiter {
    max_per_window: u32,
    window: Duration,
    counters: Mutex<HashMap<String, (u32, DateTime<Utc>)>>,
}

impl ProposalLimiter {
    pub fn new(max_per_window: u32, window_ms: u64) -> Self {
        Self {
            max_per_window,
            window: Duration::milliseconds(window_ms as i64),
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Count one proposal attempt; false means over the limit.
    pub fn admit(&self, principal_id: &str, now: DateTime<Utc>) -> bool {
        let mut counters = self.counters.lock();
        let entry = counters
            .entry(principal_id.to_string())
            .or_insert((0, now));
        if now - entry.1 >= self.window {
            *entry = (0, now);
        }
        if entry.0 >= self.max_per_window {
            return false;
        }
        entry.0 += 1;
        true
    }
}
