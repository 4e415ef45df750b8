//! Delegation-chain resolution.
//!
//! A principal may approve directly (listed approver with the `approver`
//! role) or through a chain of delegation rules, each hop granting the
//! grantee the grantor's authority for a compatible scope. Chains are
//! found breadth-first, so the shortest authorization wins; depth is
//! capped by every traversed rule's `max_chain_depth`.

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};
use tracing::debug;

use warden_types::{pattern_matches, DelegationRule, Principal};

/// Outcome of chain resolution.
#[derive(Debug, Clone)]
pub struct ChainResolution {
    pub authorized: bool,
    /// Responder first, terminal approver last.
    pub chain: Vec<String>,
    /// Number of delegation hops; 0 for a direct approver.
    pub depth: u32,
}

impl ChainResolution {
    fn unauthorized() -> Self {
        Self {
            authorized: false,
            chain: Vec::new(),
            depth: 0,
        }
    }
}

/// Can `principal` approve an action of `action_type` on behalf of one of
/// `approver_ids`?
pub fn can_approve_with_chain(
    principal: &Principal,
    approver_ids: &[String],
    delegations: &[DelegationRule],
    action_type: &str,
    now: DateTime<Utc>,
) -> ChainResolution {
    if approver_ids.iter().any(|a| a == &principal.id) && principal.has_role("approver") {
        return ChainResolution {
            authorized: true,
            chain: vec![principal.id.clone()],
            depth: 0,
        };
    }

    // BFS from the responder as grantee, following edges to grantors.
    let usable: Vec<&DelegationRule> = delegations
        .iter()
        .filter(|rule| rule_is_live(rule, action_type, now))
        .collect();

    let mut visited: HashSet<&str> = HashSet::new();
    visited.insert(principal.id.as_str());

    let mut queue: VecDeque<(String, Vec<String>)> = VecDeque::new();
    queue.push_back((principal.id.clone(), vec![principal.id.clone()]));

    while let Some((current, path)) = queue.pop_front() {
        let hops = path.len() as u32 - 1;
        for rule in &usable {
            if rule.grantee != current {
                continue;
            }
            if hops + 1 > rule.max_chain_depth {
                continue;
            }
            let grantor = rule.grantor.as_str();
            if !visited.insert(grantor) {
                continue;
            }
            let mut next_path = path.clone();
            next_path.push(rule.grantor.clone());

            if approver_ids.iter().any(|a| a == grantor) {
                let depth = next_path.len() as u32 - 1;
                debug!(
                    responder = %principal.id,
                    approver = grantor,
                    depth,
                    "Delegation chain resolved"
                );
                return ChainResolution {
                    authorized: true,
                    chain: next_path,
                    depth,
                };
            }
            queue.push_back((rule.grantor.clone(), next_path));
        }
    }

    ChainResolution::unauthorized()
}

fn rule_is_live(rule: &DelegationRule, action_type: &str, now: DateTime<Utc>) -> bool {
    if let Some(expires) = rule.expires_at {
        if now >= expires {
            return false;
        }
    }
    pattern_matches(&rule.scope, action_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use warden_types::PrincipalType;

    fn principal(id: &str, roles: &[&str]) -> Principal {
        Principal {
            id: id.into(),
            principal_type: PrincipalType::User,
            display_name: id.into(),
            organization_id: None,
            roles: roles.iter().map(|r| r.to_string()).collect(),
        }
    }

    fn rule(id: &str, grantor: &str, grantee: &str, scope: &str) -> DelegationRule {
        DelegationRule {
            id: id.into(),
            grantor: grantor.into(),
            grantee: grantee.into(),
            scope: scope.into(),
            expires_at: None,
            max_chain_depth: 3,
        }
    }

    #[test]
    fn direct_approver_with_role() {
        let result = can_approve_with_chain(
            &principal("admin", &["approver"]),
            &["admin".into()],
            &[],
            "ads.campaign.pause",
            Utc::now(),
        );
        assert!(result.authorized);
        assert_eq!(result.chain, vec!["admin"]);
        assert_eq!(result.depth, 0);
    }

    #[test]
    fn listed_approver_without_role_needs_delegation() {
        let result = can_approve_with_chain(
            &principal("admin", &[]),
            &["admin".into()],
            &[],
            "ads.campaign.pause",
            Utc::now(),
        );
        assert!(!result.authorized);
    }

    #[test]
    fn single_hop_delegation() {
        let result = can_approve_with_chain(
            &principal("delegate", &[]),
            &["admin".into()],
            &[rule("d1", "admin", "delegate", "*")],
            "ads.campaign.pause",
            Utc::now(),
        );
        assert!(result.authorized);
        assert_eq!(result.chain, vec!["delegate", "admin"]);
        assert_eq!(result.depth, 1);
    }

    #[test]
    fn two_hop_chain_resolves() {
        let result = can_approve_with_chain(
            &principal("delegate", &[]),
            &["admin".into()],
            &[
                rule("d1", "admin", "middle", "*"),
                rule("d2", "middle", "delegate", "*"),
            ],
            "ads.campaign.pause",
            Utc::now(),
        );
        assert!(result.authorized);
        assert_eq!(result.chain, vec!["delegate", "middle", "admin"]);
        assert_eq!(result.depth, 2);
    }

    #[test]
    fn expired_rule_breaks_chain() {
        let mut expired = rule("d1", "admin", "delegate", "*");
        expired.expires_at = Some(Utc::now() - Duration::hours(1));
        let result = can_approve_with_chain(
            &principal("delegate", &[]),
            &["admin".into()],
            &[expired],
            "ads.campaign.pause",
            Utc::now(),
        );
        assert!(!result.authorized);
    }

    #[test]
    fn scope_must_cover_action() {
        let scoped = rule("d1", "admin", "delegate", "pay.*");
        let result = can_approve_with_chain(
            &principal("delegate", &[]),
            &["admin".into()],
            std::slice::from_ref(&scoped),
            "ads.campaign.pause",
            Utc::now(),
        );
        assert!(!result.authorized);

        let result = can_approve_with_chain(
            &principal("delegate", &[]),
            &["admin".into()],
            &[scoped],
            "pay.invoice.send",
            Utc::now(),
        );
        assert!(result.authorized);
    }

    #[test]
    fn depth_cap_stops_traversal() {
        let mut shallow = rule("d1", "admin", "middle", "*");
        shallow.max_chain_depth = 1;
        let result = can_approve_with_chain(
            &principal("delegate", &[]),
            &["admin".into()],
            &[shallow, rule("d2", "middle", "delegate", "*")],
            "ads.campaign.pause",
            Utc::now(),
        );
        // The admin→middle edge would be hop 2 but allows at most 1.
        assert!(!result.authorized);
    }

    #[test]
    fn cycles_terminate() {
        let result = can_approve_with_chain(
            &principal("a", &[]),
            &["unreachable".into()],
            &[rule("d1", "b", "a", "*"), rule("d2", "a", "b", "*")],
            "ads.campaign.pause",
            Utc::now(),
        );
        assert!(!result.authorized);
    }
}
