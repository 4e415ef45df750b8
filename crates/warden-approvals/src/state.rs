//! The approval response state machine.
//!
//! pending → approved | rejected | patched | expired. A decided approval
//! never transitions again; responding to one is an error, which is how
//! concurrent responders resolve to first-wins.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::info;

use warden_types::{ApprovalAction, ApprovalState, ApprovalStatus};

use crate::ApprovalError;

/// Apply a response to a pending approval, returning the new state.
///
/// Expiry is checked first: a pending approval past its deadline flips to
/// expired and the response is rejected with [`ApprovalError::Expired`].
pub fn respond(
    state: &ApprovalState,
    action: ApprovalAction,
    responded_by: &str,
    patch_value: Option<Value>,
    now: DateTime<Utc>,
) -> Result<ApprovalState, ApprovalError> {
    if state.status != ApprovalStatus::Pending {
        return Err(ApprovalError::InvalidTransition(state.status));
    }
    if state.is_expired(now) {
        return Err(ApprovalError::Expired);
    }

    let status = match action {
        ApprovalAction::Approve => ApprovalStatus::Approved,
        ApprovalAction::Reject => ApprovalStatus::Rejected,
        ApprovalAction::Patch => ApprovalStatus::Patched,
    };

    info!(responder = responded_by, to = ?status, "Approval responded");

    Ok(ApprovalState {
        status,
        responded_by: Some(responded_by.to_string()),
        responded_at: Some(now),
        patch_value: if action == ApprovalAction::Patch {
            patch_value
        } else {
            None
        },
        expires_at: state.expires_at,
    })
}

/// Flip a pending approval past its deadline to expired.
pub fn expire(state: &ApprovalState, now: DateTime<Utc>) -> Result<ApprovalState, ApprovalError> {
    if state.status != ApprovalStatus::Pending {
        return Err(ApprovalError::InvalidTransition(state.status));
    }
    Ok(ApprovalState {
        status: ApprovalStatus::Expired,
        responded_by: None,
        responded_at: Some(now),
        patch_value: None,
        expires_at: state.expires_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn pending(now: DateTime<Utc>) -> ApprovalState {
        ApprovalState::pending(now + Duration::hours(1))
    }

    #[test]
    fn approve_records_responder_and_time() {
        let now = Utc::now();
        let next = respond(&pending(now), ApprovalAction::Approve, "admin", None, now).unwrap();
        assert_eq!(next.status, ApprovalStatus::Approved);
        assert_eq!(next.responded_by.as_deref(), Some("admin"));
        assert_eq!(next.responded_at, Some(now));
        assert!(next.patch_value.is_none());
    }

    #[test]
    fn reject_transitions_to_rejected() {
        let now = Utc::now();
        let next = respond(&pending(now), ApprovalAction::Reject, "admin", None, now).unwrap();
        assert_eq!(next.status, ApprovalStatus::Rejected);
    }

    #[test]
    fn patch_keeps_patch_value() {
        let now = Utc::now();
        let next = respond(
            &pending(now),
            ApprovalAction::Patch,
            "admin",
            Some(json!({"amount": 50})),
            now,
        )
        .unwrap();
        assert_eq!(next.status, ApprovalStatus::Patched);
        assert_eq!(next.patch_value, Some(json!({"amount": 50})));
    }

    #[test]
    fn decided_approval_rejects_further_transitions() {
        let now = Utc::now();
        let approved = respond(&pending(now), ApprovalAction::Approve, "admin", None, now).unwrap();
        let err = respond(&approved, ApprovalAction::Reject, "admin", None, now).unwrap_err();
        assert!(matches!(
            err,
            ApprovalError::InvalidTransition(ApprovalStatus::Approved)
        ));
    }

    #[test]
    fn responding_past_deadline_is_expired() {
        let now = Utc::now();
        let state = ApprovalState::pending(now - Duration::seconds(1));
        let err = respond(&state, ApprovalAction::Approve, "admin", None, now).unwrap_err();
        assert!(matches!(err, ApprovalError::Expired));
    }

    #[test]
    fn expire_only_from_pending() {
        let now = Utc::now();
        let expired = expire(&pending(now), now).unwrap();
        assert_eq!(expired.status, ApprovalStatus::Expired);
        assert!(expire(&expired, now).is_err());
    }
}
