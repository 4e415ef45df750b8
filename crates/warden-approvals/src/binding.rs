//! Binding hashes and parameter patches.

use serde_json::{json, Map, Value};

use warden_canonical::{constant_time_eq, hash_value};

use crate::ApprovalError;

/// Everything a binding hash covers.
#[derive(Debug, Clone)]
pub struct BindingInput<'a> {
    pub envelope_id: &'a str,
    pub envelope_version: u32,
    pub action_id: &'a str,
    pub parameters: &'a Value,
    pub decision_trace_hash: &'a str,
    pub context_snapshot_hash: &'a str,
}

/// SHA-256 over the canonical JSON of the binding tuple.
pub fn compute_binding_hash(input: &BindingInput<'_>) -> String {
    hash_value(&json!({
        "envelope_id": input.envelope_id,
        "envelope_version": input.envelope_version,
        "action_id": input.action_id,
        "parameters": input.parameters,
        "decision_trace_hash": input.decision_trace_hash,
        "context_snapshot_hash": input.context_snapshot_hash,
    }))
}

/// Constant-time comparison of a supplied hash against the stored one.
pub fn verify_binding(stored: &str, supplied: &str) -> Result<(), ApprovalError> {
    if constant_time_eq(stored, supplied) {
        Ok(())
    } else {
        Err(ApprovalError::StaleApproval)
    }
}

/// Shallow key-wise override: keys in `patch` replace keys in
/// `original`; everything else is untouched. Returns a new object.
pub fn apply_patch(original: &Value, patch: &Value) -> Result<Value, ApprovalError> {
    let base: &Map<String, Value> = original.as_object().ok_or(ApprovalError::InvalidPatch)?;
    let overlay = patch.as_object().ok_or(ApprovalError::InvalidPatch)?;

    let mut merged = base.clone();
    for (key, value) in overlay {
        merged.insert(key.clone(), value.clone());
    }
    Ok(Value::Object(merged))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input<'a>(parameters: &'a Value, version: u32) -> BindingInput<'a> {
        BindingInput {
            envelope_id: "env-1",
            envelope_version: version,
            action_id: "act-1",
            parameters,
            decision_trace_hash: "aaaa",
            context_snapshot_hash: "bbbb",
        }
    }

    #[test]
    fn same_input_same_hash() {
        let params = json!({"campaign_id": "c1", "amount": 10});
        assert_eq!(
            compute_binding_hash(&input(&params, 1)),
            compute_binding_hash(&input(&params, 1))
        );
    }

    #[test]
    fn version_bump_changes_hash() {
        let params = json!({"campaign_id": "c1"});
        assert_ne!(
            compute_binding_hash(&input(&params, 1)),
            compute_binding_hash(&input(&params, 2))
        );
    }

    #[test]
    fn parameter_change_changes_hash() {
        let a = json!({"campaign_id": "c1"});
        let b = json!({"campaign_id": "c2"});
        assert_ne!(
            compute_binding_hash(&input(&a, 1)),
            compute_binding_hash(&input(&b, 1))
        );
    }

    #[test]
    fn parameter_key_order_does_not_change_hash() {
        let a: Value = serde_json::from_str(r#"{"x":1,"y":2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"y":2,"x":1}"#).unwrap();
        assert_eq!(
            compute_binding_hash(&input(&a, 1)),
            compute_binding_hash(&input(&b, 1))
        );
    }

    #[test]
    fn verify_accepts_exact_and_rejects_other() {
        let params = json!({});
        let hash = compute_binding_hash(&input(&params, 1));
        assert!(verify_binding(&hash, &hash).is_ok());
        assert!(matches!(
            verify_binding(&hash, "WRONG"),
            Err(ApprovalError::StaleApproval)
        ));
    }

    #[test]
    fn patch_overrides_shallowly() {
        let original = json!({"amount": 100, "campaign_id": "c1", "nested": {"a": 1}});
        let patch = json!({"amount": 50, "nested": {"b": 2}});
        let merged = apply_patch(&original, &patch).unwrap();
        assert_eq!(merged["amount"], json!(50));
        assert_eq!(merged["campaign_id"], json!("c1"));
        // Shallow: the nested object is replaced, not merged.
        assert_eq!(merged["nested"], json!({"b": 2}));
    }

    #[test]
    fn patch_requires_objects() {
        assert!(matches!(
            apply_patch(&json!([1]), &json!({})),
            Err(ApprovalError::InvalidPatch)
        ));
        assert!(matches!(
            apply_patch(&json!({}), &json!("no")),
            Err(ApprovalError::InvalidPatch)
        ));
    }
}
