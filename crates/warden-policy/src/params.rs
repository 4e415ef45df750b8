//! Conventions for reading entity ids out of opaque parameter bags.
//!
//! Parameters belong to the cartridge, but guardrails need to know which
//! entity an action touches. The convention: `entity_id` (either casing)
//! wins, then any other `*_id` / `*Id` string field in key order. Hidden
//! `_`-prefixed fields never count.

use serde_json::Value;

/// All candidate entity ids in precedence order.
pub fn entity_candidates(parameters: &Value) -> Vec<String> {
    let Some(map) = parameters.as_object() else {
        return Vec::new();
    };

    let mut candidates = Vec::new();
    for key in ["entity_id", "entityId"] {
        if let Some(Value::String(id)) = map.get(key) {
            candidates.push(id.clone());
        }
    }

    let mut keyed: Vec<(&String, &str)> = map
        .iter()
        .filter(|(k, _)| !k.starts_with('_') && *k != "entity_id" && *k != "entityId")
        .filter(|(k, _)| k.ends_with("_id") || k.ends_with("Id"))
        .filter_map(|(k, v)| v.as_str().map(|s| (k, s)))
        .collect();
    keyed.sort_by_key(|(k, _)| k.as_str());
    for (_, id) in keyed {
        if !candidates.iter().any(|c| c == id) {
            candidates.push(id.to_string());
        }
    }
    candidates
}

/// The entity an action primarily targets, if any.
pub fn primary_entity_id(parameters: &Value) -> Option<String> {
    entity_candidates(parameters).into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn explicit_entity_id_wins() {
        let params = json!({"entity_id": "e1", "campaign_id": "c1"});
        assert_eq!(primary_entity_id(&params), Some("e1".into()));
    }

    #[test]
    fn id_suffixed_keys_in_key_order() {
        let params = json!({"campaign_id": "c1", "account_id": "a1"});
        assert_eq!(
            entity_candidates(&params),
            vec!["a1".to_string(), "c1".to_string()]
        );
    }

    #[test]
    fn hidden_fields_are_ignored() {
        let params = json!({"_principal_id": "p1", "_cartridge_id": "ads"});
        assert!(entity_candidates(&params).is_empty());
    }

    #[test]
    fn non_string_ids_are_ignored() {
        let params = json!({"campaign_id": 42});
        assert!(entity_candidates(&params).is_empty());
    }

    #[test]
    fn non_object_parameters_yield_nothing() {
        assert!(entity_candidates(&json!([1, 2])).is_empty());
    }
}
