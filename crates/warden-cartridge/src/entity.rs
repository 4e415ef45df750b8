//! Entity resolution: turning user-supplied references into canonical
//! ids before a proposal is evaluated.
//!
//! Aggregation rules: any ambiguous reference forces a clarification
//! question (listing the alternatives), otherwise any unresolved
//! reference reports not-found, otherwise every occurrence of each input
//! reference is substituted into the parameters — by value match, and by
//! the conventional `*_ref` → `*_id` key rename.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use warden_types::ResolvedEntity;

use crate::{Cartridge, CartridgeContext, CartridgeError};

/// A reference the user supplied, with the entity type it should name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRef {
    pub input_ref: String,
    pub entity_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupStatus {
    Resolved,
    Ambiguous,
    NotFound,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityCandidate {
    pub id: String,
    pub name: String,
}

/// What a cartridge's resolver returns for one reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityLookup {
    pub status: LookupStatus,
    pub resolved_id: Option<String>,
    pub resolved_name: Option<String>,
    pub confidence: f64,
    #[serde(default)]
    pub alternatives: Vec<EntityCandidate>,
}

impl EntityLookup {
    pub fn resolved(id: impl Into<String>, name: impl Into<String>, confidence: f64) -> Self {
        Self {
            status: LookupStatus::Resolved,
            resolved_id: Some(id.into()),
            resolved_name: Some(name.into()),
            confidence,
            alternatives: Vec::new(),
        }
    }

    pub fn ambiguous(alternatives: Vec<EntityCandidate>) -> Self {
        Self {
            status: LookupStatus::Ambiguous,
            resolved_id: None,
            resolved_name: None,
            confidence: 0.0,
            alternatives,
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: LookupStatus::NotFound,
            resolved_id: None,
            resolved_name: None,
            confidence: 0.0,
            alternatives: Vec::new(),
        }
    }
}

/// Aggregate outcome over all references.
#[derive(Debug, Clone)]
pub enum EntityResolution {
    Resolved {
        parameters: Value,
        entities: Vec<ResolvedEntity>,
    },
    NeedsClarification {
        question: String,
    },
    NotFound {
        explanation: String,
    },
}

/// Resolve every reference through the cartridge and substitute the
/// results into `parameters`.
///
/// Resolver errors fail closed: the reference is treated as ambiguous.
pub async fn resolve_entities(
    refs: &[EntityRef],
    cartridge: &dyn Cartridge,
    context: &CartridgeContext,
    parameters: &Value,
) -> Result<EntityResolution, CartridgeError> {
    let resolver = cartridge
        .entity_resolver()
        .ok_or(CartridgeError::MissingCapability {
            cartridge: cartridge.id().to_string(),
            capability: "entity resolution",
        })?;

    let mut resolved = Vec::new();
    let mut ambiguous: Vec<(String, Vec<EntityCandidate>)> = Vec::new();
    let mut missing: Vec<String> = Vec::new();

    for entity_ref in refs {
        let lookup = match resolver
            .resolve_entity(&entity_ref.input_ref, &entity_ref.entity_type, context)
            .await
        {
            Ok(lookup) => lookup,
            // Fail closed: an erroring resolver cannot rule ambiguity out.
            Err(_) => EntityLookup::ambiguous(Vec::new()),
        };

        match lookup.status {
            LookupStatus::Resolved => {
                if let Some(id) = lookup.resolved_id {
                    resolved.push(ResolvedEntity {
                        input_ref: entity_ref.input_ref.clone(),
                        entity_type: entity_ref.entity_type.clone(),
                        resolved_id: id,
                        resolved_name: lookup.resolved_name,
                        confidence: lookup.confidence,
                    });
                } else {
                    missing.push(entity_ref.input_ref.clone());
                }
            }
            LookupStatus::Ambiguous => {
                ambiguous.push((entity_ref.input_ref.clone(), lookup.alternatives));
            }
            LookupStatus::NotFound => missing.push(entity_ref.input_ref.clone()),
        }
    }

    if let Some((input_ref, alternatives)) = ambiguous.into_iter().next() {
        return Ok(EntityResolution::NeedsClarification {
            question: clarification_question(&input_ref, &alternatives),
        });
    }
    if !missing.is_empty() {
        return Ok(EntityResolution::NotFound {
            explanation: format!("Could not find: {}", missing.join(", ")),
        });
    }

    let mut parameters = parameters.clone();
    for entity in &resolved {
        parameters = substitute(&parameters, &entity.input_ref, &entity.resolved_id);
    }

    Ok(EntityResolution::Resolved {
        parameters,
        entities: resolved,
    })
}

fn clarification_question(input_ref: &str, alternatives: &[EntityCandidate]) -> String {
    if alternatives.is_empty() {
        return format!("Which entity did you mean by \"{input_ref}\"?");
    }
    let options: Vec<String> = alternatives
        .iter()
        .map(|c| format!("{} ({})", c.name, c.id))
        .collect();
    format!(
        "Which entity did you mean by \"{input_ref}\"? Options: {}",
        options.join(", ")
    )
}

/// Replace `input_ref` string values with `resolved_id`; keys ending in
/// `_ref` / `Ref` whose value matched are renamed to `_id` / `Id`.
fn substitute(parameters: &Value, input_ref: &str, resolved_id: &str) -> Value {
    match parameters {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, value) in map {
                match value {
                    Value::String(s) if s == input_ref => {
                        let new_key = renamed_ref_key(key).unwrap_or_else(|| key.clone());
                        out.insert(new_key, Value::String(resolved_id.to_string()));
                    }
                    _ => {
                        out.insert(key.clone(), substitute(value, input_ref, resolved_id));
                    }
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| match item {
                    Value::String(s) if s == input_ref => Value::String(resolved_id.to_string()),
                    _ => substitute(item, input_ref, resolved_id),
                })
                .collect(),
        ),
        _ => parameters.clone(),
    }
}

fn renamed_ref_key(key: &str) -> Option<String> {
    if let Some(stem) = key.strip_suffix("_ref") {
        return Some(format!("{stem}_id"));
    }
    if let Some(stem) = key.strip_suffix("Ref") {
        return Some(format!("{stem}Id"));
    }
    None
}
