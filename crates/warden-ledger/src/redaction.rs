//! Snapshot redaction.
//!
//! Applied before hashing, so the stored snapshot and the hashed snapshot
//! are the same bytes. Field-name matching is case-insensitive substring;
//! value patterns catch secrets that live under innocent field names.
//! Redaction is idempotent: the replacement string matches neither rule
//! set.

use regex::Regex;
use serde_json::Value;
use tracing::warn;

/// Default field-name fragments that always redact.
const DEFAULT_FIELD_PATTERNS: &[&str] = &[
    "password",
    "secret",
    "api_key",
    "apikey",
    "token",
    "authorization",
    "credit_card",
    "ssn",
    "private_key",
];

/// Default value patterns: email-like strings and bearer tokens.
const DEFAULT_VALUE_PATTERNS: &[&str] = &[
    r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}",
    r"(?i)bearer\s+[A-Za-z0-9._\-]+",
];

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RedactionConfig {
    /// Case-insensitive substrings of field names to redact.
    pub field_patterns: Vec<String>,
    /// Regex sources applied to string values.
    pub value_patterns: Vec<String>,
    pub replacement: String,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            field_patterns: DEFAULT_FIELD_PATTERNS.iter().map(|s| s.to_string()).collect(),
            value_patterns: DEFAULT_VALUE_PATTERNS.iter().map(|s| s.to_string()).collect(),
            replacement: "[REDACTED]".to_string(),
        }
    }
}

/// Compiled redaction engine.
pub struct Redactor {
    field_patterns: Vec<String>,
    value_regexes: Vec<Regex>,
    replacement: String,
}

impl Default for Redactor {
    fn default() -> Self {
        Self::new(RedactionConfig::default())
    }
}

impl Redactor {
    /// Compile a config. Uncompilable value patterns are skipped with a
    /// warning rather than failing the ledger.
    pub fn new(config: RedactionConfig) -> Self {
        let value_regexes = config
            .value_patterns
            .iter()
            .filter_map(|source| match Regex::new(source) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!(pattern = %source, error = %e, "Skipping uncompilable redaction pattern");
                    None
                }
            })
            .collect();
        Self {
            field_patterns: config
                .field_patterns
                .iter()
                .map(|p| p.to_lowercase())
                .collect(),
            value_regexes,
            replacement: config.replacement,
        }
    }

    /// Redact a snapshot, returning the scrubbed value and the dotted
    /// paths that were touched.
    pub fn redact(&self, value: &Value) -> (Value, Vec<String>) {
        let mut paths = Vec::new();
        let redacted = self.walk(value, "", &mut paths);
        (redacted, paths)
    }

    fn walk(&self, value: &Value, path: &str, paths: &mut Vec<String>) -> Value {
        match value {
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (key, inner) in map {
                    let child_path = if path.is_empty() {
                        key.clone()
                    } else {
                        format!("{path}.{key}")
                    };
                    if self.field_matches(key) {
                        paths.push(child_path);
                        out.insert(key.clone(), Value::String(self.replacement.clone()));
                    } else {
                        out.insert(key.clone(), self.walk(inner, &child_path, paths));
                    }
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| self.walk(item, &format!("{path}[{i}]"), paths))
                    .collect(),
            ),
            Value::String(s) => {
                if s != &self.replacement && self.value_matches(s) {
                    paths.push(path.to_string());
                    Value::String(self.replacement.clone())
                } else {
                    value.clone()
                }
            }
            _ => value.clone(),
        }
    }

    fn field_matches(&self, key: &str) -> bool {
        let lower = key.to_lowercase();
        self.field_patterns.iter().any(|p| lower.contains(p))
    }

    fn value_matches(&self, value: &str) -> bool {
        self.value_regexes.iter().any(|re| re.is_match(value))
    }
}
