use serde_json::Value;

use crate::safety::safe_regex_match;
use crate::{Composition, Condition, Operator, PolicyRule};

/// Result of one condition.
#[derive(Debug, Clone)]
pub struct ConditionResult {
    pub field: String,
    pub operator: Operator,
    pub matched: bool,
    /// The value found at the field path, if any.
    pub actual: Option<Value>,
}

/// Result of evaluating a whole rule tree.
#[derive(Debug, Clone)]
pub struct RuleOutcome {
    pub matched: bool,
    pub condition_results: Vec<ConditionResult>,
}

/// Evaluate a rule tree against a context value.
///
/// Semantics:
/// - AND: every direct condition and every child matches (vacuously true
///   when both lists are empty)
/// - OR: at least one direct condition or child matches (false when both
///   lists are empty)
/// - NOT: the negation of the AND semantics over the same lists
pub fn evaluate_rule(rule: &PolicyRule, context: &Value) -> RuleOutcome {
    let mut results = Vec::new();
    let matched = eval_tree(rule, context, &mut results);
    RuleOutcome {
        matched,
        condition_results: results,
    }
}

fn eval_tree(rule: &PolicyRule, context: &Value, results: &mut Vec<ConditionResult>) -> bool {
    let condition_hits: Vec<bool> = rule
        .conditions
        .iter()
        .map(|c| {
            let r = eval_condition(c, context);
            let matched = r.matched;
            results.push(r);
            matched
        })
        .collect();
    let child_hits: Vec<bool> = rule
        .children
        .iter()
        .map(|child| eval_tree(child, context, results))
        .collect();

    match rule.composition {
        Composition::And => condition_hits.iter().all(|m| *m) && child_hits.iter().all(|m| *m),
        Composition::Or => condition_hits.iter().any(|m| *m) || child_hits.iter().any(|m| *m),
        Composition::Not => {
            !(condition_hits.iter().all(|m| *m) && child_hits.iter().all(|m| *m))
        }
    }
}

fn eval_condition(condition: &Condition, context: &Value) -> ConditionResult {
    let actual = resolve_path(context, &condition.field);
    let matched = match condition.operator {
        Operator::Exists => actual.is_some(),
        Operator::NotExists => actual.is_none(),
        _ => match actual {
            Some(actual) => apply_operator(condition.operator, actual, &condition.value),
            None => false,
        },
    };
    ConditionResult {
        field: condition.field.clone(),
        operator: condition.operator,
        matched,
        actual: actual.cloned(),
    }
}

fn apply_operator(op: Operator, actual: &Value, expected: &Value) -> bool {
    match op {
        Operator::Eq => actual == expected,
        Operator::Neq => actual != expected,
        Operator::Gt => numeric(actual, expected).map(|(a, b)| a > b).unwrap_or(false),
        Operator::Gte => numeric(actual, expected).map(|(a, b)| a >= b).unwrap_or(false),
        Operator::Lt => numeric(actual, expected).map(|(a, b)| a < b).unwrap_or(false),
        Operator::Lte => numeric(actual, expected).map(|(a, b)| a <= b).unwrap_or(false),
        Operator::In => match expected {
            Value::Array(items) => items.contains(actual),
            _ => false,
        },
        Operator::NotIn => match expected {
            Value::Array(items) => !items.contains(actual),
            _ => false,
        },
        Operator::Contains => contains(actual, expected),
        Operator::NotContains => !contains(actual, expected),
        Operator::Matches => match (actual, expected) {
            (Value::String(input), Value::String(pattern)) => safe_regex_match(pattern, input),
            _ => false,
        },
        Operator::Exists | Operator::NotExists => unreachable!("handled before dispatch"),
    }
}

/// Numeric operators require both sides numeric; anything else is a
/// non-match rather than an error.
fn numeric(actual: &Value, expected: &Value) -> Option<(f64, f64)> {
    Some((actual.as_f64()?, expected.as_f64()?))
}

fn contains(actual: &Value, expected: &Value) -> bool {
    match actual {
        Value::String(s) => expected.as_str().map(|sub| s.contains(sub)).unwrap_or(false),
        Value::Array(items) => items.contains(expected),
        _ => false,
    }
}

/// Resolve a dotted path through nested objects.
fn resolve_path<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = context;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}
