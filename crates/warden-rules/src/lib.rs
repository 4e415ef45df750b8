//! Boolean policy-rule trees evaluated against an action context.
//!
//! A [`PolicyRule`] composes [`Condition`]s and child rules with AND / OR /
//! NOT. Conditions address the evaluation context through dotted field
//! paths (`parameters.amount`) and compare with a closed operator set.
//! Evaluation never errors: a type mismatch or an unsafe regex simply
//! fails to match.

pub mod safety;

mod evaluate;

pub use evaluate::{evaluate_rule, ConditionResult, RuleOutcome};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use warden_types::ApprovalLevel;

/// How a rule combines its conditions and children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Composition {
    And,
    Or,
    Not,
}

/// Comparison operators for conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Contains,
    NotContains,
    Matches,
    Exists,
    NotExists,
}

/// One comparison against a context field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    /// Dotted path resolved against the evaluation context.
    pub field: String,
    pub operator: Operator,
    /// Expected value; ignored by `exists` / `not_exists`.
    #[serde(default)]
    pub value: Value,
}

/// A boolean tree of conditions.
///
/// An AND rule with no conditions and no children matches by vacuous
/// truth. NOT inverts the conjunction of its direct conditions and
/// children.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRule {
    pub composition: Composition,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub children: Vec<PolicyRule>,
}

impl PolicyRule {
    pub fn all(conditions: Vec<Condition>) -> Self {
        Self {
            composition: Composition::And,
            conditions,
            children: Vec::new(),
        }
    }

    pub fn any(conditions: Vec<Condition>) -> Self {
        Self {
            composition: Composition::Or,
            conditions,
            children: Vec::new(),
        }
    }
}

/// What a matched policy does to the decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum PolicyEffect {
    Allow,
    Deny,
    RequireApproval { level: ApprovalLevel },
    /// Shallow parameter patch applied before execution.
    Modify { patch: Value },
}

/// A stored, prioritized policy. Lower priority evaluates first; ties are
/// broken by listing order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Restricts the policy to one cartridge when set.
    pub cartridge_id: Option<String>,
    pub rule: PolicyRule,
    pub effect: PolicyEffect,
    pub priority: i32,
    pub active: bool,
}
