//! Search contract types
//!
//! The engine executes condition-list queries: a list of per-attribute
//! conditions combined with `and` (intersection) or `or` (union), plus
//! offset/limit. Query-language parsing (SQL, GraphQL) is out of scope;
//! front ends compile down to these types.

use crate::value::Value;
use serde::{Deserialize, Serialize};

/// A single condition on one attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Attribute the condition applies to
    pub attribute: String,
    /// The comparison to perform
    #[serde(flatten)]
    pub kind: ConditionKind,
}

impl Condition {
    /// Equality condition
    pub fn equals(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            attribute: attribute.into(),
            kind: ConditionKind::Equals(value.into()),
        }
    }

    /// Substring condition (string attributes only)
    pub fn contains(attribute: impl Into<String>, needle: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            kind: ConditionKind::Contains(needle.into()),
        }
    }

    /// Prefix condition (string attributes only)
    pub fn starts_with(attribute: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            kind: ConditionKind::StartsWith(prefix.into()),
        }
    }

    /// Suffix condition (string attributes only)
    pub fn ends_with(attribute: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            kind: ConditionKind::EndsWith(suffix.into()),
        }
    }

    /// Inclusive range condition
    pub fn between(
        attribute: impl Into<String>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        Self {
            attribute: attribute.into(),
            kind: ConditionKind::Between(low.into(), high.into()),
        }
    }

    /// Strict greater-than condition
    pub fn greater_than(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            attribute: attribute.into(),
            kind: ConditionKind::GreaterThan(value.into()),
        }
    }

    /// Greater-or-equal condition
    pub fn greater_than_or_equal(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            attribute: attribute.into(),
            kind: ConditionKind::GreaterThanOrEqual(value.into()),
        }
    }

    /// Strict less-than condition
    pub fn less_than(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            attribute: attribute.into(),
            kind: ConditionKind::LessThan(value.into()),
        }
    }

    /// Less-or-equal condition
    pub fn less_than_or_equal(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            attribute: attribute.into(),
            kind: ConditionKind::LessThanOrEqual(value.into()),
        }
    }
}

/// Comparison kinds
///
/// `Contains`/`StartsWith`/`EndsWith` only match string-valued attributes;
/// non-string values never match. `Between` is inclusive on both bounds.
/// Ordered comparisons use the store key comparator (`Value::total_cmp`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum ConditionKind {
    /// Strict equality
    Equals(Value),
    /// Substring match
    Contains(String),
    /// Prefix match
    StartsWith(String),
    /// Suffix match
    EndsWith(String),
    /// Inclusive range
    Between(Value, Value),
    /// Strictly greater
    GreaterThan(Value),
    /// Greater or equal
    GreaterThanOrEqual(Value),
    /// Strictly less
    LessThan(Value),
    /// Less or equal
    LessThanOrEqual(Value),
}

/// How multiple conditions combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    /// Intersection (default)
    #[default]
    And,
    /// De-duplicated union
    Or,
}

/// A condition-list query
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Conditions to combine; empty means full scan
    pub conditions: Vec<Condition>,
    /// Combination operator
    #[serde(default)]
    pub operator: Operator,
}

impl SearchQuery {
    /// Conjunction of conditions
    pub fn all(conditions: Vec<Condition>) -> Self {
        Self {
            conditions,
            operator: Operator::And,
        }
    }

    /// De-duplicated union of conditions
    pub fn any(conditions: Vec<Condition>) -> Self {
        Self {
            conditions,
            operator: Operator::Or,
        }
    }
}

/// Pagination over search results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Results to skip
    #[serde(default)]
    pub offset: usize,
    /// Maximum results to return; `None` is unbounded
    #[serde(default)]
    pub limit: Option<usize>,
}

impl SearchOptions {
    /// Offset/limit pair
    pub fn page(offset: usize, limit: usize) -> Self {
        Self {
            offset,
            limit: Some(limit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_constructors() {
        let c = Condition::equals("state", "CO");
        assert_eq!(c.attribute, "state");
        assert_eq!(c.kind, ConditionKind::Equals(Value::String("CO".into())));

        let c = Condition::between("temperature", 1i64, 10i64);
        assert_eq!(c.kind, ConditionKind::Between(Value::Int(1), Value::Int(10)));
    }

    #[test]
    fn test_operator_default_is_and() {
        assert_eq!(SearchQuery::default().operator, Operator::And);
    }

    #[test]
    fn test_wire_shape() {
        // Front ends submit `{attribute, type, value}` condition objects.
        let json = r#"{"attribute":"state","type":"equals","value":{"String":"CO"}}"#;
        let condition: Condition = serde_json::from_str(json).unwrap();
        assert_eq!(condition, Condition::equals("state", "CO"));
    }

    #[test]
    fn test_query_serde_round_trip() {
        let query = SearchQuery::any(vec![
            Condition::equals("city", "Bergeville"),
            Condition::greater_than("temperature", 108i64),
        ]);
        let json = serde_json::to_string(&query).unwrap();
        let restored: SearchQuery = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, query);
    }
}
