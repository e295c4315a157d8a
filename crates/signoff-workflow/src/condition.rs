//! Step conditions
//!
//! A step may carry a single field/operator/value condition evaluated
//! against the instance's frozen request-data snapshot. Malformed
//! conditions fail closed: the step stays required rather than silently
//! dropping an approval.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use signoff_core::RequestData;
use tracing::warn;

/// Comparison operator for a step condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
    Ne,
    Contains,
}

impl ConditionOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionOperator::Gt => "gt",
            ConditionOperator::Gte => "gte",
            ConditionOperator::Lt => "lt",
            ConditionOperator::Lte => "lte",
            ConditionOperator::Eq => "eq",
            ConditionOperator::Ne => "ne",
            ConditionOperator::Contains => "contains",
        }
    }
}

/// A single-field condition on a workflow step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepCondition {
    /// Field name in the request-data snapshot
    pub field: String,
    pub operator: ConditionOperator,
    /// Literal to compare against, parsed according to the field's type
    pub value: String,
}

impl StepCondition {
    pub fn new(
        field: impl Into<String>,
        operator: ConditionOperator,
        value: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    /// Evaluate against a frozen snapshot.
    ///
    /// Returns `true` (step required) when the field is missing or the
    /// comparison cannot be made; a bad condition must never skip an
    /// approval.
    pub fn matches(&self, snapshot: &RequestData) -> bool {
        let Some(actual) = snapshot.get(&self.field) else {
            warn!(
                field = %self.field,
                operator = self.operator.as_str(),
                "Condition field missing from request data; treating step as required"
            );
            return true;
        };

        match self.operator {
            ConditionOperator::Gt => self.numeric(actual, |a, b| a > b),
            ConditionOperator::Gte => self.numeric(actual, |a, b| a >= b),
            ConditionOperator::Lt => self.numeric(actual, |a, b| a < b),
            ConditionOperator::Lte => self.numeric(actual, |a, b| a <= b),
            ConditionOperator::Eq => self.equality(actual, true),
            ConditionOperator::Ne => self.equality(actual, false),
            ConditionOperator::Contains => match actual.as_str() {
                Some(s) => s.contains(&self.value),
                None => {
                    self.warn_unparseable(actual);
                    true
                }
            },
        }
    }

    fn numeric(&self, actual: &Value, cmp: impl Fn(f64, f64) -> bool) -> bool {
        let lhs = as_number(actual);
        let rhs = self.value.parse::<f64>().ok();

        match (lhs, rhs) {
            (Some(a), Some(b)) => cmp(a, b),
            _ => {
                self.warn_unparseable(actual);
                true
            }
        }
    }

    fn equality(&self, actual: &Value, want_equal: bool) -> bool {
        // Numeric fields compare numerically so "1000" and 1000.0 agree;
        // everything else is a case-sensitive string comparison.
        let equal = match (as_number(actual), self.value.parse::<f64>().ok()) {
            (Some(a), Some(b)) => a == b,
            _ => match actual.as_str() {
                Some(s) => s == self.value,
                None => actual.to_string() == self.value,
            },
        };

        if want_equal {
            equal
        } else {
            !equal
        }
    }

    fn warn_unparseable(&self, actual: &Value) {
        warn!(
            field = %self.field,
            operator = self.operator.as_str(),
            value = %self.value,
            actual = %actual,
            "Condition could not be evaluated; treating step as required"
        );
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn snapshot(pairs: &[(&str, Value)]) -> RequestData {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect::<HashMap<_, _>>()
    }

    #[test]
    fn test_numeric_comparisons() {
        let data = snapshot(&[("amount", json!(5000))]);

        assert!(StepCondition::new("amount", ConditionOperator::Gt, "1000").matches(&data));
        assert!(!StepCondition::new("amount", ConditionOperator::Gt, "5000").matches(&data));
        assert!(StepCondition::new("amount", ConditionOperator::Gte, "5000").matches(&data));
        assert!(StepCondition::new("amount", ConditionOperator::Lt, "10000").matches(&data));
        assert!(!StepCondition::new("amount", ConditionOperator::Lte, "4999").matches(&data));
    }

    #[test]
    fn test_numeric_string_field() {
        // Snapshots built from form input often carry numbers as strings
        let data = snapshot(&[("amount", json!("750.5"))]);
        assert!(StepCondition::new("amount", ConditionOperator::Lt, "1000").matches(&data));
    }

    #[test]
    fn test_equality() {
        let data = snapshot(&[("category", json!("travel")), ("days", json!(3))]);

        assert!(StepCondition::new("category", ConditionOperator::Eq, "travel").matches(&data));
        assert!(!StepCondition::new("category", ConditionOperator::Eq, "Travel").matches(&data));
        assert!(StepCondition::new("category", ConditionOperator::Ne, "hardware").matches(&data));
        assert!(StepCondition::new("days", ConditionOperator::Eq, "3").matches(&data));
    }

    #[test]
    fn test_contains() {
        let data = snapshot(&[("description", json!("annual leave request"))]);

        assert!(
            StepCondition::new("description", ConditionOperator::Contains, "leave").matches(&data)
        );
        assert!(
            !StepCondition::new("description", ConditionOperator::Contains, "sick").matches(&data)
        );
    }

    #[test]
    fn test_missing_field_fails_closed() {
        let data = snapshot(&[]);
        assert!(StepCondition::new("amount", ConditionOperator::Gt, "1000").matches(&data));
    }

    #[test]
    fn test_unparseable_fails_closed() {
        let data = snapshot(&[("amount", json!("a lot"))]);
        assert!(StepCondition::new("amount", ConditionOperator::Gt, "1000").matches(&data));

        let data = snapshot(&[("amount", json!(500))]);
        assert!(StepCondition::new("amount", ConditionOperator::Gt, "not a number").matches(&data));
    }

    #[test]
    fn test_contains_on_non_string_fails_closed() {
        let data = snapshot(&[("amount", json!(500))]);
        assert!(StepCondition::new("amount", ConditionOperator::Contains, "5").matches(&data));
    }
}
