//! Expectations evaluated against a test handler's returned value

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

use super::test_result::FailureReason;

/// Comparison operator of an expectation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    #[default]
    Equal,
    NotEqual,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
}

impl Operator {
    /// Conventional assertion-library name, used in failure reports
    pub fn name(&self) -> &'static str {
        match self {
            Operator::Equal => "strictEqual",
            Operator::NotEqual => "notStrictEqual",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Contains => "include",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Expected value of a test
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Expectation {
    #[serde(default)]
    pub operator: Operator,
    pub value: Value,
}

impl Expectation {
    pub fn new(operator: Operator, value: Value) -> Self {
        Self { operator, value }
    }

    pub fn equal(value: Value) -> Self {
        Self::new(Operator::Equal, value)
    }

    /// Check `actual` against this expectation
    pub fn check(&self, actual: &Value) -> Result<(), FailureReason> {
        if self.holds(actual) {
            Ok(())
        } else {
            Err(FailureReason::Assertion {
                actual: actual.clone(),
                expected: self.value.clone(),
                operator: self.operator.name().to_string(),
            })
        }
    }

    fn holds(&self, actual: &Value) -> bool {
        let numeric = match (as_integer(actual), as_integer(&self.value)) {
            (Some(a), Some(e)) => Some(a.cmp(&e)),
            _ => None,
        };

        match self.operator {
            Operator::Equal => numeric.map_or(actual == &self.value, |o| o == Ordering::Equal),
            Operator::NotEqual => numeric.map_or(actual != &self.value, |o| o != Ordering::Equal),
            Operator::Gt => numeric == Some(Ordering::Greater),
            Operator::Gte => matches!(numeric, Some(Ordering::Greater | Ordering::Equal)),
            Operator::Lt => numeric == Some(Ordering::Less),
            Operator::Lte => matches!(numeric, Some(Ordering::Less | Ordering::Equal)),
            Operator::Contains => contains(actual, &self.value),
        }
    }
}

/// Interpret a JSON number or a decimal / `0x` hex string as an unsigned integer
pub fn as_integer(value: &Value) -> Option<u128> {
    match value {
        Value::Number(n) => n.as_u64().map(u128::from),
        Value::String(s) => {
            let s = s.trim();
            if let Some(hex) = s.strip_prefix("0x") {
                u128::from_str_radix(hex, 16).ok()
            } else {
                s.parse().ok()
            }
        }
        _ => None,
    }
}

fn contains(actual: &Value, needle: &Value) -> bool {
    match (actual, needle) {
        (Value::String(a), Value::String(n)) => a.contains(n.as_str()),
        (Value::Array(items), n) => items.contains(n),
        (Value::Object(map), Value::String(key)) => map.contains_key(key),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numeric_comparison_across_representations() {
        assert!(Expectation::equal(json!(16)).check(&json!("0x10")).is_ok());
        assert!(Expectation::new(Operator::Gt, json!(0))
            .check(&json!("1000000000000000000000"))
            .is_ok());
        assert!(Expectation::new(Operator::Lte, json!("5")).check(&json!(5)).is_ok());
    }

    #[test]
    fn test_mismatch_reports_operator() {
        let err = Expectation::equal(json!(6)).check(&json!(5)).unwrap_err();
        match err {
            FailureReason::Assertion {
                actual,
                expected,
                operator,
            } => {
                assert_eq!(actual, json!(5));
                assert_eq!(expected, json!(6));
                assert_eq!(operator, "strictEqual");
            }
            other => panic!("unexpected reason: {other:?}"),
        }
    }

    #[test]
    fn test_non_numeric_ordering_fails() {
        assert!(Expectation::new(Operator::Gt, json!(1))
            .check(&json!("abc"))
            .is_err());
    }

    #[test]
    fn test_contains() {
        assert!(Expectation::new(Operator::Contains, json!("0xdead"))
            .check(&json!("receipt 0xdead ok"))
            .is_ok());
        assert!(Expectation::new(Operator::Contains, json!(2))
            .check(&json!([1, 2, 3]))
            .is_ok());
        assert!(Expectation::new(Operator::Contains, json!("status"))
            .check(&json!({"status": 1}))
            .is_ok());
    }

    #[test]
    fn test_operator_deserialize() {
        let e: Expectation = serde_json::from_value(json!({"operator": "gte", "value": 1})).unwrap();
        assert_eq!(e.operator, Operator::Gte);
        let d: Expectation = serde_json::from_value(json!({"value": "x"})).unwrap();
        assert_eq!(d.operator, Operator::Equal);
    }
}
