//! Condition node evaluation with loose type coercion, so `"5"` and `5`
//! compare equal the way editor-authored flows expect.

use serde_json::Value;

use crate::model::ConditionOperator;

/// Look up a dotted path (`"order.total"`) in the node input.
pub fn lookup_field<'a>(input: &'a Value, field: &str) -> Option<&'a Value> {
    let mut current = input;
    for part in field.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}

/// Evaluate a condition against the resolved node input. A missing field
/// only satisfies `IsEmpty`.
pub fn evaluate(input: &Value, field: &str, operator: ConditionOperator, expected: &Value) -> bool {
    let actual = lookup_field(input, field);
    match operator {
        ConditionOperator::IsEmpty => actual.map_or(true, is_empty),
        ConditionOperator::IsNotEmpty => actual.map_or(false, |v| !is_empty(v)),
        _ => {
            let Some(actual) = actual else { return false };
            match operator {
                ConditionOperator::Equals => loose_eq(actual, expected),
                ConditionOperator::NotEquals => !loose_eq(actual, expected),
                ConditionOperator::Contains => contains(actual, expected),
                ConditionOperator::StartsWith => {
                    str_pair(actual, expected).is_some_and(|(a, b)| a.starts_with(b))
                }
                ConditionOperator::EndsWith => {
                    str_pair(actual, expected).is_some_and(|(a, b)| a.ends_with(b))
                }
                ConditionOperator::GreaterThan => {
                    num_pair(actual, expected).is_some_and(|(a, b)| a > b)
                }
                ConditionOperator::LessThan => {
                    num_pair(actual, expected).is_some_and(|(a, b)| a < b)
                }
                ConditionOperator::IsEmpty | ConditionOperator::IsNotEmpty => unreachable!(),
            }
        }
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(arr) => arr.is_empty(),
        Value::Object(obj) => obj.is_empty(),
        _ => false,
    }
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::String(s), Value::Number(n)) | (Value::Number(n), Value::String(s)) => {
            s.parse::<f64>().ok() == n.as_f64()
        }
        (Value::Bool(x), Value::String(s)) | (Value::String(s), Value::Bool(x)) => {
            match s.to_lowercase().as_str() {
                "true" => *x,
                "false" => !*x,
                _ => false,
            }
        }
        _ => false,
    }
}

fn contains(value: &Value, target: &Value) -> bool {
    match (value, target) {
        (Value::String(s), Value::String(t)) => s.contains(t.as_str()),
        (Value::String(s), Value::Number(n)) => s.contains(&n.to_string()),
        (Value::Array(arr), target) => arr.contains(target),
        _ => false,
    }
}

fn str_pair<'a>(a: &'a Value, b: &'a Value) -> Option<(&'a str, &'a str)> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some((x, y)),
        _ => None,
    }
}

fn num_pair(a: &Value, b: &Value) -> Option<(f64, f64)> {
    let to_f64 = |v: &Value| match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    };
    Some((to_f64(a)?, to_f64(b)?))
}
