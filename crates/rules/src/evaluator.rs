//! Comparator evaluation: does an observed data point satisfy a condition?
//!
//! Pure and total over its inputs. Anything that cannot be compared under
//! the declared data type is an [`Evaluation::TypeError`], never a match.

use ifthen_core::{Comparator, DataType, DataValue};

/// Outcome of evaluating one condition against one observed value.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    Match,
    Mismatch,
    /// The comparator/data type pairing or the values involved cannot be
    /// compared. Signals drift between rule and source data contracts.
    TypeError(String),
}

impl Evaluation {
    pub fn is_match(&self) -> bool {
        matches!(self, Evaluation::Match)
    }

    fn from_bool(b: bool) -> Self {
        if b {
            Evaluation::Match
        } else {
            Evaluation::Mismatch
        }
    }
}

/// A value coerced to a rule's declared data type.
#[derive(Debug, PartialEq)]
enum Coerced {
    Number(f64),
    Enum(String),
    Boolean(bool),
}

fn coerce(value: &DataValue, data_type: DataType) -> Option<Coerced> {
    match (data_type, value) {
        (DataType::Number, DataValue::Number(n)) => Some(Coerced::Number(*n)),
        (DataType::Number, DataValue::Text(s)) => s.trim().parse().ok().map(Coerced::Number),
        (DataType::Enum, v) => Some(Coerced::Enum(v.to_string())),
        (DataType::Boolean, DataValue::Boolean(b)) => Some(Coerced::Boolean(*b)),
        (DataType::Boolean, DataValue::Text(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(Coerced::Boolean(true)),
            "false" => Some(Coerced::Boolean(false)),
            _ => None,
        },
        _ => None,
    }
}

fn coerce_number(value: &DataValue) -> Option<f64> {
    match coerce(value, DataType::Number) {
        Some(Coerced::Number(n)) if !n.is_nan() => Some(n),
        _ => None,
    }
}

/// Truthiness used by `yes` / `no`.
fn truthy(value: &DataValue) -> bool {
    match value {
        DataValue::Boolean(b) => *b,
        DataValue::Number(n) => *n != 0.0 && !n.is_nan(),
        DataValue::Text(s) => !matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "" | "false" | "no" | "0"
        ),
    }
}

/// Evaluate `observed <comparator> expected` under `data_type`.
pub fn evaluate(
    comparator: Comparator,
    data_type: DataType,
    observed: &DataValue,
    expected: &DataValue,
) -> Evaluation {
    match comparator {
        Comparator::Eq => {
            let (Some(lhs), Some(rhs)) = (coerce(observed, data_type), coerce(expected, data_type))
            else {
                return Evaluation::TypeError(format!(
                    "cannot compare {observed} and {expected} as {data_type}"
                ));
            };
            match (lhs, rhs) {
                (Coerced::Number(a), Coerced::Number(b)) => {
                    Evaluation::from_bool((a - b).abs() <= f64::EPSILON)
                }
                (a, b) => Evaluation::from_bool(a == b),
            }
        }
        Comparator::Gt | Comparator::Lt => {
            if data_type != DataType::Number {
                return Evaluation::TypeError(format!(
                    "comparator '{comparator}' requires dataType 'number', got '{data_type}'"
                ));
            }
            let (Some(a), Some(b)) = (coerce_number(observed), coerce_number(expected)) else {
                return Evaluation::TypeError(format!(
                    "non-numeric operands for '{comparator}': {observed} vs {expected}"
                ));
            };
            if comparator == Comparator::Gt {
                Evaluation::from_bool(a > b)
            } else {
                Evaluation::from_bool(a < b)
            }
        }
        Comparator::Yes | Comparator::No if data_type == DataType::Unknown => {
            Evaluation::TypeError(format!("unknown dataType for '{comparator}'"))
        }
        Comparator::Yes => Evaluation::from_bool(truthy(observed)),
        Comparator::No => Evaluation::from_bool(!truthy(observed)),
        Comparator::Unknown => Evaluation::TypeError("unknown comparator".to_string()),
    }
}

// ── Tests ───────────────────────────────────────────────────────────
