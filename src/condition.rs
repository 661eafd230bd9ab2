//! Simple binary comparisons for `{#if ...}` blocks and table row rules.

use std::cmp::Ordering;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::error::Error;
use crate::resolve::{parse_leading_float, resolve, to_number, truthy};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

impl Operator {
    pub fn parse(op: &str) -> Option<Self> {
        match op {
            "==" | "===" => Some(Operator::Eq),
            "!=" | "!==" => Some(Operator::Ne),
            ">" => Some(Operator::Gt),
            "<" => Some(Operator::Lt),
            ">=" => Some(Operator::Ge),
            "<=" => Some(Operator::Le),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    /// `left op right`
    Compare { left: String, op: Operator, right: String },
    /// A bare path tested for truthiness.
    Truthy(String),
}

fn operator_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s*(===|!==|==|!=|>=|<=|>|<)\s*").unwrap())
}

impl Condition {
    /// Exactly one operator makes a comparison; none (or several) falls back
    /// to a truthiness test of the whole expression.
    pub fn parse(expr: &str) -> Result<Self, Error> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Err(Error::InvalidCondition(expr.to_string()));
        }
        let ops: Vec<_> = operator_regex().captures_iter(expr).collect();
        if ops.len() != 1 {
            return Ok(Condition::Truthy(expr.to_string()));
        }
        let whole = ops[0].get(0).map_or(0..0, |m| m.range());
        let op = ops[0]
            .get(1)
            .and_then(|m| Operator::parse(m.as_str()))
            .ok_or_else(|| Error::InvalidCondition(expr.to_string()))?;
        let left = expr[..whole.start].trim();
        let right = expr[whole.end..].trim();
        if left.is_empty() || right.is_empty() {
            return Err(Error::InvalidCondition(expr.to_string()));
        }
        Ok(Condition::Compare { left: left.to_string(), op, right: right.to_string() })
    }

    pub fn evaluate(&self, data: &Value) -> bool {
        match self {
            Condition::Truthy(path) => truthy(resolve(path, data)),
            Condition::Compare { left, op, right } => {
                let left = resolve(left, data);
                let right = right_operand(right, data);
                compare(left, *op, &right)
            }
        }
    }
}

/// Number literal, else a context path, else the literal with quotes removed.
fn right_operand(raw: &str, data: &Value) -> Value {
    if let Ok(n) = raw.parse::<f64>()
        && let Some(num) = serde_json::Number::from_f64(n)
    {
        return Value::Number(num);
    }
    let resolved = resolve(raw, data);
    if truthy(resolved) {
        return resolved.clone();
    }
    Value::String(raw.replace(['"', '\''], ""))
}

/// Parse and evaluate; an unparseable expression is false.
pub fn evaluate(expr: &str, data: &Value) -> Result<bool, Error> {
    Condition::parse(expr).map(|cond| cond.evaluate(data))
}

/// Evaluate a table row rule `field op value` against one data element's
/// field, `None` when the element has no such field. Ordering operators
/// compare numerically against the parsed float and are false for an
/// absent field.
pub fn evaluate_row_rule(field_value: Option<&Value>, op: Operator, raw: &str) -> bool {
    let raw = raw.trim();
    match (op, field_value) {
        (Operator::Eq | Operator::Ne, value) => compare(
            value.unwrap_or(&Value::Null),
            op,
            &Value::String(raw.to_string()),
        ),
        (_, None) => false,
        (_, Some(value)) => {
            let threshold = parse_leading_float(raw);
            order(to_number(value).partial_cmp(&threshold), op)
        }
    }
}

/// Loose comparison: equal strings compare as strings, mixed types numerically.
pub fn compare(left: &Value, op: Operator, right: &Value) -> bool {
    match op {
        Operator::Eq => loose_eq(left, right),
        Operator::Ne => !loose_eq(left, right),
        _ => match (left, right) {
            (Value::String(a), Value::String(b)) => order(Some(a.cmp(b)), op),
            _ => order(to_number(left).partial_cmp(&to_number(right)), op),
        },
    }
}

fn order(ordering: Option<Ordering>, op: Operator) -> bool {
    let Some(ordering) = ordering else {
        return false;
    };
    match op {
        Operator::Gt => ordering == Ordering::Greater,
        Operator::Lt => ordering == Ordering::Less,
        Operator::Ge => ordering != Ordering::Less,
        Operator::Le => ordering != Ordering::Greater,
        Operator::Eq => ordering == Ordering::Equal,
        Operator::Ne => ordering != Ordering::Equal,
    }
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Array(_) | Value::Object(_), _) | (_, Value::Array(_) | Value::Object(_)) => {
            left == right
        }
        _ => {
            let (a, b) = (to_number(left), to_number(right));
            !a.is_nan() && a == b
        }
    }
}
