//! Filter expressions
//!
//! The subset of the OData expression language the engine itself needs:
//! property paths, constants, comparisons and boolean connectives. Rendering
//! via [`Display`](std::fmt::Display) produces text the
//! [`parser`](super::parser) reads back.

use crate::model::Entity;
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Eq => "eq",
            CompareOp::Ne => "ne",
            CompareOp::Gt => "gt",
            CompareOp::Ge => "ge",
            CompareOp::Lt => "lt",
            CompareOp::Le => "le",
        }
    }

    pub fn from_keyword(word: &str) -> Option<Self> {
        Some(match word {
            "eq" => CompareOp::Eq,
            "ne" => CompareOp::Ne,
            "gt" => CompareOp::Gt,
            "ge" => CompareOp::Ge,
            "lt" => CompareOp::Lt,
            "le" => CompareOp::Le,
            _ => return None,
        })
    }

    fn holds(&self, ordering: Option<Ordering>) -> bool {
        match (self, ordering) {
            (CompareOp::Ne, None) => true,
            (_, None) => false,
            (CompareOp::Eq, Some(o)) => o == Ordering::Equal,
            (CompareOp::Ne, Some(o)) => o != Ordering::Equal,
            (CompareOp::Gt, Some(o)) => o == Ordering::Greater,
            (CompareOp::Ge, Some(o)) => o != Ordering::Less,
            (CompareOp::Lt, Some(o)) => o == Ordering::Less,
            (CompareOp::Le, Some(o)) => o != Ordering::Greater,
        }
    }
}

/// Expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Property path, one entry per `/`-separated step
    Path(Vec<String>),
    Constant(Value),
    Compare {
        op: CompareOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    And(Box<Expression>, Box<Expression>),
    Or(Box<Expression>, Box<Expression>),
    Not(Box<Expression>),
}

impl Expression {
    pub fn path(steps: &[&str]) -> Self {
        Expression::Path(steps.iter().map(|s| s.to_string()).collect())
    }

    /// Constant for values that have a literal form; `None` for null,
    /// arrays and objects
    pub fn constant(value: &Value) -> Option<Self> {
        match value {
            Value::Number(_) | Value::String(_) | Value::Bool(_) => {
                Some(Expression::Constant(value.clone()))
            }
            _ => None,
        }
    }

    pub fn compare(op: CompareOp, left: Expression, right: Expression) -> Self {
        Expression::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn and(self, other: Expression) -> Self {
        Expression::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Expression) -> Self {
        Expression::Or(Box::new(self), Box::new(other))
    }

    pub fn as_path(&self) -> Option<&[String]> {
        match self {
            Expression::Path(steps) => Some(steps),
            _ => None,
        }
    }

    /// Every property path used anywhere in the expression
    pub fn paths(&self) -> Vec<&[String]> {
        match self {
            Expression::Path(steps) => vec![steps.as_slice()],
            Expression::Constant(_) => Vec::new(),
            Expression::Compare { left, right, .. }
            | Expression::And(left, right)
            | Expression::Or(left, right) => {
                let mut paths = left.paths();
                paths.extend(right.paths());
                paths
            }
            Expression::Not(inner) => inner.paths(),
        }
    }

    /// Value of a path or constant for `entity`
    pub fn value(&self, entity: &Entity) -> Option<Value> {
        match self {
            Expression::Path(steps) => entity.value_for_path(steps),
            Expression::Constant(v) => Some(v.clone()),
            other => Some(Value::Bool(other.matches(entity))),
        }
    }

    /// Boolean evaluation against `entity`
    pub fn matches(&self, entity: &Entity) -> bool {
        match self {
            Expression::Compare { op, left, right } => {
                let l = left.value(entity).unwrap_or(Value::Null);
                let r = right.value(entity).unwrap_or(Value::Null);
                op.holds(compare_values(&l, &r))
            }
            Expression::And(a, b) => a.matches(entity) && b.matches(entity),
            Expression::Or(a, b) => a.matches(entity) || b.matches(entity),
            Expression::Not(inner) => !inner.matches(entity),
            Expression::Constant(Value::Bool(b)) => *b,
            Expression::Path(_) => matches!(self.value(entity), Some(Value::Bool(true))),
            Expression::Constant(_) => false,
        }
    }
}

/// Total order within one JSON kind; `None` across kinds or with null
/// on one side only
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn write_constant(f: &mut fmt::Formatter<'_>, value: &Value) -> fmt::Result {
    match value {
        Value::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
        other => write!(f, "{other}"),
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Path(steps) => f.write_str(&steps.join("/")),
            Expression::Constant(v) => write_constant(f, v),
            Expression::Compare { op, left, right } => {
                write!(f, "{left} {} {right}", op.as_str())
            }
            Expression::And(a, b) => write!(f, "({a} and {b})"),
            Expression::Or(a, b) => write!(f, "({a} or {b})"),
            Expression::Not(inner) => write!(f, "not ({inner})"),
        }
    }
}
