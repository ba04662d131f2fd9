//! Closed expression language for data-processing steps.
//!
//! Expressions are JSON trees tagged by `op` and evaluated against a single
//! row (`filter`, `map`, `sort` by key) or a pair of rows (`sort` with a
//! comparator, fields addressed as `a.*` / `b.*`). Nothing here executes
//! caller-supplied code.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Number, Value};

/// Failure while evaluating an expression.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("`{op}` cannot combine {left} and {right}")]
    TypeMismatch {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },

    #[error("division by zero")]
    DivisionByZero,

    #[error("`{op}` produced a non-finite number")]
    NonFinite { op: &'static str },

    #[error("unknown binding `{0}`; comparator fields start with `a.` or `b.`")]
    UnknownBinding(String),
}

/// What field paths resolve against.
#[derive(Debug, Clone, Copy)]
pub enum Scope<'a> {
    Row(&'a Value),
    Pair { a: &'a Value, b: &'a Value },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Expr {
    Literal { value: Value },
    /// Dotted path into the row; numeric segments index arrays. Missing is `null`.
    Field { path: String },

    Eq { left: Box<Expr>, right: Box<Expr> },
    Ne { left: Box<Expr>, right: Box<Expr> },
    Gt { left: Box<Expr>, right: Box<Expr> },
    Gte { left: Box<Expr>, right: Box<Expr> },
    Lt { left: Box<Expr>, right: Box<Expr> },
    Lte { left: Box<Expr>, right: Box<Expr> },

    And { args: Vec<Expr> },
    Or { args: Vec<Expr> },
    Not { arg: Box<Expr> },

    Add { left: Box<Expr>, right: Box<Expr> },
    Sub { left: Box<Expr>, right: Box<Expr> },
    Mul { left: Box<Expr>, right: Box<Expr> },
    Div { left: Box<Expr>, right: Box<Expr> },
    Mod { left: Box<Expr>, right: Box<Expr> },

    Concat { args: Vec<Expr> },
    Object { fields: BTreeMap<String, Expr> },
    If {
        cond: Box<Expr>,
        then: Box<Expr>,
        #[serde(rename = "else", default = "null_expr")]
        otherwise: Box<Expr>,
    },
}

fn null_expr() -> Box<Expr> {
    Box::new(Expr::Literal { value: Value::Null })
}

#[derive(Debug, Clone, Copy)]
enum Arith {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl Arith {
    fn name(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Mod => "mod",
        }
    }
}

impl Expr {
    pub fn eval(&self, scope: Scope<'_>) -> Result<Value, EvalError> {
        match self {
            Self::Literal { value } => Ok(value.clone()),
            Self::Field { path } => resolve(scope, path),

            Self::Eq { left, right } => Ok(Value::Bool(loose_eq(
                &left.eval(scope)?,
                &right.eval(scope)?,
            ))),
            Self::Ne { left, right } => Ok(Value::Bool(!loose_eq(
                &left.eval(scope)?,
                &right.eval(scope)?,
            ))),
            Self::Gt { left, right } => ordered(scope, "gt", left, right, Ordering::is_gt),
            Self::Gte { left, right } => ordered(scope, "gte", left, right, Ordering::is_ge),
            Self::Lt { left, right } => ordered(scope, "lt", left, right, Ordering::is_lt),
            Self::Lte { left, right } => ordered(scope, "lte", left, right, Ordering::is_le),

            Self::And { args } => {
                for arg in args {
                    if !is_truthy(&arg.eval(scope)?) {
                        return Ok(Value::Bool(false));
                    }
                }
                Ok(Value::Bool(true))
            }
            Self::Or { args } => {
                for arg in args {
                    if is_truthy(&arg.eval(scope)?) {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            Self::Not { arg } => Ok(Value::Bool(!is_truthy(&arg.eval(scope)?))),

            Self::Add { left, right } => arith(scope, Arith::Add, left, right),
            Self::Sub { left, right } => arith(scope, Arith::Sub, left, right),
            Self::Mul { left, right } => arith(scope, Arith::Mul, left, right),
            Self::Div { left, right } => arith(scope, Arith::Div, left, right),
            Self::Mod { left, right } => arith(scope, Arith::Mod, left, right),

            Self::Concat { args } => {
                let mut out = String::new();
                for arg in args {
                    match arg.eval(scope)? {
                        Value::String(s) => out.push_str(&s),
                        Value::Null => {}
                        other => out.push_str(&other.to_string()),
                    }
                }
                Ok(Value::String(out))
            }
            Self::Object { fields } => {
                let mut map = serde_json::Map::new();
                for (name, expr) in fields {
                    map.insert(name.clone(), expr.eval(scope)?);
                }
                Ok(Value::Object(map))
            }
            Self::If {
                cond,
                then,
                otherwise,
            } => {
                if is_truthy(&cond.eval(scope)?) {
                    then.eval(scope)
                } else {
                    otherwise.eval(scope)
                }
            }
        }
    }
}

/// `null`, `false`, `0`, and `""` are falsy; everything else is truthy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Total order used for sorting by key: null < booleans < numbers < strings
/// < arrays < objects; composite values compare by their JSON text.
pub fn sort_order(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.total_cmp(&y)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(_), Value::Array(_)) | (Value::Object(_), Value::Object(_)) => {
            a.to_string().cmp(&b.to_string())
        }
        _ => rank(a).cmp(&rank(b)),
    }
}

fn resolve(scope: Scope<'_>, path: &str) -> Result<Value, EvalError> {
    let (root, rest) = match scope {
        Scope::Row(row) => (row, path),
        Scope::Pair { a, b } => {
            let (binding, rest) = path.split_once('.').unwrap_or((path, ""));
            match binding {
                "a" => (a, rest),
                "b" => (b, rest),
                other => return Err(EvalError::UnknownBinding(other.to_string())),
            }
        }
    };

    let mut current = root;
    for segment in rest.split('.').filter(|s| !s.is_empty()) {
        let next = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        match next {
            Some(v) => current = v,
            None => return Ok(Value::Null),
        }
    }
    Ok(current.clone())
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn ordered(
    scope: Scope<'_>,
    op: &'static str,
    left: &Expr,
    right: &Expr,
    test: fn(Ordering) -> bool,
) -> Result<Value, EvalError> {
    let (l, r) = (left.eval(scope)?, right.eval(scope)?);
    let ordering = match (&l, &r) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .zip(y.as_f64())
            .and_then(|(x, y)| x.partial_cmp(&y)),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    };
    ordering
        .map(|o| Value::Bool(test(o)))
        .ok_or(EvalError::TypeMismatch {
            op,
            left: type_name(&l),
            right: type_name(&r),
        })
}

fn arith(scope: Scope<'_>, op: Arith, left: &Expr, right: &Expr) -> Result<Value, EvalError> {
    let (l, r) = (left.eval(scope)?, right.eval(scope)?);
    let (Value::Number(x), Value::Number(y)) = (&l, &r) else {
        return Err(EvalError::TypeMismatch {
            op: op.name(),
            left: type_name(&l),
            right: type_name(&r),
        });
    };

    // Stay in integers while the result is exact.
    if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
        let exact = match op {
            Arith::Add => x.checked_add(y),
            Arith::Sub => x.checked_sub(y),
            Arith::Mul => x.checked_mul(y),
            Arith::Div if y == 0 => return Err(EvalError::DivisionByZero),
            Arith::Div => (x % y == 0).then(|| x / y),
            Arith::Mod if y == 0 => return Err(EvalError::DivisionByZero),
            Arith::Mod => x.checked_rem(y),
        };
        if let Some(n) = exact {
            return Ok(Value::Number(n.into()));
        }
    }

    let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
    let result = match op {
        Arith::Add => x + y,
        Arith::Sub => x - y,
        Arith::Mul => x * y,
        Arith::Div | Arith::Mod if y == 0.0 => return Err(EvalError::DivisionByZero),
        Arith::Div => x / y,
        Arith::Mod => x % y,
    };
    Number::from_f64(result)
        .map(Value::Number)
        .ok_or(EvalError::NonFinite { op: op.name() })
}
