use std::cmp::Ordering;

use crate::types::ast::BinaryOp;
use crate::types::span::Span;
use crate::types::template::Template;
use crate::value::ValueCow;
use crate::{Error, ErrorKind, Result, Value};

/// The result of evaluating an expression.
#[derive(Clone)]
#[cfg_attr(internal_debug, derive(Debug))]
pub enum Eval<'a> {
    Value(ValueCow<'a>),
    /// Text that is already safe to output, e.g. the output of a macro.
    Markup(String),
    Undefined(Undefined<'a>),
}

/// A lookup that did not resolve to a value.
#[derive(Clone)]
#[cfg_attr(internal_debug, derive(Debug))]
pub struct Undefined<'a> {
    /// The template the lookup happened in.
    pub t: &'a Template,
    pub span: Span,
    pub reason: Reason<'a>,
}

/// Why an expression evaluated to undefined.
#[derive(Clone, Copy)]
#[cfg_attr(internal_debug, derive(Debug))]
pub enum Reason<'a> {
    /// A variable, attribute or item that does not exist.
    Lookup,
    /// An inline `if` whose condition was false and that has no `else`.
    NoElse,
    /// A parameter that was given no argument and has no default. The
    /// callee is `None` for `caller()`.
    MissingArg {
        param: &'a str,
        callee: Option<&'a str>,
    },
}

impl<'a> Eval<'a> {
    pub fn owned(value: impl Into<Value>) -> Self {
        Self::Value(ValueCow::Owned(value.into()))
    }

    pub fn undefined(t: &'a Template, span: Span) -> Self {
        Self::undefined_because(t, span, Reason::Lookup)
    }

    pub fn undefined_because(t: &'a Template, span: Span, reason: Reason<'a>) -> Self {
        Self::Undefined(Undefined { t, span, reason })
    }
}

impl Undefined<'_> {
    /// The expression that was undefined, e.g. `user.email`.
    pub fn path(&self) -> &str {
        &self.t.source.as_str()[self.span]
    }

    pub fn to_error(&self) -> Error {
        let msg = match self.reason {
            Reason::Lookup => format!("undefined variable `{}`", self.path()),
            Reason::NoElse => String::from("inline `if` has no `else` branch"),
            Reason::MissingArg {
                param,
                callee: Some(name),
            } => format!("missing argument `{param}` for macro `{name}`"),
            Reason::MissingArg { param, callee: None } => {
                format!("missing argument `{param}` for `caller`")
            }
        };
        Error::span(
            ErrorKind::UndefinedError,
            msg,
            &self.t.source,
            self.span,
        )
        .with_template_name(self.t.name.as_deref())
    }
}

/// Looks up an attribute of a value.
pub fn attr<'a>(value: ValueCow<'a>, name: &str) -> Option<ValueCow<'a>> {
    match value {
        ValueCow::Borrowed(Value::Map(map)) => map.get(name).map(ValueCow::Borrowed),
        ValueCow::Owned(Value::Map(mut map)) => map.swap_remove(name).map(ValueCow::Owned),
        _ => None,
    }
}

/// Looks up an item of a value by index or key.
///
/// Lists and strings accept negative indexes counting from the end.
pub fn item<'a>(value: ValueCow<'a>, index: &Value) -> Option<ValueCow<'a>> {
    match (value, index) {
        (ValueCow::Borrowed(Value::Map(map)), Value::String(key)) => {
            map.get(key.as_str()).map(ValueCow::Borrowed)
        }
        (ValueCow::Owned(Value::Map(mut map)), Value::String(key)) => {
            map.swap_remove(key.as_str()).map(ValueCow::Owned)
        }
        (ValueCow::Borrowed(Value::List(list)), Value::Integer(i)) => {
            let i = normalize(*i, list.len())?;
            list.get(i).map(ValueCow::Borrowed)
        }
        (ValueCow::Owned(Value::List(mut list)), Value::Integer(i)) => {
            let i = normalize(*i, list.len())?;
            (i < list.len()).then(|| ValueCow::Owned(list.swap_remove(i)))
        }
        (value, Value::Integer(i)) => match &*value {
            Value::String(s) => {
                let len = s.chars().count();
                let i = normalize(*i, len)?;
                s.chars().nth(i).map(|c| ValueCow::Owned(Value::from(c)))
            }
            _ => None,
        },
        _ => None,
    }
}

fn normalize(i: i64, len: usize) -> Option<usize> {
    if i < 0 {
        len.checked_sub(usize::try_from(i.unsigned_abs()).ok()?)
    } else {
        usize::try_from(i).ok()
    }
}

/// Applies a binary operator to two values.
///
/// The short circuiting `and` and `or` operators are handled by the
/// renderer.
pub fn binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(lhs == rhs)),
        BinaryOp::Ne => Ok(Value::Bool(lhs != rhs)),
        BinaryOp::Lt => cmp(op, lhs, rhs).map(|o| Value::Bool(o.is_lt())),
        BinaryOp::Le => cmp(op, lhs, rhs).map(|o| Value::Bool(o.is_le())),
        BinaryOp::Gt => cmp(op, lhs, rhs).map(|o| Value::Bool(o.is_gt())),
        BinaryOp::Ge => cmp(op, lhs, rhs).map(|o| Value::Bool(o.is_ge())),
        BinaryOp::In => contains(rhs, lhs).map(Value::Bool),
        BinaryOp::NotIn => contains(rhs, lhs).map(|b| Value::Bool(!b)),
        BinaryOp::Concat => Ok(Value::String(format!("{lhs}{rhs}"))),
        BinaryOp::Add => add(lhs, rhs),
        BinaryOp::Sub => arithmetic(op, lhs, rhs, i64::checked_sub, |a, b| a - b),
        BinaryOp::Mul => arithmetic(op, lhs, rhs, i64::checked_mul, |a, b| a * b),
        BinaryOp::Div => {
            let (a, b) = floats(op, lhs, rhs)?;
            if b == 0.0 {
                return Err(Error::new(ErrorKind::InvalidOperation, "division by zero"));
            }
            Ok(Value::Float(a / b))
        }
        BinaryOp::FloorDiv => {
            check_zero(rhs)?;
            arithmetic(op, lhs, rhs, floor_div, |a, b| (a / b).floor())
        }
        BinaryOp::Rem => {
            check_zero(rhs)?;
            arithmetic(op, lhs, rhs, floor_rem, |a, b| a - b * (a / b).floor())
        }
        BinaryOp::And | BinaryOp::Or => Err(err_unsupported(op, lhs, rhs)),
    }
}

fn add(lhs: &Value, rhs: &Value) -> Result<Value> {
    match (lhs, rhs) {
        (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
        (Value::List(a), Value::List(b)) => Ok(Value::List(a.iter().chain(b).cloned().collect())),
        _ => arithmetic(BinaryOp::Add, lhs, rhs, i64::checked_add, |a, b| a + b),
    }
}

fn arithmetic(
    op: BinaryOp,
    lhs: &Value,
    rhs: &Value,
    int: fn(i64, i64) -> Option<i64>,
    float: fn(f64, f64) -> f64,
) -> Result<Value> {
    match (lhs, rhs) {
        (Value::Integer(a), Value::Integer(b)) => int(*a, *b).map(Value::Integer).ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidOperation,
                format!("integer overflow in `{a} {} {b}`", op.human()),
            )
        }),
        _ => {
            let (a, b) = floats(op, lhs, rhs)?;
            Ok(Value::Float(float(a, b)))
        }
    }
}

fn floats(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<(f64, f64)> {
    match (as_f64(lhs), as_f64(rhs)) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(err_unsupported(op, lhs, rhs)),
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Integer(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

fn check_zero(rhs: &Value) -> Result<()> {
    match rhs {
        Value::Integer(0) => Err(Error::new(
            ErrorKind::InvalidOperation,
            "division by zero",
        )),
        Value::Float(f) if *f == 0.0 => Err(Error::new(
            ErrorKind::InvalidOperation,
            "division by zero",
        )),
        _ => Ok(()),
    }
}

fn floor_div(a: i64, b: i64) -> Option<i64> {
    let q = a.checked_div(b)?;
    if (a % b != 0) && ((a < 0) != (b < 0)) {
        q.checked_sub(1)
    } else {
        Some(q)
    }
}

fn floor_rem(a: i64, b: i64) -> Option<i64> {
    let r = a.checked_rem(b)?;
    if r != 0 && ((r < 0) != (b < 0)) {
        r.checked_add(b)
    } else {
        Some(r)
    }
}

fn cmp(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Ordering> {
    compare(lhs, rhs).ok_or_else(|| err_unsupported(op, lhs, rhs))
}

/// Orders two values of compatible types.
pub fn compare(lhs: &Value, rhs: &Value) -> Option<Ordering> {
    match (lhs, rhs) {
        (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::List(a), Value::List(b)) => {
            for (x, y) in a.iter().zip(b) {
                match compare(x, y)? {
                    Ordering::Equal => continue,
                    ord => return Some(ord),
                }
            }
            Some(a.len().cmp(&b.len()))
        }
        _ => as_f64(lhs)?.partial_cmp(&as_f64(rhs)?),
    }
}

/// Whether `container` contains `needle`.
pub fn contains(container: &Value, needle: &Value) -> Result<bool> {
    match (container, needle) {
        (Value::String(s), Value::String(sub)) => Ok(s.contains(sub.as_str())),
        (Value::String(_), v) => Err(Error::new(
            ErrorKind::InvalidOperation,
            format!("`in <string>` requires a string, found {}", v.human()),
        )),
        (Value::List(list), v) => Ok(list.contains(v)),
        (Value::Map(map), Value::String(key)) => Ok(map.contains_key(key.as_str())),
        (Value::Map(_), _) => Ok(false),
        (v, _) => Err(Error::new(
            ErrorKind::InvalidOperation,
            format!("cannot check membership in {}", v.human()),
        )),
    }
}

fn err_unsupported(op: BinaryOp, lhs: &Value, rhs: &Value) -> Error {
    Error::new(
        ErrorKind::InvalidOperation,
        format!(
            "unsupported operand types for `{}`: {} and {}",
            op.human(),
            lhs.human(),
            rhs.human()
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_arithmetic() {
        let v = |op, a: Value, b: Value| binary(op, &a, &b).unwrap();
        assert_eq!(v(BinaryOp::Add, 1.into(), 2.into()), Value::Integer(3));
        assert_eq!(v(BinaryOp::Add, 1.into(), 0.5.into()), Value::Float(1.5));
        assert_eq!(v(BinaryOp::Add, "a".into(), "b".into()), Value::from("ab"));
        assert_eq!(v(BinaryOp::Div, 7.into(), 2.into()), Value::Float(3.5));
        assert_eq!(v(BinaryOp::FloorDiv, (-7).into(), 2.into()), Value::Integer(-4));
        assert_eq!(v(BinaryOp::Rem, (-7).into(), 3.into()), Value::Integer(2));
        assert_eq!(v(BinaryOp::Rem, 7.into(), (-3).into()), Value::Integer(-2));
        assert_eq!(v(BinaryOp::Concat, 1.into(), "x".into()), Value::from("1x"));
    }

    #[test]
    fn binary_errors() {
        let err = binary(BinaryOp::Add, &i64::MAX.into(), &1.into()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOperation);
        let err = binary(BinaryOp::Div, &1.into(), &0.into()).unwrap_err();
        assert_eq!(err.message(), "division by zero");
        let err = binary(BinaryOp::Sub, &"a".into(), &1.into()).unwrap_err();
        assert_eq!(
            err.message(),
            "unsupported operand types for `-`: string and integer"
        );
        let err = binary(BinaryOp::Lt, &"a".into(), &1.into()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOperation);
    }

    #[test]
    fn binary_membership() {
        let list = Value::from([1, 2, 3]);
        assert_eq!(binary(BinaryOp::In, &2.into(), &list).unwrap(), Value::Bool(true));
        let map = value! { a: 1 };
        assert_eq!(binary(BinaryOp::NotIn, &"a".into(), &map).unwrap(), Value::Bool(false));
        assert_eq!(
            binary(BinaryOp::In, &"ell".into(), &"hello".into()).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn item_negative_index() {
        let list = Value::from([1, 2, 3]);
        let v = item(ValueCow::Borrowed(&list), &Value::Integer(-1)).unwrap();
        assert_eq!(*v, Value::Integer(3));
        assert!(item(ValueCow::Borrowed(&list), &Value::Integer(3)).is_none());
        assert!(item(ValueCow::Borrowed(&list), &Value::Integer(-4)).is_none());
        let s = Value::from("héllo");
        let v = item(ValueCow::Owned(s), &Value::Integer(1)).unwrap();
        assert_eq!(*v, Value::from("é"));
    }

    #[test]
    fn attr_lookup() {
        let map = value! { user: { name: "John" } };
        let user = attr(ValueCow::Borrowed(&map), "user").unwrap();
        let name = attr(user, "name").unwrap();
        assert_eq!(*name, Value::from("John"));
        assert!(attr(ValueCow::Owned(Value::None), "x").is_none());
    }
}
