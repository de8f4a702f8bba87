//! Builtin tests, used with `is` e.g. `{% if n is even %}`.
//!
//! `defined` and `undefined` are handled by the renderer since they are the
//! only tests that can see undefined values.

use std::collections::BTreeMap;

use crate::filters::{self, FilterFn};
use crate::{Error, ErrorKind, Result, Value};

pub fn register(tests: &mut BTreeMap<String, Box<FilterFn>>) {
    let mut add = |name: &str, f: Box<FilterFn>| {
        tests.insert(name.to_owned(), f);
    };
    add("none", filters::new(|v: Value| v.is_none()));
    add("boolean", filters::new(|v: Value| matches!(v, Value::Bool(_))));
    add(
        "number",
        filters::new(|v: Value| matches!(v, Value::Integer(_) | Value::Float(_))),
    );
    add("integer", filters::new(|v: Value| matches!(v, Value::Integer(_))));
    add("float", filters::new(|v: Value| matches!(v, Value::Float(_))));
    add("string", filters::new(|v: Value| matches!(v, Value::String(_))));
    add(
        "sequence",
        filters::new(|v: Value| matches!(v, Value::List(_) | Value::String(_))),
    );
    add("mapping", filters::new(|v: Value| matches!(v, Value::Map(_))));
    add(
        "iterable",
        filters::new(|v: Value| {
            matches!(v, Value::List(_) | Value::Map(_) | Value::String(_))
        }),
    );
    add("even", filters::new(|n: i64| n % 2 == 0));
    add("odd", filters::new(|n: i64| n % 2 != 0));
    add("divisibleby", filters::new(divisibleby));
    add("eq", filters::new(|a: Value, b: Value| a == b));
    add("equalto", filters::new(|a: Value, b: Value| a == b));
    add("lower", filters::new(|s: String| is_case(&s, char::is_lowercase)));
    add("upper", filters::new(|s: String| is_case(&s, char::is_uppercase)));
}

fn divisibleby(n: i64, d: i64) -> Result<bool> {
    if d == 0 {
        return Err(Error::new(ErrorKind::InvalidOperation, "division by zero"));
    }
    Ok(n % d == 0)
}

/// Whether every cased character satisfies `f`, and there is at least one.
fn is_case(s: &str, f: fn(char) -> bool) -> bool {
    let mut cased = s
        .chars()
        .filter(|c| c.is_lowercase() || c.is_uppercase())
        .peekable();
    cased.peek().is_some() && cased.all(f)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test(name: &str, value: impl Into<Value>, args: Vec<Value>) -> Result<bool> {
        let mut tests = BTreeMap::new();
        register(&mut tests);
        tests[name](value.into(), args).map(|v| v.is_true())
    }

    #[test]
    fn tests_types() {
        assert!(test("none", Value::None, vec![]).unwrap());
        assert!(test("number", 1.5, vec![]).unwrap());
        assert!(!test("integer", 1.5, vec![]).unwrap());
        assert!(test("sequence", "abc", vec![]).unwrap());
        assert!(!test("mapping", "abc", vec![]).unwrap());
        assert!(test("iterable", value! {}, vec![]).unwrap());
    }

    #[test]
    fn tests_numbers() {
        assert!(test("even", 4, vec![]).unwrap());
        assert!(test("odd", -3, vec![]).unwrap());
        assert!(test("divisibleby", 9, vec![Value::from(3)]).unwrap());
        let err = test("divisibleby", 9, vec![Value::from(0)]).unwrap_err();
        assert_eq!(err.message(), "division by zero");
        let err = test("even", "x", vec![]).unwrap_err();
        assert_eq!(err.message(), "filter expected integer value, found string");
    }

    #[test]
    fn tests_case_and_equality() {
        assert!(test("lower", "abc 1", vec![]).unwrap());
        assert!(!test("lower", "aBc", vec![]).unwrap());
        assert!(!test("upper", "123", vec![]).unwrap());
        assert!(test("eq", 1, vec![Value::Float(1.0)]).unwrap());
        assert!(!test("equalto", "a", vec![Value::from("b")]).unwrap());
    }
}
