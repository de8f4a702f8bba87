//! Builtin filters and functions.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::Serialize;

use crate::filters::{self, FilterFn};
use crate::render::value::{binary, compare};
use crate::types::ast::BinaryOp;
use crate::{Error, ErrorKind, Map, Result, Value};

/// The most items `range` will produce.
const MAX_RANGE: i64 = 100_000;

pub fn register(filters: &mut BTreeMap<String, Box<FilterFn>>) {
    let mut add = |name: &str, f: Box<FilterFn>| {
        filters.insert(name.to_owned(), f);
    };
    add("abs", filters::new(abs));
    add("capitalize", filters::new(capitalize));
    add("first", filters::new(first));
    add("float", filters::new(float));
    add("int", filters::new(int));
    add("items", filters::new(items));
    add("join", filters::new(join));
    add("last", filters::new(last));
    add("length", filters::new(length));
    add("count", filters::new(length));
    add("list", filters::new(list));
    add("lower", filters::new(lower));
    add("replace", filters::new(replace));
    add("reverse", filters::new(reverse));
    add("round", filters::new(round));
    add("sort", filters::new(sort));
    add("string", filters::new(string));
    add("sum", filters::new(sum));
    add("title", filters::new(title));
    add("tojson", filters::new(tojson));
    add("trim", filters::new(trim));
    add("upper", filters::new(upper));
}

fn abs(v: Value) -> Result<Value> {
    match v {
        Value::Integer(i) => i
            .checked_abs()
            .map(Value::Integer)
            .ok_or_else(|| Error::new(ErrorKind::InvalidOperation, "integer overflow")),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        v => Err(expected("number", &v)),
    }
}

/// Uppercases the first character and lowercases the rest.
fn capitalize(s: String) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => s,
    }
}

fn first(v: Value) -> Result<Value> {
    Ok(match v {
        Value::List(list) => list.into_iter().next().unwrap_or_default(),
        Value::String(s) => s.chars().next().map(Value::from).unwrap_or_default(),
        Value::Map(map) => map.into_keys().next().map(Value::from).unwrap_or_default(),
        v => return Err(expected("sequence", &v)),
    })
}

fn last(v: Value) -> Result<Value> {
    Ok(match v {
        Value::List(mut list) => list.pop().unwrap_or_default(),
        Value::String(s) => s.chars().next_back().map(Value::from).unwrap_or_default(),
        Value::Map(map) => map.into_keys().next_back().map(Value::from).unwrap_or_default(),
        v => return Err(expected("sequence", &v)),
    })
}

/// Converts a value to a float, falling back to `default` or `0.0`.
fn float(v: Value, default: Option<f64>) -> f64 {
    let f = match v {
        Value::Integer(i) => Some(i as f64),
        Value::Float(f) => Some(f),
        Value::Bool(b) => Some(if b { 1.0 } else { 0.0 }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    f.or(default).unwrap_or(0.0)
}

/// Converts a value to an integer, truncating floats and falling back to
/// `default` or `0`.
fn int(v: Value, default: Option<i64>) -> i64 {
    let i = match v {
        Value::Integer(i) => Some(i),
        Value::Float(f) => truncate(f),
        Value::Bool(b) => Some(i64::from(b)),
        Value::String(s) => {
            let s = s.trim();
            s.parse()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(truncate))
        }
        _ => None,
    };
    i.or(default).unwrap_or(0)
}

fn truncate(f: f64) -> Option<i64> {
    let f = f.trunc();
    (f.is_finite() && f >= i64::MIN as f64 && f < i64::MAX as f64).then_some(f as i64)
}

/// Returns the key and value pairs of a map.
fn items(map: Map<String, Value>) -> Vec<Value> {
    map.into_iter()
        .map(|(k, v)| Value::List(vec![Value::String(k), v]))
        .collect()
}

fn join(list: Vec<Value>, sep: Option<String>, attribute: Option<String>) -> String {
    let sep = sep.unwrap_or_default();
    let mut s = String::new();
    for (i, item) in list.iter().enumerate() {
        if i > 0 {
            s.push_str(&sep);
        }
        let item = match &attribute {
            Some(attr) => item.get(attr).unwrap_or(&Value::None),
            None => item,
        };
        s.push_str(&item.to_string());
    }
    s
}

fn length(v: Value) -> Result<usize> {
    match v {
        Value::String(s) => Ok(s.chars().count()),
        Value::List(list) => Ok(list.len()),
        Value::Map(map) => Ok(map.len()),
        v => Err(expected("sequence", &v)),
    }
}

fn list(v: Value) -> Result<Vec<Value>> {
    match v {
        Value::List(list) => Ok(list),
        Value::String(s) => Ok(s.chars().map(Value::from).collect()),
        Value::Map(map) => Ok(map.into_keys().map(Value::from).collect()),
        v => Err(expected("iterable", &v)),
    }
}

fn lower(s: String) -> String {
    s.to_lowercase()
}

/// Replaces occurrences of a substring, at most `count` times if given.
fn replace(s: String, from: String, to: String, count: Option<i64>) -> String {
    match count {
        Some(n) if n >= 0 => s.replacen(&from, &to, n as usize),
        _ => s.replace(&from, &to),
    }
}

fn reverse(v: Value) -> Result<Value> {
    match v {
        Value::List(mut list) => {
            list.reverse();
            Ok(Value::List(list))
        }
        Value::String(s) => Ok(Value::String(s.chars().rev().collect())),
        v => Err(expected("sequence", &v)),
    }
}

/// Rounds a number to the given precision.
///
/// The method is one of `common` (half away from zero), `ceil` or `floor`.
fn round(v: f64, precision: Option<i64>, method: Option<String>) -> Result<f64> {
    let precision = precision.unwrap_or(0).clamp(-15, 15) as i32;
    let scale = 10f64.powi(precision);
    let x = v * scale;
    let x = match method.as_deref().unwrap_or("common") {
        "common" => x.round(),
        "ceil" => x.ceil(),
        "floor" => x.floor(),
        method => {
            return Err(Error::new(
                ErrorKind::InvalidOperation,
                format!("unknown rounding method `{method}`, expected one of common, ceil, floor"),
            ))
        }
    };
    Ok(x / scale)
}

/// Sorts a list, strings compare case insensitively unless
/// `case_sensitive` is set.
fn sort(
    mut list: Vec<Value>,
    reverse: Option<bool>,
    case_sensitive: Option<bool>,
    attribute: Option<String>,
) -> Result<Vec<Value>> {
    let case_sensitive = case_sensitive.unwrap_or(false);
    let key = |v: &Value| -> Value {
        let v = match &attribute {
            Some(attr) => v.get(attr).cloned().unwrap_or_default(),
            None => v.clone(),
        };
        match v {
            Value::String(s) if !case_sensitive => Value::String(s.to_lowercase()),
            v => v,
        }
    };

    let mut err = None;
    list.sort_by(|a, b| {
        let (a, b) = (key(a), key(b));
        compare(&a, &b).unwrap_or_else(|| {
            err.get_or_insert_with(|| {
                Error::new(
                    ErrorKind::InvalidOperation,
                    format!("cannot compare {} and {}", a.human(), b.human()),
                )
            });
            Ordering::Equal
        })
    });
    if let Some(err) = err {
        return Err(err);
    }
    if reverse.unwrap_or(false) {
        list.reverse();
    }
    Ok(list)
}

fn string(v: Value) -> String {
    match v {
        Value::String(s) => s,
        v => v.to_string(),
    }
}

fn sum(list: Vec<Value>, attribute: Option<String>, start: Option<Value>) -> Result<Value> {
    let mut total = start.unwrap_or(Value::Integer(0));
    for item in list {
        let item = match &attribute {
            Some(attr) => item.get(attr).cloned().unwrap_or_default(),
            None => item,
        };
        total = binary(BinaryOp::Add, &total, &item)?;
    }
    Ok(total)
}

/// Uppercases the first letter of each word.
fn title(s: String) -> String {
    let mut out = String::with_capacity(s.len());
    let mut boundary = true;
    for c in s.chars() {
        if boundary {
            out.extend(c.to_uppercase());
        } else {
            out.extend(c.to_lowercase());
        }
        boundary = c.is_whitespace() || matches!(c, '-' | '(' | '[' | '{' | '<');
    }
    out
}

/// Serializes a value to JSON, pretty printed if an indent is given.
///
/// Characters significant to HTML are written as `\uXXXX` escapes so the
/// output can be embedded in a page as is.
fn tojson(v: Value, indent: Option<i64>) -> Result<String> {
    let json = match indent {
        Some(n) if n > 0 => {
            let indent = " ".repeat(n as usize);
            let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
            let mut buf = Vec::new();
            let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
            v.serialize(&mut ser).map_err(err_json)?;
            String::from_utf8(buf)
                .map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))?
        }
        _ => serde_json::to_string(&v).map_err(err_json)?,
    };
    let mut out = String::with_capacity(json.len());
    for c in json.chars() {
        match c {
            '<' => out.push_str("\\u003c"),
            '>' => out.push_str("\\u003e"),
            '&' => out.push_str("\\u0026"),
            '\'' => out.push_str("\\u0027"),
            c => out.push(c),
        }
    }
    Ok(out)
}

fn err_json(err: serde_json::Error) -> Error {
    Error::new(
        ErrorKind::InvalidOperation,
        format!("failed to serialize to JSON: {err}"),
    )
}

/// Strips leading and trailing whitespace, or the given characters.
fn trim(s: String, chars: Option<String>) -> String {
    match chars {
        Some(chars) => s.trim_matches(|c| chars.contains(c)).to_owned(),
        None => s.trim().to_owned(),
    }
}

fn upper(s: String) -> String {
    s.to_uppercase()
}

/// `range(stop)`, `range(start, stop)` or `range(start, stop, step)`.
pub fn range(args: &[Value]) -> Result<Value> {
    let mut ints = Vec::with_capacity(args.len());
    for arg in args {
        match arg {
            Value::Integer(i) => ints.push(*i),
            v => {
                return Err(Error::new(
                    ErrorKind::InvalidOperation,
                    format!("`range` expected integer argument, found {}", v.human()),
                ))
            }
        }
    }
    let (start, stop, step) = match ints[..] {
        [stop] => (0, stop, 1),
        [start, stop] => (start, stop, 1),
        [start, stop, step] => (start, stop, step),
        _ => {
            return Err(Error::new(
                ErrorKind::ArgumentMismatch,
                format!("`range` expected 1 to 3 arguments, found {}", args.len()),
            ))
        }
    };
    if step == 0 {
        return Err(Error::new(
            ErrorKind::InvalidOperation,
            "`range` step must not be zero",
        ));
    }

    let (start, stop, step) = (i128::from(start), i128::from(stop), i128::from(step));
    let len = if (step > 0 && start < stop) || (step < 0 && start > stop) {
        ((stop - start).abs() + step.abs() - 1) / step.abs()
    } else {
        0
    };
    if len > i128::from(MAX_RANGE) {
        return Err(Error::new(
            ErrorKind::InvalidOperation,
            format!("`range` of {len} items exceeds the limit of {MAX_RANGE}"),
        ));
    }
    Ok((0..len)
        .map(|i| Value::Integer((start + i * step) as i64))
        .collect())
}

fn expected(exp: &str, v: &Value) -> Error {
    Error::new(
        ErrorKind::InvalidOperation,
        format!("filter expected {exp} value, found {}", v.human()),
    )
}
