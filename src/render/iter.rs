use crate::types::ast;
use crate::value::ValueCow;
use crate::{Error, ErrorKind, Map, Result, Value};

/// The values bound by one iteration of a `for` loop.
#[derive(Debug)]
pub enum Item<'a> {
    One(ValueCow<'a>),
    Two(ValueCow<'a>, ValueCow<'a>),
}

/// Collects the items of an iterable value.
///
/// - Lists yield their elements.
/// - Maps yield their keys, or key and value pairs when unpacked into two
///   variables.
/// - Strings yield their characters.
///
/// Lists of pairs can also be unpacked into two variables.
pub fn items<'a>(iterable: ValueCow<'a>, vars: &ast::LoopVars) -> Result<Vec<Item<'a>>> {
    let pair = matches!(vars, ast::LoopVars::KeyValue(_));

    let items = match iterable {
        ValueCow::Borrowed(Value::List(list)) => {
            let iter = list.iter().map(ValueCow::Borrowed);
            if pair {
                return iter.map(unpack).collect();
            }
            iter.map(Item::One).collect()
        }

        ValueCow::Owned(Value::List(list)) => {
            let iter = list.into_iter().map(ValueCow::Owned);
            if pair {
                return iter.map(unpack).collect();
            }
            iter.map(Item::One).collect()
        }

        ValueCow::Borrowed(Value::Map(map)) => map
            .iter()
            .map(|(k, v)| {
                let k = ValueCow::Owned(Value::String(k.clone()));
                match pair {
                    true => Item::Two(k, ValueCow::Borrowed(v)),
                    false => Item::One(k),
                }
            })
            .collect(),

        ValueCow::Owned(Value::Map(map)) => map
            .into_iter()
            .map(|(k, v)| {
                let k = ValueCow::Owned(Value::String(k));
                match pair {
                    true => Item::Two(k, ValueCow::Owned(v)),
                    false => Item::One(k),
                }
            })
            .collect(),

        value => match &*value {
            Value::String(s) => {
                if pair {
                    return Err(err_unpack("string"));
                }
                s.chars()
                    .map(|c| Item::One(ValueCow::Owned(Value::from(c))))
                    .collect()
            }
            value => {
                return Err(Error::new(
                    ErrorKind::InvalidOperation,
                    format!("expected iterable, found {}", value.human()),
                ))
            }
        },
    };
    Ok(items)
}

/// Unpacks a two element list into a pair.
fn unpack(item: ValueCow<'_>) -> Result<Item<'_>> {
    match item {
        ValueCow::Borrowed(Value::List(list)) if list.len() == 2 => Ok(Item::Two(
            ValueCow::Borrowed(&list[0]),
            ValueCow::Borrowed(&list[1]),
        )),
        ValueCow::Owned(Value::List(list)) if list.len() == 2 => {
            let mut iter = list.into_iter().map(ValueCow::Owned);
            match (iter.next(), iter.next()) {
                (Some(a), Some(b)) => Ok(Item::Two(a, b)),
                _ => Err(err_unpack("list")),
            }
        }
        item => Err(err_unpack(item.human())),
    }
}

fn err_unpack(human: &str) -> Error {
    Error::new(
        ErrorKind::InvalidOperation,
        format!("cannot unpack {human} into two variables"),
    )
}

/// Builds the `loop` variable for an iteration.
pub fn loop_info(index0: usize, length: usize) -> Value {
    let mut map = Map::with_capacity(7);
    map.insert("index".into(), Value::from(index0 + 1));
    map.insert("index0".into(), Value::from(index0));
    map.insert("revindex".into(), Value::from(length - index0));
    map.insert("revindex0".into(), Value::from(length - index0 - 1));
    map.insert("first".into(), Value::Bool(index0 == 0));
    map.insert("last".into(), Value::Bool(index0 + 1 == length));
    map.insert("length".into(), Value::from(length));
    Value::Map(map)
}

/// Picks the argument for the current iteration of `loop.cycle(...)`.
pub fn cycle(index0: usize, args: Vec<Value>) -> Result<Value> {
    if args.is_empty() {
        return Err(Error::new(
            ErrorKind::ArgumentMismatch,
            "`loop.cycle` expects at least one argument",
        ));
    }
    let n = args.len();
    Ok(args.into_iter().nth(index0 % n).unwrap_or_default())
}
