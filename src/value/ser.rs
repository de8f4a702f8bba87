use serde::ser::{Serialize, SerializeMap};

use crate::{Error, ErrorKind, Result, Value};

/// Convert a `T` to a `Value`.
///
/// The conversion goes through [`serde_json`] so anything that can be
/// serialized to JSON can be used as a template context.
pub fn to_value<T>(value: T) -> Result<Value>
where
    T: Serialize,
{
    serde_json::to_value(value)
        .map(Value::from)
        .map_err(|err| Error::new(ErrorKind::BadContext, err.to_string()))
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Value::None => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Integer(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::String(string) => serializer.serialize_str(string),
            Value::List(list) => list.serialize(serializer),
            Value::Map(map) => {
                let mut m = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map {
                    m.serialize_entry(k, v)?;
                }
                m.end()
            }
        }
    }
}
