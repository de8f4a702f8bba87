//! Printing values to template output.

use std::fmt;

use crate::Value;

impl fmt::Display for Value {
    /// Formats the value as it appears in template output.
    ///
    /// Strings are printed as is, `none` prints as `none` and floats with an
    /// integral value keep a trailing `.0`. Lists and maps are printed in a
    /// JSON like form with quoted strings.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => f.write_str(s),
            value => repr(f, value),
        }
    }
}

fn repr(f: &mut fmt::Formatter<'_>, value: &Value) -> fmt::Result {
    match value {
        Value::None => f.write_str("none"),
        Value::Bool(b) => write!(f, "{b}"),
        Value::Integer(n) => write!(f, "{n}"),
        Value::Float(n) => float(f, *n),
        Value::String(s) => write!(f, "{}", Quoted(s)),
        Value::List(list) => {
            f.write_str("[")?;
            for (i, item) in list.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                repr(f, item)?;
            }
            f.write_str("]")
        }
        Value::Map(map) => {
            f.write_str("{")?;
            for (i, (key, item)) in map.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{}: ", Quoted(key))?;
                repr(f, item)?;
            }
            f.write_str("}")
        }
    }
}

fn float(f: &mut fmt::Formatter<'_>, n: f64) -> fmt::Result {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e16 {
        write!(f, "{n:.1}")
    } else {
        write!(f, "{n}")
    }
}

/// A string printed with JSON quoting rules.
struct Quoted<'a>(&'a str);

impl fmt::Display for Quoted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self.0) {
            Ok(s) => f.write_str(&s),
            Err(_) => Err(fmt::Error),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::Value;

    #[test]
    fn display_scalars() {
        assert_eq!(Value::None.to_string(), "none");
        assert_eq!(Value::Bool(true).to_string(), "true");
        assert_eq!(Value::Integer(-3).to_string(), "-3");
        assert_eq!(Value::Float(2.0).to_string(), "2.0");
        assert_eq!(Value::Float(2.5).to_string(), "2.5");
        assert_eq!(Value::Float(f64::INFINITY).to_string(), "inf");
        assert_eq!(Value::from("a \"b\"").to_string(), "a \"b\"");
    }

    #[test]
    fn display_collections() {
        let v = value! { name: "x", tags: ["a", 1, None, 1.0], nested: {} };
        assert_eq!(
            v.to_string(),
            r#"{"name": "x", "tags": ["a", 1, none, 1.0], "nested": {}}"#
        );
    }
}
