use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserialize, Deserializer};

use crate::{Error, ErrorKind};

/// Controls what happens when a template uses a value that is not defined.
///
/// | Use of an undefined value       | strict | semistrict | lenient   | chainable |
/// |---------------------------------|--------|------------|-----------|-----------|
/// | `{{ missing }}`                 | error  | empty      | empty     | empty     |
/// | `{% if missing %}`              | error  | false      | false     | false     |
/// | `{% for x in missing %}`        | error  | error      | no items  | no items  |
/// | `{{ missing + 1 }}`             | error  | error      | undefined | undefined |
/// | `{{ missing.attr }}`            | error  | error      | error     | undefined |
///
/// In every mode the `defined` and `undefined` tests and the `default`
/// filter accept undefined values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum UndefinedBehavior {
    /// Any use of an undefined value is an error.
    #[default]
    Strict,
    /// Undefined values print as nothing and are false.
    Lenient,
    /// Like [`Lenient`][Self::Lenient] but accessing an attribute of an
    /// undefined value yields another undefined value.
    Chainable,
    /// Like [`Lenient`][Self::Lenient] for printing and conditions but any
    /// other use is an error.
    SemiStrict,
}

impl UndefinedBehavior {
    /// All the names accepted by [`FromStr`].
    pub const NAMES: &'static [&'static str] = &["strict", "lenient", "chainable", "semistrict"];

    pub(crate) fn allows_print(self) -> bool {
        !matches!(self, Self::Strict)
    }

    pub(crate) fn allows_truthiness(self) -> bool {
        !matches!(self, Self::Strict)
    }

    pub(crate) fn allows_iteration(self) -> bool {
        matches!(self, Self::Lenient | Self::Chainable)
    }

    pub(crate) fn allows_operation(self) -> bool {
        matches!(self, Self::Lenient | Self::Chainable)
    }

    pub(crate) fn allows_attribute(self) -> bool {
        matches!(self, Self::Chainable)
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Lenient => "lenient",
            Self::Chainable => "chainable",
            Self::SemiStrict => "semistrict",
        }
    }
}

impl fmt::Display for UndefinedBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UndefinedBehavior {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "strict" => Ok(Self::Strict),
            "lenient" => Ok(Self::Lenient),
            "chainable" => Ok(Self::Chainable),
            "semistrict" | "semi_strict" => Ok(Self::SemiStrict),
            _ => Err(Error::new(
                ErrorKind::BadOption,
                format!(
                    "unknown undefined behavior {s:?}, expected one of {}",
                    Self::NAMES.join(", ")
                ),
            )),
        }
    }
}

impl<'de> Deserialize<'de> for UndefinedBehavior {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(|err: Error| de::Error::custom(err.message()))
    }
}

impl serde::Serialize for UndefinedBehavior {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}
