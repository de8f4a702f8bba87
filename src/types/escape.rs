//! HTML escaping and the rules deciding when it applies.

use std::fmt::Write;

/// Decides whether output of a template is HTML escaped.
///
/// An explicit setting always wins. Otherwise, if a list of extensions is
/// configured, templates are escaped exactly when their name ends with one
/// of them. With no configuration at all, escaping is on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AutoEscape {
    explicit: Option<bool>,
    extensions: Vec<String>,
}

impl AutoEscape {
    /// The default rules, escaping everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Always or never escape, regardless of the template name.
    pub fn enabled(on: bool) -> Self {
        Self {
            explicit: Some(on),
            extensions: Vec::new(),
        }
    }

    /// Escape templates whose name ends with one of the given extensions.
    ///
    /// Extensions may be given with or without the leading dot.
    pub fn on_extensions<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            explicit: None,
            extensions: extensions.into_iter().map(Into::into).collect(),
        }
    }

    /// Overrides the extension rules with an explicit setting.
    pub fn with_explicit(mut self, explicit: Option<bool>) -> Self {
        self.explicit = explicit;
        self
    }

    /// Returns whether a template with the given name is escaped. Inline
    /// templates have no name.
    pub fn should_escape(&self, name: Option<&str>) -> bool {
        if let Some(on) = self.explicit {
            return on;
        }
        if self.extensions.is_empty() {
            return true;
        }
        let name = match name {
            Some(name) => name,
            None => return false,
        };
        self.extensions.iter().any(|ext| {
            let ext = ext.trim_start_matches('.');
            !ext.is_empty()
                && name
                    .strip_suffix(ext)
                    .map_or(false, |rest| rest.ends_with('.'))
        })
    }
}

/// Escapes HTML significant characters and appends the result to `out`.
pub fn escape_into(out: &mut String, s: &str) {
    let mut last = 0;
    for (i, c) in s.char_indices() {
        let rep = match c {
            '&' => "&amp;",
            '<' => "&lt;",
            '>' => "&gt;",
            '"' => "&quot;",
            '\'' => "&#x27;",
            _ => continue,
        };
        out.push_str(&s[last..i]);
        out.push_str(rep);
        last = i + 1;
    }
    out.push_str(&s[last..]);
}

/// Escapes HTML significant characters.
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    escape_into(&mut out, s);
    out
}

/// A [`Write`] adapter that escapes everything written through it.
pub struct Escaper<'a>(pub &'a mut String);

impl Write for Escaper<'_> {
    fn write_str(&mut self, s: &str) -> std::fmt::Result {
        escape_into(self.0, s);
        Ok(())
    }
}
