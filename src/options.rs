//! Render options and the one-shot render functions.

use std::path::PathBuf;

use serde::Deserialize;

use crate::types::escape::AutoEscape;
use crate::{to_value, Engine, Error, ErrorKind, Map, Result, UndefinedBehavior, Value};

/// Options for a render.
///
/// Options can be built in code or deserialized, for example from JSON
/// using [`Options::from_json`].
///
/// ```
/// let options = trellis::Options::from_json(r#"{
///     "autoescape_on": [".html"],
///     "undefined_behavior": "lenient"
/// }"#)?;
/// assert_eq!(options.undefined_behavior, trellis::UndefinedBehavior::Lenient);
/// # Ok::<(), trellis::Error>(())
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Options {
    /// Always or never escape output. When unset the extension rules in
    /// `autoescape_on` apply, and without those escaping is on.
    pub autoescape: Option<bool>,

    /// Escape templates whose name ends with one of these extensions.
    pub autoescape_on: Vec<String>,

    /// Load templates from this directory. If this is a file its parent
    /// directory is used.
    ///
    /// When set, the template passed to [`render_json`] is the name of a
    /// template in the directory rather than template source.
    pub template_path: Option<PathBuf>,

    pub undefined_behavior: UndefinedBehavior,

    /// The maximum depth of nested macro calls, includes and blocks.
    pub max_recursion: Option<usize>,
}

impl Options {
    /// The default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse options from a JSON object.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|err| {
            Error::new(ErrorKind::BadOption, format!("invalid options: {err}"))
        })
    }

    /// Always or never escape output.
    pub fn autoescape(mut self, on: bool) -> Self {
        self.autoescape = Some(on);
        self
    }

    /// Escape templates whose name ends with one of the given extensions.
    pub fn autoescape_on<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.autoescape_on = extensions.into_iter().map(Into::into).collect();
        self
    }

    /// Load templates from the given directory.
    pub fn template_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.template_path = Some(path.into());
        self
    }

    pub fn undefined_behavior(mut self, behavior: UndefinedBehavior) -> Self {
        self.undefined_behavior = behavior;
        self
    }

    pub fn max_recursion(mut self, depth: usize) -> Self {
        self.max_recursion = Some(depth);
        self
    }

    pub(crate) fn auto_escape(&self) -> AutoEscape {
        AutoEscape::on_extensions(self.autoescape_on.iter().cloned()).with_explicit(self.autoescape)
    }
}

/// Render a template against a JSON context.
///
/// The context must be a JSON object. `None` or blank text renders with an
/// empty context.
///
/// ```
/// let options = trellis::Options::new();
/// let result = trellis::render_json(
///     "{{ items | join(', ') }}",
///     Some(r#"{"items": ["Apple", "Banana", "Cherry"]}"#),
///     &options,
/// )?;
/// assert_eq!(result, "Apple, Banana, Cherry");
/// # Ok::<(), trellis::Error>(())
/// ```
pub fn render_json(template: &str, context: Option<&str>, options: &Options) -> Result<String> {
    let context = match context.map(str::trim) {
        None | Some("") => Value::Map(Map::new()),
        Some(json) => serde_json::from_str::<Value>(json)
            .map_err(|err| Error::new(ErrorKind::BadContext, format!("invalid JSON: {err}")))?,
    };
    render(template, &context, options)
}

/// Render a template against any serializable context.
///
/// ```
/// let options = trellis::Options::new();
/// let result = trellis::render_str(
///     "{{ company }}",
///     trellis::value! { company: "B&O" },
///     &options,
/// )?;
/// assert_eq!(result, "B&amp;O");
/// # Ok::<(), trellis::Error>(())
/// ```
pub fn render_str<S>(template: &str, context: S, options: &Options) -> Result<String>
where
    S: serde::Serialize,
{
    let context = to_value(context)?;
    render(template, &context, options)
}

fn render(template: &str, context: &Value, options: &Options) -> Result<String> {
    let engine = Engine::with_options(options);
    match options.template_path {
        Some(_) => engine.get_template(template)?.render_value(context),
        None => engine.compile(template)?.render_value(context),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_from_json() {
        let options = Options::from_json(
            r#"{"autoescape": false, "undefined_behavior": "SemiStrict", "max_recursion": 8}"#,
        )
        .unwrap();
        assert_eq!(
            options,
            Options::new()
                .autoescape(false)
                .undefined_behavior(UndefinedBehavior::SemiStrict)
                .max_recursion(8)
        );
    }

    #[test]
    fn options_from_json_errors() {
        let err = Options::from_json(r#"{"undefined_behavior": "loose"}"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadOption);
        assert!(err.message().contains("unknown undefined behavior"), "{err}");

        let err = Options::from_json(r#"{"autoescap": true}"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadOption);
    }

    #[test]
    fn options_auto_escape_rules() {
        let rules = Options::new().autoescape_on([".html"]).auto_escape();
        assert!(rules.should_escape(Some("a.html")));
        assert!(!rules.should_escape(Some("a.txt")));
        let rules = Options::new().autoescape_on([".html"]).autoescape(true).auto_escape();
        assert!(rules.should_escape(Some("a.txt")));
    }

    #[test]
    fn render_json_context() {
        let options = Options::new();
        assert_eq!(render_json("hi", None, &options).unwrap(), "hi");
        assert_eq!(render_json("hi", Some("  "), &options).unwrap(), "hi");
        let err = render_json("hi", Some("{"), &options).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadContext);
        assert!(err.message().starts_with("invalid JSON: "));
        let err = render_json("hi", Some("[1]"), &options).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadContext);
    }
}
