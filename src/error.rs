use std::cmp::max;
use std::fmt;
use std::io;

#[cfg(feature = "unicode")]
use unicode_width::UnicodeWidthStr;

use crate::types::span::Span;

/// A convenient type alias for results in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// An error that can occur during template compilation, loading or
/// rendering.
#[derive(Clone)]
pub struct Error {
    kind: ErrorKind,
    msg: String,
    name: Option<String>,
    span: Option<(String, Span)>,
}

/// The kind of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A malformed expression, a stray end tag or a bad literal.
    SyntaxError,
    /// A tag, string or block that is never closed.
    UnclosedDelimiter,
    /// A statement keyword that is not known.
    UnknownTag,

    /// A template name that did not resolve to a template.
    TemplateNotFound,
    /// A template name that is absolute, contains `..` or escapes the root.
    InvalidTemplatePath,
    /// An `extends` chain that refers back to itself.
    CyclicInheritance,
    /// An I/O error while loading a template or writing output.
    Io,

    /// An undefined value was used where the undefined behavior forbids it.
    UndefinedError,
    /// An operation was applied to values of the wrong type.
    InvalidOperation,
    UnknownFilter,
    UnknownTest,
    UnknownFunction,
    /// The wrong number or names of arguments were passed to a callable.
    ArgumentMismatch,
    RecursionLimitExceeded,

    /// The render context could not be parsed or converted.
    BadContext,
    /// An option was given an invalid value.
    BadOption,
}

/// The broad category of an [`ErrorKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Parse,
    Load,
    Render,
    Input,
}

/// A structured view of an [`Error`], suitable for reporting to a caller
/// that does not want to parse the formatted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: ErrorKind,
    pub message: String,
    /// The template name, `<string>` for inline templates.
    pub name: String,
    /// The 1-based line of the error, if the error has a location.
    pub line: Option<usize>,
    /// The 1-based column of the error, if the error has a location.
    pub column: Option<usize>,
    /// The annotated source excerpt.
    pub snippet: Option<String>,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            msg: msg.into(),
            name: None,
            span: None,
        }
    }

    pub(crate) fn span(
        kind: ErrorKind,
        msg: impl Into<String>,
        source: &str,
        span: impl Into<Span>,
    ) -> Self {
        Self {
            kind,
            msg: msg.into(),
            name: None,
            span: Some((source.to_owned(), span.into())),
        }
    }

    pub(crate) fn syntax(msg: impl Into<String>, source: &str, span: impl Into<Span>) -> Self {
        Self::span(ErrorKind::SyntaxError, msg, source, span)
    }

    pub(crate) fn template_not_found(name: &str) -> Self {
        Self::new(
            ErrorKind::TemplateNotFound,
            format!("template {name:?} does not exist"),
        )
    }

    /// Attaches the template name if the error does not have one yet.
    pub(crate) fn with_template_name(mut self, name: Option<&str>) -> Self {
        if self.name.is_none() {
            self.name = name.map(str::to_owned);
        }
        self
    }

    /// Attaches a source location if the error does not have one yet.
    pub(crate) fn enrich(mut self, name: Option<&str>, source: &str, span: Span) -> Self {
        if self.span.is_none() {
            self.span = Some((source.to_owned(), span));
            self.name = name.map(str::to_owned);
        }
        self
    }

    /// Returns the kind of error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error message without any location information.
    pub fn message(&self) -> &str {
        &self.msg
    }

    /// Returns the name of the template the error occurred in.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns the 1-based line number of the error, if known.
    pub fn line(&self) -> Option<usize> {
        self.location().map(|loc| loc.line + 1)
    }

    /// Returns a structured description of this error.
    pub fn diagnostic(&self) -> Diagnostic {
        let location = self.location();
        Diagnostic {
            kind: self.kind,
            message: self.msg.clone(),
            name: self.display_name().to_owned(),
            line: location.as_ref().map(|loc| loc.line + 1),
            column: location.as_ref().map(|loc| loc.column + 1),
            snippet: location.map(|loc| loc.snippet(&self.msg)),
        }
    }

    fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<string>")
    }

    fn location(&self) -> Option<Location<'_>> {
        self.span
            .as_ref()
            .map(|(source, span)| Location::new(source, *span))
    }
}

impl ErrorKind {
    /// Returns the category this kind belongs to.
    pub fn category(&self) -> Category {
        match self {
            Self::SyntaxError | Self::UnclosedDelimiter | Self::UnknownTag => Category::Parse,
            Self::TemplateNotFound
            | Self::InvalidTemplatePath
            | Self::CyclicInheritance
            | Self::Io => Category::Load,
            Self::UndefinedError
            | Self::InvalidOperation
            | Self::UnknownFilter
            | Self::UnknownTest
            | Self::UnknownFunction
            | Self::ArgumentMismatch
            | Self::RecursionLimitExceeded => Category::Render,
            Self::BadContext | Self::BadOption => Category::Input,
        }
    }

    fn human(&self) -> &'static str {
        match self {
            Self::SyntaxError => "SyntaxError",
            Self::UnclosedDelimiter => "UnclosedDelimiter",
            Self::UnknownTag => "UnknownTag",
            Self::TemplateNotFound => "TemplateNotFound",
            Self::InvalidTemplatePath => "InvalidTemplatePath",
            Self::CyclicInheritance => "CyclicInheritance",
            Self::Io => "Io",
            Self::UndefinedError => "UndefinedError",
            Self::InvalidOperation => "InvalidOperation",
            Self::UnknownFilter => "UnknownFilter",
            Self::UnknownTest => "UnknownTest",
            Self::UnknownFunction => "UnknownFunction",
            Self::ArgumentMismatch => "ArgumentMismatch",
            Self::RecursionLimitExceeded => "RecursionLimitExceeded",
            Self::BadContext => "BadContext",
            Self::BadOption => "BadOption",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.human())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Self::new(ErrorKind::InvalidOperation, msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Self::new(ErrorKind::InvalidOperation, msg)
    }
}

impl From<fmt::Error> for Error {
    fn from(err: fmt::Error) -> Self {
        Self::new(ErrorKind::Io, err.to_string())
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::new(ErrorKind::Io, err.to_string())
    }
}

impl serde::ser::Error for Error {
    fn custom<T>(msg: T) -> Self
    where
        T: fmt::Display,
    {
        Self::new(ErrorKind::BadContext, msg.to_string())
    }
}

impl serde::de::Error for Error {
    fn custom<T>(msg: T) -> Self
    where
        T: fmt::Display,
    {
        Self::new(ErrorKind::BadContext, msg.to_string())
    }
}

impl std::error::Error for Error {}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_pretty(f)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            return self.fmt_pretty(f);
        }
        write!(f, "{}: {}", self.kind, self.msg)?;
        if let Some(loc) = self.location() {
            write!(
                f,
                " (in {}:{}:{})",
                self.display_name(),
                loc.line + 1,
                loc.column + 1
            )?;
        }
        Ok(())
    }
}

impl Error {
    fn fmt_pretty(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}: {}", self.kind, self.msg)?;
        let loc = match self.location() {
            Some(loc) => loc,
            None => return Ok(()),
        };
        let pad = (loc.line + 1).to_string().len();
        writeln!(
            f,
            "{0:pad$} --> {name}:{line}:{column}",
            "",
            pad = pad,
            name = self.display_name(),
            line = loc.line + 1,
            column = loc.column + 1,
        )?;
        f.write_str(&loc.snippet(&self.msg))
    }
}

/// A resolved position of a span in the template source.
struct Location<'a> {
    /// 0-based line index.
    line: usize,
    /// 0-based column in characters.
    column: usize,
    /// The text of the line containing the start of the span.
    code: &'a str,
    /// Display width of the code before the span.
    offset: usize,
    /// Display width of the span, clipped to the line.
    width: usize,
}

impl<'a> Location<'a> {
    fn new(source: &'a str, span: Span) -> Self {
        let m = span.m.min(source.len());
        let mut start = source[..m].rfind('\n').map(|i| i + 1).unwrap_or(0);
        let mut line = source[..start].matches('\n').count();

        // A span at the very end of a source that ends with a newline points
        // at the last line rather than the empty one after it.
        if start == source.len() && start > 0 {
            start = source[..start - 1].rfind('\n').map(|i| i + 1).unwrap_or(0);
            line = line.saturating_sub(1);
        }

        let end = source[start..]
            .find('\n')
            .map(|i| start + i)
            .unwrap_or(source.len());
        let code = source[start..end].trim_end_matches('\r');
        let m = m.clamp(start, end);
        let prefix = &source[start..m];
        let underline = &source[m..span.n.clamp(m, end)];
        Self {
            line,
            column: prefix.chars().count(),
            code,
            offset: width(prefix),
            width: max(1, width(underline)),
        }
    }

    fn snippet(&self, msg: &str) -> String {
        let num = (self.line + 1).to_string();
        let pad = num.len();
        let underline = "^".repeat(self.width);
        format!(
            " {0:pad$} |\n \
             {num} | {code}\n \
             {0:pad$} | {0:offset$}{underline} {msg}\n",
            "",
            pad = pad,
            num = num,
            code = self.code,
            offset = self.offset,
            underline = underline,
            msg = msg,
        )
    }
}

#[cfg(feature = "unicode")]
fn width(s: &str) -> usize {
    s.width()
}

#[cfg(not(feature = "unicode"))]
fn width(s: &str) -> usize {
    s.chars().count()
}
