//! A Jinja flavoured template engine that renders templates against JSON
//! data.
//!
//! # Features
//!
//! ### Syntax
//!
//! - Expressions: `{{ user.name | upper }}`, `{{ price * 1.2 }}`
//! - Conditionals: `{% if user.enabled %} ... {% elif x %} ... {% endif %}`
//! - Loops: `{% for key, value in map %} ... {% else %} ... {% endfor %}`
//! - Variables: `{% set x = 1 %}`, `{% with %}`
//! - Inheritance: `{% extends "base.html" %}`, `{% block %}`, `super()`
//! - Nested templates: `{% include "nav.html" ignore missing %}`
//! - Macros with default arguments and `{% call %}` blocks
//! - Comments, raw blocks and `{%-` `-%}` whitespace control
//!
//! ### Engine
//!
//! - HTML auto escaping, configurable per template extension
//! - Configurable handling of undefined values, see [`UndefinedBehavior`]
//! - Templates loaded from a directory and cached until they change
//! - Render using any [`serde`] serializable values or a JSON string
//! - Errors that point at the offending source, see [`Error`]
//!
//! # Getting started
//!
//! For a one off render use [`render_json`] or [`render_str`].
//!
//! ```
//! let options = trellis::Options::new().undefined_behavior(trellis::UndefinedBehavior::Lenient);
//! let result = trellis::render_json("Hello {{ name }}{{ missing }}!", Some(r#"{"name": "World"}"#), &options)?;
//! assert_eq!(result, "Hello World!");
//! # Ok::<(), trellis::Error>(())
//! ```
//!
//! Otherwise, your entry point is the [`Engine`] struct. The engine stores
//! the options, filters, tests, functions and compiled templates. Generally,
//! you only need to construct one engine during the lifetime of a program.
//!
//! ```
//! let engine = trellis::Engine::new();
//! ```
//!
//! Next, [`.add_template`][Engine::add_template] is used to compile and
//! store a template in the engine.
//!
//! ```
//! # let mut engine = trellis::Engine::new();
//! engine.add_template("hello", "Hello {{ user.name }}!")?;
//! # Ok::<(), trellis::Error>(())
//! ```
//!
//! Finally, the template is rendered by fetching it using
//! [`.get_template`][Engine::get_template] and calling
//! [`.render`][Template::render].
//!
//! ```
//! # let mut engine = trellis::Engine::new();
//! # engine.add_template("hello", "Hello {{ user.name }}!")?;
//! let template = engine.get_template("hello")?;
//! let result = template.render(trellis::value!{ user: { name: "John Smith" }})?;
//! assert_eq!(result, "Hello John Smith!");
//! # Ok::<(), trellis::Error>(())
//! ```
//!
//! If you don't need to store the compiled template then you can also use
//! the [`.compile`][Engine::compile] function to return the template
//! directly.
//!
//! ```
//! # let engine = trellis::Engine::new();
//! let template = engine.compile("Hello {{ user.name }}!")?;
//! let result = template.render(trellis::value!{ user: { name: "John Smith" }})?;
//! assert_eq!(result, "Hello John Smith!");
//! # Ok::<(), trellis::Error>(())
//! ```
//!
//! # Examples
//!
//! ### Render using structured data
//!
//! ```
//! #[derive(serde::Serialize)]
//! struct Context { user: User }
//!
//! #[derive(serde::Serialize)]
//! struct User { name: String }
//!
//! let ctx = Context { user: User { name: "John Smith".into() } };
//!
//! let result = trellis::Engine::new()
//!     .compile("Hello {{ user.name }}")?
//!     .render(&ctx)?;
//!
//! assert_eq!(result, "Hello John Smith");
//! # Ok::<(), trellis::Error>(())
//! ```
//!
//! ### Transform data using filters
//!
//! Data can be transformed using the built-in filters or your own.
//!
//! ```
//! let mut engine = trellis::Engine::new();
//! engine.add_filter("shout", |s: String| format!("{}!", s.to_uppercase()));
//!
//! let result = engine
//!     .compile("Hello {{ value | shout }}")?
//!     .render(trellis::value! { value: "world" })?;
//!
//! assert_eq!(result, "Hello WORLD!");
//! # Ok::<(), trellis::Error>(())
//! ```
//!
//! See the [`Filter`] trait documentation for more information on filters.
//!
//! ### Template inheritance
//!
//! ```
//! let mut engine = trellis::Engine::new();
//! engine.add_template("base.html", "<title>{% block title %}Site{% endblock %}</title>")?;
//! engine.add_template(
//!     "page.html",
//!     r#"{% extends "base.html" %}{% block title %}Page | {{ super() }}{% endblock %}"#,
//! )?;
//!
//! let result = engine.render("page.html", trellis::value! {})?;
//! assert_eq!(result, "<title>Page | Site</title>");
//! # Ok::<(), trellis::Error>(())
//! ```
//!
//! ### Render a template to an `impl io::Write`
//!
//! ```
//! use std::io;
//!
//! let stdout = io::BufWriter::new(io::stdout());
//!
//! trellis::Engine::new()
//!     .compile("Hello {{ user.name }}")?
//!     .render_to_writer(stdout, trellis::value! { user: { name: "John Smith" }})?;
//! #
//! # Ok::<(), trellis::Error>(())
//! ```

#[macro_use]
mod macros;

mod compile;
mod error;
mod filters;
mod options;
mod render;
mod types;
mod value;

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::SystemTime;

use dashmap::DashMap;

pub use crate::compile::loader::{FileLoader, Loader};
pub use crate::error::{Category, Diagnostic, Error, ErrorKind, Result};
pub use crate::filters::Filter;
pub use crate::options::{render_json, render_str, Options};
pub use crate::render::UndefinedBehavior;
pub use crate::types::escape::AutoEscape;
pub use crate::value::{to_value, List, Map, Value};

use crate::filters::{FilterArgs, FilterFn, FilterReturn, FunctionFn};
use crate::types::template;

/// The default maximum depth of nested macro calls, includes and blocks.
const DEFAULT_MAX_RECURSION: usize = 64;

/// The compilation and rendering engine.
pub struct Engine {
    templates: BTreeMap<String, Arc<template::Template>>,
    loader: Option<Box<dyn Loader>>,
    cache: DashMap<String, Cached>,
    pub(crate) filters: BTreeMap<String, Box<FilterFn>>,
    pub(crate) tests: BTreeMap<String, Box<FilterFn>>,
    pub(crate) functions: BTreeMap<String, Box<FunctionFn>>,
    pub(crate) undefined: UndefinedBehavior,
    pub(crate) auto_escape: AutoEscape,
    pub(crate) max_recursion: usize,
}

/// A template compiled from a loader and the version it was compiled at.
struct Cached {
    version: Option<SystemTime>,
    template: Arc<template::Template>,
}

/// A compiled template.
#[derive(Clone)]
pub struct Template<'engine> {
    engine: &'engine Engine,
    template: Arc<template::Template>,
}

/// A reference to a compiled template in an [`Engine`].
pub type TemplateRef<'engine> = Template<'engine>;

impl Default for Engine {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// Construct a new engine with the built-in filters, tests and functions.
    #[inline]
    pub fn new() -> Self {
        Self {
            templates: BTreeMap::new(),
            loader: None,
            cache: DashMap::new(),
            filters: filters::builtin_filters(),
            tests: filters::builtin_tests(),
            functions: filters::builtin_functions(),
            undefined: UndefinedBehavior::default(),
            auto_escape: AutoEscape::default(),
            max_recursion: DEFAULT_MAX_RECURSION,
        }
    }

    /// Construct a new engine configured by the given options.
    ///
    /// # Examples
    ///
    /// ```
    /// use trellis::{Engine, Options, UndefinedBehavior};
    ///
    /// let options = Options::new()
    ///     .autoescape_on([".html", ".xml"])
    ///     .undefined_behavior(UndefinedBehavior::Chainable);
    /// let engine = Engine::with_options(&options);
    /// ```
    pub fn with_options(options: &Options) -> Self {
        let mut engine = Self::new();
        engine.auto_escape = options.auto_escape();
        engine.undefined = options.undefined_behavior;
        if let Some(depth) = options.max_recursion {
            engine.max_recursion = depth;
        }
        if let Some(path) = &options.template_path {
            engine.set_loader(FileLoader::new(path));
        }
        engine
    }

    /// Set the loader used for templates not added with
    /// [`.add_template(..)`][Engine::add_template].
    ///
    /// Any templates cached from a previous loader are dropped.
    pub fn set_loader<L>(&mut self, loader: L)
    where
        L: Loader + 'static,
    {
        self.loader = Some(Box::new(loader));
        self.cache.clear();
    }

    /// Set how undefined values are treated.
    #[inline]
    pub fn set_undefined_behavior(&mut self, behavior: UndefinedBehavior) {
        self.undefined = behavior;
    }

    /// Set the rules deciding which templates are HTML escaped.
    #[inline]
    pub fn set_auto_escape(&mut self, auto_escape: AutoEscape) {
        self.auto_escape = auto_escape;
    }

    /// Set the maximum depth of nested macro calls, includes and blocks.
    #[inline]
    pub fn set_max_recursion(&mut self, depth: usize) {
        self.max_recursion = depth;
    }

    /// Add a new filter to the engine.
    ///
    /// **Note:** the `default`, `safe` and `escape` filters are handled by
    /// the renderer and cannot be overridden.
    #[inline]
    pub fn add_filter<F, R, A>(&mut self, name: impl Into<String>, f: F)
    where
        F: Filter<R, A> + Send + Sync + 'static,
        R: FilterReturn,
        A: FilterArgs,
    {
        self.filters.insert(name.into(), filters::new(f));
    }

    /// Add a new test to the engine.
    ///
    /// Tests are filters whose result is used as a condition.
    ///
    /// ```
    /// let mut engine = trellis::Engine::new();
    /// engine.add_test("short", |s: String| s.len() < 4);
    /// let result = engine
    ///     .compile("{{ 'abc' is short }} {{ 'abcd' is not short }}")?
    ///     .render(trellis::value! {})?;
    /// assert_eq!(result, "true true");
    /// # Ok::<(), trellis::Error>(())
    /// ```
    #[inline]
    pub fn add_test<F, R, A>(&mut self, name: impl Into<String>, f: F)
    where
        F: Filter<R, A> + Send + Sync + 'static,
        R: FilterReturn,
        A: FilterArgs,
    {
        self.tests.insert(name.into(), filters::new(f));
    }

    /// Add a new function to the engine, called with positional arguments.
    #[inline]
    pub fn add_function<F, R>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&[Value]) -> R + Send + Sync + 'static,
        R: FilterReturn,
    {
        self.functions.insert(name.into(), filters::function(f));
    }

    /// Add a template to the engine.
    ///
    /// The template will be compiled and stored under the given name. Added
    /// templates take precedence over templates from the loader.
    pub fn add_template(
        &mut self,
        name: impl Into<String>,
        source: impl Into<String>,
    ) -> Result<()> {
        let name = name.into();
        let template = compile::template(Some(name.clone()), source.into())?;
        self.templates.insert(name, Arc::new(template));
        Ok(())
    }

    /// Lookup a template by name, loading it if necessary.
    pub fn get_template(&self, name: &str) -> Result<Template<'_>> {
        let template = self.load(name)?;
        Ok(Template {
            engine: self,
            template,
        })
    }

    /// Compile a template.
    ///
    /// The template will not be stored in the engine. It has no name, so it
    /// is reported as `<string>` in errors.
    pub fn compile(&self, source: impl Into<String>) -> Result<Template<'_>> {
        let template = compile::template(None, source.into())?;
        Ok(Template {
            engine: self,
            template: Arc::new(template),
        })
    }

    /// Render the named template.
    pub fn render<S>(&self, name: &str, ctx: S) -> Result<String>
    where
        S: serde::Serialize,
    {
        self.get_template(name)?.render(ctx)
    }

    /// Returns a template by name, compiling it from the loader if it is not
    /// cached or it has changed since it was cached.
    pub(crate) fn load(&self, name: &str) -> Result<Arc<template::Template>> {
        if let Some(template) = self.templates.get(name) {
            return Ok(template.clone());
        }
        let loader = match &self.loader {
            Some(loader) => loader,
            None => return Err(Error::template_not_found(name)),
        };

        let version = loader.version(name)?;
        if let Some(cached) = self.cache.get(name) {
            if version.is_some() && cached.version == version {
                tracing::trace!(name, "template cache hit");
                return Ok(cached.template.clone());
            }
        }

        let source = loader
            .load(name)?
            .ok_or_else(|| Error::template_not_found(name))?;
        let template = Arc::new(compile::template(Some(name.to_owned()), source)?);
        self.cache.insert(
            name.to_owned(),
            Cached {
                version,
                template: template.clone(),
            },
        );
        tracing::debug!(name, "compiled template from loader");
        Ok(template)
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("templates", &self.templates.keys())
            .field("loader", &self.loader.is_some())
            .field("filters", &self.filters.keys())
            .field("tests", &self.tests.keys())
            .field("functions", &self.functions.keys())
            .field("undefined", &self.undefined)
            .field("auto_escape", &self.auto_escape)
            .field("max_recursion", &self.max_recursion)
            .finish()
    }
}

impl<'engine> Template<'engine> {
    /// Render the template to a string using the provided value.
    #[inline]
    pub fn render<S>(&self, ctx: S) -> Result<String>
    where
        S: serde::Serialize,
    {
        self.render_value(&to_value(ctx)?)
    }

    /// Render the template to a string using a [`Value`] as the context.
    #[inline]
    pub fn render_value(&self, ctx: &Value) -> Result<String> {
        render::template(self.engine, &self.template, ctx)
    }

    /// Render the template to a writer using the provided value.
    ///
    /// Nothing is written if rendering fails.
    pub fn render_to_writer<W, S>(&self, mut writer: W, ctx: S) -> Result<()>
    where
        W: io::Write,
        S: serde::Serialize,
    {
        let s = self.render(ctx)?;
        writer.write_all(s.as_bytes())?;
        writer.flush()?;
        Ok(())
    }

    /// Returns the template name, `None` if it was compiled from a string.
    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.template.name.as_deref()
    }

    /// Returns the original template source.
    #[inline]
    pub fn source(&self) -> &str {
        &self.template.source
    }
}

impl fmt::Debug for Template<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("name", &self.template.display_name())
            .finish_non_exhaustive()
    }
}
