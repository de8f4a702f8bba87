//! A compiled template, shared between the engine cache and renders.

use std::collections::BTreeMap;

use crate::types::ast;

/// A parsed template together with its source.
///
/// Spans in the AST index into `source`, so the two always travel together.
#[derive(Debug)]
pub struct Template {
    /// The name of the template, `None` for templates compiled from an
    /// inline string.
    pub name: Option<String>,
    pub source: String,
    pub scope: ast::Scope,
    /// The template named in an `{% extends %}` tag.
    pub parent: Option<ast::Str>,
    pub blocks: BTreeMap<String, ast::Block>,
    pub macros: BTreeMap<String, ast::Macro>,
    /// Every template name referenced by an `{% include %}` tag.
    pub includes: Vec<String>,
}

impl Template {
    pub fn new(name: Option<String>, source: String, ast: ast::Template) -> Self {
        let ast::Template {
            scope,
            parent,
            blocks,
            macros,
            includes,
        } = ast;
        Self {
            name,
            source,
            scope,
            parent,
            blocks,
            macros,
            includes,
        }
    }

    /// The name used when reporting errors.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<string>")
    }
}
