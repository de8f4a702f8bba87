//! Compile a template source into a [`Template`] that can be rendered.
//!
//! This process has two stages:
//! - The lexer chunks the template source into tokens.
//! - The parser constructs an AST from the token stream, collecting named
//!   blocks, macros and the names of parent and included templates.

mod lex;
pub mod loader;
mod parse;
mod search;

use crate::types::template::Template;
use crate::Result;

/// Compile a template.
///
/// Errors are tagged with the template name so that diagnostics can point at
/// the right file.
pub fn template(name: Option<String>, source: String) -> Result<Template> {
    let ast = parse::Parser::new(&source)
        .parse_template()
        .map_err(|err| err.with_template_name(name.as_deref()))?;
    tracing::trace!(
        name = name.as_deref().unwrap_or("<string>"),
        blocks = ast.blocks.len(),
        macros = ast.macros.len(),
        "compiled template"
    );
    Ok(Template::new(name, source, ast))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn template_collects_references() {
        let t = template(
            Some("page.html".into()),
            r#"{% extends "base.html" %}{% block body %}{% include "nav.html" %}{% endblock %}"#
                .into(),
        )
        .unwrap();
        assert_eq!(t.parent.as_ref().unwrap().value, "base.html");
        assert_eq!(t.includes, ["nav.html"]);
        assert!(t.blocks.contains_key("body"));
    }

    #[test]
    fn template_error_has_name() {
        let err = template(Some("page.html".into()), "{{ }}".into()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SyntaxError);
        assert_eq!(err.name(), Some("page.html"));
        assert_eq!(
            err.to_string(),
            "SyntaxError: expected expression, found end expression (in page.html:1:4)"
        );
    }
}
