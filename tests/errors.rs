use trellis::{value, Category, Diagnostic, Engine, ErrorKind};

#[test]
fn error_diagnostic_render() {
    let mut engine = Engine::new();
    engine
        .add_template("page.html", "<p>\n  {{ user.name | frobnicate }}\n</p>")
        .unwrap();
    let err = engine
        .render("page.html", value! { user: { name: "x" } })
        .unwrap_err();

    assert_eq!(
        err.diagnostic(),
        Diagnostic {
            kind: ErrorKind::UnknownFilter,
            message: "unknown filter `frobnicate`".into(),
            name: "page.html".into(),
            line: Some(2),
            column: Some(18),
            snippet: Some(
                "   |\n 2 |   {{ user.name | frobnicate }}\n   |                  ^^^^^^^^^^ unknown filter `frobnicate`\n"
                    .into()
            ),
        }
    );
    assert_eq!(err.kind().category(), Category::Render);
}

#[test]
fn error_diagnostic_without_location() {
    let err = Engine::new().get_template("nope").unwrap_err();
    let diag = err.diagnostic();
    assert_eq!(diag.kind, ErrorKind::TemplateNotFound);
    assert_eq!(diag.name, "<string>");
    assert_eq!(diag.line, None);
    assert_eq!(diag.column, None);
    assert_eq!(diag.snippet, None);
}

#[test]
fn error_display_pretty_in_named_template() {
    let mut engine = Engine::new();
    engine
        .add_template("list.html", "{% for x in xs %}\n{{ x.name }}\n{% endfor %}")
        .unwrap();
    let err = engine
        .render("list.html", value! { xs: [{}] })
        .unwrap_err();
    assert_eq!(
        format!("{err:#}"),
        "UndefinedError: undefined variable `x.name`
  --> list.html:2:4
   |
 2 | {{ x.name }}
   |    ^^^^^^ undefined variable `x.name`
"
    );
    assert_eq!(format!("{err:#}"), format!("{err:?}"));
    assert_eq!(
        err.to_string(),
        "UndefinedError: undefined variable `x.name` (in list.html:2:4)"
    );
}

#[test]
fn error_in_included_template_names_it() {
    let mut engine = Engine::new();
    engine.add_template("part", "\n\n{{ 1 + 'a' }}").unwrap();
    engine.add_template("page", r#"{% include "part" %}"#).unwrap();
    let err = engine.render("page", value! {}).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOperation);
    assert_eq!(err.name(), Some("part"));
    assert_eq!(err.line(), Some(3));
}

#[test]
fn error_in_parent_template_names_it() {
    let mut engine = Engine::new();
    engine
        .add_template("base", "{% block a %}{% endblock %}{{ missing }}")
        .unwrap();
    engine
        .add_template("child", r#"{% extends "base" %}{% block a %}ok{% endblock %}"#)
        .unwrap();
    let err = engine.render("child", value! {}).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UndefinedError);
    assert_eq!(err.name(), Some("base"));
}

#[test]
fn error_is_std_error() {
    fn check(_: &dyn std::error::Error) {}
    let err = Engine::new().compile("{{").unwrap_err();
    check(&err);
}

#[test]
fn error_categories() {
    let cases = [
        (ErrorKind::SyntaxError, Category::Parse),
        (ErrorKind::UnclosedDelimiter, Category::Parse),
        (ErrorKind::UnknownTag, Category::Parse),
        (ErrorKind::TemplateNotFound, Category::Load),
        (ErrorKind::InvalidTemplatePath, Category::Load),
        (ErrorKind::CyclicInheritance, Category::Load),
        (ErrorKind::UndefinedError, Category::Render),
        (ErrorKind::ArgumentMismatch, Category::Render),
        (ErrorKind::RecursionLimitExceeded, Category::Render),
        (ErrorKind::BadContext, Category::Input),
        (ErrorKind::BadOption, Category::Input),
    ];
    for (kind, category) in cases {
        assert_eq!(kind.category(), category, "{kind}");
    }
}
