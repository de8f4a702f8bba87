use trellis::{Category, Engine, ErrorKind};

#[track_caller]
fn compile_err(source: &str) -> trellis::Error {
    Engine::new().compile(source).unwrap_err()
}

#[test]
fn compile_empty() {
    let engine = Engine::new();
    let template = engine.compile("").unwrap();
    assert_eq!(template.source(), "");
    assert_eq!(template.name(), None);
}

#[test]
fn compile_statements() {
    Engine::new()
        .compile(
            r#"
{%- macro row(cells, sep=", ") -%}{{ cells | join(sep) }}{{ caller() }}{%- endmacro -%}
{% set title = page.title | default("Home") %}
{% set body %}{{ title }}{% endset %}
{% with a = 1, b = [1, 2] %}{{ a }}{% endwith %}
{% for k, v in items %}{% else %}{% endfor %}
{% if a is not defined %}{% elif b %}{% else if c %}{% else %}{% endif %}
{% call(x) row([1, 2]) %}{{ x }}{% endcall %}
{% include "nav.html" ignore missing %}
{% block content %}{% endblock content %}
{# comment #}{% raw %}{{ }}{% endraw %}
"#,
        )
        .unwrap();
}

#[test]
fn compile_err_unknown_tag() {
    let err = compile_err("lorem {% frobnicate %}");
    assert_eq!(err.kind(), ErrorKind::UnknownTag);
    assert_eq!(err.kind().category(), Category::Parse);
    assert_eq!(
        format!("{err:#}"),
        "UnknownTag: unknown statement `frobnicate`
  --> <string>:1:10
   |
 1 | lorem {% frobnicate %}
   |          ^^^^^^^^^^ unknown statement `frobnicate`
"
    );
}

#[test]
fn compile_err_unclosed_expression() {
    let err = compile_err("lorem {{ ipsum");
    assert_eq!(err.kind(), ErrorKind::UnclosedDelimiter);
    assert_eq!(err.message(), "unclosed `{{`, expected end expression");
}

#[test]
fn compile_err_unclosed_comment() {
    let err = compile_err("lorem {# ipsum");
    assert_eq!(err.kind(), ErrorKind::UnclosedDelimiter);
    assert_eq!(err.message(), "unclosed `{#`, expected end comment");
}

#[test]
fn compile_err_unclosed_block() {
    let err = compile_err("{% if x %}\n{% for y in x %}{{ y }}{% endfor %}\n");
    assert_eq!(err.kind(), ErrorKind::UnclosedDelimiter);
    assert_eq!(err.message(), "unclosed `if` block");
    assert_eq!(err.line(), Some(1));
}

#[test]
fn compile_err_unclosed_raw() {
    let err = compile_err("{% raw %}{{ x }}");
    assert_eq!(err.kind(), ErrorKind::UnclosedDelimiter);
}

#[test]
fn compile_err_stray_end_tag() {
    let err = compile_err("{% endfor %}");
    assert_eq!(err.kind(), ErrorKind::SyntaxError);
    assert_eq!(err.message(), "unexpected `endfor` block");
}

#[test]
fn compile_err_mismatched_end_tag() {
    let err = compile_err("{% if x %}{% endfor %}");
    assert_eq!(err.kind(), ErrorKind::SyntaxError);
    assert_eq!(err.message(), "unexpected `endfor` block");
}

#[test]
fn compile_err_unexpected_token() {
    let err = compile_err("{{ 1 + }}");
    assert_eq!(err.kind(), ErrorKind::SyntaxError);
    assert_eq!(err.message(), "expected expression, found end expression");
}

#[test]
fn compile_err_reserved_word() {
    let err = compile_err("{{ in }}");
    assert_eq!(err.kind(), ErrorKind::SyntaxError);
    assert_eq!(err.message(), "unexpected keyword `in`");
}

#[test]
fn compile_err_bad_string_literal() {
    let err = compile_err(r#"{{ "lorem }}"#);
    assert_eq!(err.kind(), ErrorKind::UnclosedDelimiter);
    assert_eq!(err.message(), "undelimited string");
}

#[test]
fn compile_err_duplicate_block() {
    let err = compile_err("{% block a %}{% endblock %}{% block a %}{% endblock %}");
    assert_eq!(err.kind(), ErrorKind::SyntaxError);
    assert_eq!(err.message(), "block `a` defined twice");
}

#[test]
fn compile_err_location_multiline() {
    let err = compile_err("line one\nline two {{ x + }}\nline three");
    assert_eq!(err.line(), Some(2));
    let diag = err.diagnostic();
    assert_eq!(diag.name, "<string>");
    assert_eq!(diag.line, Some(2));
    assert_eq!(diag.column, Some(17));
}

#[test]
fn compile_err_named_template() {
    let mut engine = Engine::new();
    let err = engine
        .add_template("page.html", "lorem {{ ipsum")
        .unwrap_err();
    assert_eq!(err.name(), Some("page.html"));
    assert_eq!(
        err.to_string(),
        "UnclosedDelimiter: unclosed `{{`, expected end expression (in page.html:1:7)"
    );
}

#[test]
fn compile_err_deeply_nested_parens() {
    let source = format!("{{{{ {}1{} }}}}", "(".repeat(120), ")".repeat(120));
    let err = compile_err(&source);
    assert_eq!(err.kind(), ErrorKind::SyntaxError);
    assert_eq!(err.message(), "expression is nested too deeply");
}

#[test]
fn compile_err_long_operator_chain() {
    let source = format!("{{{{ 1{} }}}}", " + 1".repeat(200_000));
    let err = compile_err(&source);
    assert_eq!(err.kind(), ErrorKind::SyntaxError);
    assert_eq!(err.message(), "expression is nested too deeply");
}

#[test]
fn compile_err_deeply_nested_statements() {
    let source = format!(
        "{}x{}",
        "{% if true %}".repeat(50_000),
        "{% endif %}".repeat(50_000)
    );
    let err = compile_err(&source);
    assert_eq!(err.kind(), ErrorKind::SyntaxError);
    assert_eq!(err.message(), "statements are nested too deeply");
}

#[test]
fn compile_and_render_nesting_at_limit() {
    let engine = Engine::new();
    let source = format!(
        "{}{{{{ {}1{}{} }}}}{}",
        "{% for i in [1] %}{% if true %}".repeat(30),
        "(".repeat(60),
        ")".repeat(60),
        " + 1".repeat(60),
        "{% endif %}{% endfor %}".repeat(30),
    );
    let result = engine.compile(&source).unwrap().render(trellis::value! {}).unwrap();
    assert_eq!(result, "61");
}
