use std::fs;

use trellis::{render_json, render_str, value, ErrorKind, Options, UndefinedBehavior};

#[test]
fn render_json_loop() {
    let result = render_json(
        "{% for item in items %}{{ item.name }}{% if not loop.last %}, {% endif %}{% endfor %}",
        Some(r#"{"items": [{"name": "Apple"}, {"name": "Banana"}, {"name": "Cherry"}]}"#),
        &Options::new(),
    )
    .unwrap();
    assert_eq!(result, "Apple, Banana, Cherry");
}

#[test]
fn render_json_escaping() {
    let ctx = Some(r#"{"v": "B&O"}"#);
    assert_eq!(
        render_json("{{ v }}", ctx, &Options::new()).unwrap(),
        "B&amp;O"
    );
    assert_eq!(
        render_json("{{ v }}", ctx, &Options::new().autoescape(false)).unwrap(),
        "B&O"
    );
}

#[test]
fn render_json_tojson_not_escaped_twice() {
    let result = render_json(
        "{{ d | tojson }} {{ d.a }}",
        Some(r#"{"d": {"a": "x&y"}}"#),
        &Options::new(),
    )
    .unwrap();
    assert_eq!(result, r#"{"a":"x\u0026y"} x&amp;y"#);
}

#[test]
fn render_json_undefined_behavior() {
    let err = render_json("{{ missing }}", None, &Options::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UndefinedError);
    assert!(err.message().contains("missing"));

    let options = Options::new().undefined_behavior(UndefinedBehavior::Lenient);
    assert_eq!(render_json("{{ missing }}", None, &options).unwrap(), "");
}

#[test]
fn render_json_numbers_keep_their_type() {
    let result = render_json(
        "{{ i }} {{ f }} {{ i / 2 }} {{ big }}",
        Some(r#"{"i": 3, "f": 1.0, "big": 9007199254740993}"#),
        &Options::new(),
    )
    .unwrap();
    assert_eq!(result, "3 1.0 1.5 9007199254740993");
}

#[test]
fn render_json_preserves_key_order() {
    let result = render_json(
        "{% for k, v in m %}{{ k }}{% endfor %}",
        Some(r#"{"m": {"z": 1, "a": 2, "m": 3}}"#),
        &Options::new(),
    )
    .unwrap();
    assert_eq!(result, "zam");
}

#[test]
fn render_json_err_bad_context() {
    let err = render_json("", Some("[1, 2]"), &Options::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadContext);
    assert_eq!(err.message(), "context must be a map, found list");

    let err = render_json("", Some("{\"a\": }"), &Options::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadContext);
    assert!(err.message().starts_with("invalid JSON: "), "{err}");
}

#[test]
fn render_json_parse_error_before_context() {
    let err = render_json("{% if %}", Some("{}"), &Options::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SyntaxError);
}

#[test]
fn render_json_template_path() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("base.html"), "[{% block b %}{% endblock %}]").unwrap();
    fs::write(
        dir.path().join("page.html"),
        r#"{% extends "base.html" %}{% block b %}{{ v }}{% endblock %}"#,
    )
    .unwrap();

    let options = Options::new().template_path(dir.path());
    let result = render_json("page.html", Some(r#"{"v": "<"}"#), &options).unwrap();
    assert_eq!(result, "[&lt;]");

    let err = render_json("nope.html", None, &options).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TemplateNotFound);
    assert!(err.message().contains("nope.html"));
}

#[test]
fn render_json_autoescape_on_extensions() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.html"), "{{ v }}").unwrap();
    fs::write(dir.path().join("a.txt"), "{{ v }}").unwrap();
    let ctx = Some(r#"{"v": "<"}"#);

    let options = Options::new()
        .template_path(dir.path())
        .autoescape_on([".html"]);
    assert_eq!(render_json("a.html", ctx, &options).unwrap(), "&lt;");
    assert_eq!(render_json("a.txt", ctx, &options).unwrap(), "<");

    let options = options.autoescape(true);
    assert_eq!(render_json("a.txt", ctx, &options).unwrap(), "&lt;");
}

#[test]
fn render_str_serializable() {
    #[derive(serde::Serialize)]
    struct Ctx {
        items: Vec<u32>,
    }

    let result = render_str(
        "{{ items | sum }}",
        Ctx {
            items: vec![1, 2, 3],
        },
        &Options::new(),
    )
    .unwrap();
    assert_eq!(result, "6");

    let result = render_str("{{ x }}", value! { x: "<" }, &Options::new().autoescape(false)).unwrap();
    assert_eq!(result, "<");
}

#[test]
fn options_from_json_full() {
    let options = Options::from_json(
        r#"{
            "autoescape": true,
            "autoescape_on": [".html", ".xml"],
            "template_path": "templates",
            "undefined_behavior": "chainable",
            "max_recursion": 16
        }"#,
    )
    .unwrap();
    assert_eq!(
        options,
        Options::new()
            .autoescape(true)
            .autoescape_on([".html", ".xml"])
            .template_path("templates")
            .undefined_behavior(UndefinedBehavior::Chainable)
            .max_recursion(16)
    );
    assert_eq!(Options::from_json("{}").unwrap(), Options::default());
}

#[test]
fn options_max_recursion() {
    let options = Options::new().max_recursion(2);
    let source = "{% macro m(n) %}{% if n > 0 %}{{ m(n - 1) }}{% endif %}{% endmacro %}{{ m(k) }}";
    assert_eq!(
        render_json(source, Some(r#"{"k": 1}"#), &options).unwrap(),
        ""
    );
    let err = render_json(source, Some(r#"{"k": 2}"#), &options).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RecursionLimitExceeded);
}
