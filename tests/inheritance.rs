use trellis::{value, Engine, ErrorKind};

#[track_caller]
fn engine(templates: &[(&str, &str)]) -> Engine {
    let mut engine = Engine::new();
    for (name, source) in templates {
        engine.add_template(*name, *source).unwrap();
    }
    engine
}

#[test]
fn extends_block_substitution() {
    let engine = engine(&[
        (
            "base",
            "<html>\n<body>{% block content %}Y{% endblock %}</body>\n</html>",
        ),
        ("child", r#"{% extends "base" %}{% block content %}X{% endblock %}"#),
    ]);
    let result = engine.render("child", value! {}).unwrap();
    assert_eq!(result, "<html>\n<body>X</body>\n</html>");
}

#[test]
fn extends_block_not_overridden_keeps_default() {
    let engine = engine(&[
        (
            "base",
            "{% block title %}Site{% endblock %}|{% block content %}Y{% endblock %}",
        ),
        ("child", r#"{% extends "base" %}{% block content %}X{% endblock %}"#),
    ]);
    let result = engine.render("child", value! {}).unwrap();
    assert_eq!(result, "Site|X");
}

#[test]
fn extends_content_outside_blocks_is_ignored() {
    let engine = engine(&[
        ("base", "[{% block a %}{% endblock %}]"),
        (
            "child",
            r#"{% extends "base" %}ignored{% block a %}x{% endblock %}ignored"#,
        ),
    ]);
    let result = engine.render("child", value! {}).unwrap();
    assert_eq!(result, "[x]");
}

#[test]
fn extends_blocks_see_context() {
    let engine = engine(&[
        ("base", "{% block greeting %}Hi{% endblock %} {{ name }}"),
        (
            "child",
            r#"{% extends "base" %}{% block greeting %}Hello {{ name }},{% endblock %}"#,
        ),
    ]);
    let result = engine.render("child", value! { name: "Ana" }).unwrap();
    assert_eq!(result, "Hello Ana, Ana");
}

#[test]
fn extends_super_three_levels() {
    let engine = engine(&[
        ("a", "<{% block x %}a{% endblock %}>"),
        ("b", r#"{% extends "a" %}{% block x %}b{{ super() }}{% endblock %}"#),
        ("c", r#"{% extends "b" %}{% block x %}c{{ super() }}{% endblock %}"#),
    ]);
    assert_eq!(engine.render("c", value! {}).unwrap(), "<cba>");
    assert_eq!(engine.render("b", value! {}).unwrap(), "<ba>");
    assert_eq!(engine.render("a", value! {}).unwrap(), "<a>");
}

#[test]
fn extends_super_skips_levels_without_block() {
    let engine = engine(&[
        ("a", "<{% block x %}a{% endblock %}>"),
        ("b", r#"{% extends "a" %}{% block y %}unused{% endblock %}"#),
        ("c", r#"{% extends "b" %}{% block x %}c{{ super() }}{% endblock %}"#),
    ]);
    assert_eq!(engine.render("c", value! {}).unwrap(), "<ca>");
}

#[test]
fn extends_nested_blocks() {
    let engine = engine(&[
        (
            "base",
            "{% block outer %}({% block inner %}i{% endblock %}){% endblock %}",
        ),
        (
            "child",
            r#"{% extends "base" %}{% block inner %}I{% endblock %}"#,
        ),
    ]);
    assert_eq!(engine.render("child", value! {}).unwrap(), "(I)");
}

#[test]
fn extends_super_is_not_escaped_twice() {
    let engine = engine(&[
        ("base", "{% block x %}<b>{{ v }}</b>{% endblock %}"),
        ("child", r#"{% extends "base" %}{% block x %}{{ super() }}{% endblock %}"#),
    ]);
    let result = engine.render("child", value! { v: "&" }).unwrap();
    assert_eq!(result, "<b>&amp;</b>");
}

#[test]
fn extends_err_super_without_parent_block() {
    let engine = engine(&[("a", "{% block x %}{{ super() }}{% endblock %}")]);
    let err = engine.render("a", value! {}).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOperation);
    assert_eq!(err.message(), "block `x` has no parent block");
    assert_eq!(err.name(), Some("a"));
}

#[test]
fn extends_err_super_outside_block() {
    let engine = engine(&[("a", "{{ super() }}")]);
    let err = engine.render("a", value! {}).unwrap_err();
    assert_eq!(err.message(), "`super()` used outside of a block");
}

#[test]
fn extends_err_missing_parent() {
    let engine = engine(&[("child", r#"{% extends "nope" %}"#)]);
    let err = engine.render("child", value! {}).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TemplateNotFound);
    assert_eq!(err.message(), r#"template "nope" does not exist"#);
    assert_eq!(err.name(), Some("child"));
    assert_eq!(
        err.to_string(),
        r#"TemplateNotFound: template "nope" does not exist (in child:1:12)"#
    );
}

#[test]
fn extends_err_cycle() {
    let engine = engine(&[
        ("a", r#"{% extends "b" %}"#),
        ("b", r#"{% extends "a" %}"#),
    ]);
    let err = engine.render("a", value! {}).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CyclicInheritance);
    assert_eq!(err.kind().category(), trellis::Category::Load);
    assert_eq!(err.message(), r#"cyclic inheritance: "a" -> "b" -> "a""#);
}

#[test]
fn extends_err_self_cycle() {
    let engine = engine(&[("a", r#"{% extends "a" %}"#)]);
    let err = engine.render("a", value! {}).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CyclicInheritance);
}

#[test]
fn include() {
    let engine = engine(&[
        ("nav", "<nav>{{ title }}</nav>"),
        ("page", r#"{% include "nav" %}<main>{{ title }}</main>"#),
    ]);
    let result = engine.render("page", value! { title: "Home" }).unwrap();
    assert_eq!(result, "<nav>Home</nav><main>Home</main>");
}

#[test]
fn include_sees_local_variables() {
    let engine = engine(&[
        ("item", "[{{ x }}]"),
        ("page", r#"{% for x in xs %}{% include "item" %}{% endfor %}"#),
    ]);
    let result = engine.render("page", value! { xs: [1, 2] }).unwrap();
    assert_eq!(result, "[1][2]");
}

#[test]
fn include_variables_do_not_leak() {
    let engine = engine(&[
        ("inner", "{% set y = 1 %}{{ y }}"),
        ("page", r#"{% include "inner" %}{{ y is defined }}"#),
    ]);
    let result = engine.render("page", value! {}).unwrap();
    assert_eq!(result, "1false");
}

#[test]
fn include_with_extends() {
    let engine = engine(&[
        ("card_base", "<div>{% block body %}{% endblock %}</div>"),
        (
            "card",
            r#"{% extends "card_base" %}{% block body %}{{ x }}{% endblock %}"#,
        ),
        ("page", r#"{% include "card" %}{% include "card" %}"#),
    ]);
    let result = engine.render("page", value! { x: 1 }).unwrap();
    assert_eq!(result, "<div>1</div><div>1</div>");
}

#[test]
fn include_nested() {
    let engine = engine(&[
        ("c", "c"),
        ("b", r#"b{% include "c" %}"#),
        ("a", r#"a{% include "b" %}"#),
    ]);
    assert_eq!(engine.render("a", value! {}).unwrap(), "abc");
}

#[test]
fn include_ignore_missing() {
    let engine = engine(&[("page", r#"a{% include "nope" ignore missing %}b"#)]);
    assert_eq!(engine.render("page", value! {}).unwrap(), "ab");
}

#[test]
fn include_err_missing() {
    let engine = engine(&[("page", "a\n{% include \"nope\" %}")]);
    let err = engine.render("page", value! {}).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TemplateNotFound);
    assert_eq!(err.message(), r#"template "nope" does not exist"#);
    assert_eq!(err.line(), Some(2));
}

#[test]
fn include_err_missing_only_when_executed() {
    let engine = engine(&[("page", r#"{% if false %}{% include "nope" %}{% endif %}ok"#)]);
    assert_eq!(engine.render("page", value! {}).unwrap(), "ok");
}

#[test]
fn include_err_recursive() {
    let mut engine = engine(&[("a", r#"x{% include "a" %}"#)]);
    engine.set_max_recursion(10);
    let err = engine.render("a", value! {}).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RecursionLimitExceeded);
    assert_eq!(err.message(), "maximum recursion depth of 10 exceeded");
}

#[test]
fn include_recursive_with_condition() {
    let engine = engine(&[(
        "tree",
        r#"{{ node.name }}{% if node.children %}({% for node in node.children %}{% include "tree" %}{% endfor %}){% endif %}"#,
    )]);
    let result = engine
        .render(
            "tree",
            value! {
                node: {
                    name: "a",
                    children: [
                        { name: "b", children: [] },
                        { name: "c", children: [{ name: "d", children: [] }] },
                    ],
                },
            },
        )
        .unwrap();
    assert_eq!(result, "a(bc(d))");
}

#[test]
fn extends_macros_from_parent() {
    let engine = engine(&[
        (
            "base",
            "{% macro em(s) %}<em>{{ s }}</em>{% endmacro %}{% block body %}{% endblock %}",
        ),
        (
            "child",
            r#"{% extends "base" %}{% block body %}{{ em("hi") }}{% endblock %}"#,
        ),
    ]);
    assert_eq!(engine.render("child", value! {}).unwrap(), "<em>hi</em>");
}
