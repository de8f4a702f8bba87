use trellis::{value, AutoEscape, Engine};

fn setup(auto_escape: AutoEscape) -> Engine {
    let mut engine = Engine::new();
    engine.set_auto_escape(auto_escape);
    engine.add_template("page.html", "{{ v }}").unwrap();
    engine.add_template("page.txt", "{{ v }}").unwrap();
    engine
}

#[test]
fn escape_enabled_by_default() {
    let result = Engine::new()
        .compile("{{ v }}")
        .unwrap()
        .render(value! { v: "B&O" })
        .unwrap();
    assert_eq!(result, "B&amp;O");
}

#[test]
fn escape_disabled() {
    let result = setup(AutoEscape::enabled(false))
        .render("page.html", value! { v: "B&O" })
        .unwrap();
    assert_eq!(result, "B&O");
}

#[test]
fn escape_all_significant_characters() {
    let result = Engine::new()
        .compile("{{ v }}")
        .unwrap()
        .render(value! { v: r#"<a href="x">'y' & z</a>"# })
        .unwrap();
    assert_eq!(
        result,
        "&lt;a href=&quot;x&quot;&gt;&#x27;y&#x27; &amp; z&lt;/a&gt;"
    );
}

#[test]
fn escape_only_applies_to_output() {
    let result = Engine::new()
        .compile("{{ v | length }} {{ v | replace('&', 'and') }} {% if v == 'B&O' %}eq{% endif %}")
        .unwrap()
        .render(value! { v: "B&O" })
        .unwrap();
    assert_eq!(result, "3 BandO eq");
}

#[test]
fn escape_raw_text_untouched() {
    let result = Engine::new()
        .compile("<p class=\"x\">{{ v }}</p>")
        .unwrap()
        .render(value! { v: "<" })
        .unwrap();
    assert_eq!(result, "<p class=\"x\">&lt;</p>");
}

#[test]
fn escape_non_string_values() {
    let result = Engine::new()
        .compile("{{ v }}")
        .unwrap()
        .render(value! { v: ["<"] })
        .unwrap();
    assert_eq!(result, "[&quot;&lt;&quot;]");
}

#[test]
fn escape_on_extensions() {
    let engine = setup(AutoEscape::on_extensions([".html"]));
    assert_eq!(
        engine.render("page.html", value! { v: "B&O" }).unwrap(),
        "B&amp;O"
    );
    assert_eq!(
        engine.render("page.txt", value! { v: "B&O" }).unwrap(),
        "B&O"
    );
}

#[test]
fn escape_explicit_flag_wins_over_extensions() {
    let engine = setup(AutoEscape::on_extensions([".html"]).with_explicit(Some(false)));
    assert_eq!(
        engine.render("page.html", value! { v: "B&O" }).unwrap(),
        "B&O"
    );

    let engine = setup(AutoEscape::on_extensions([".html"]).with_explicit(Some(true)));
    assert_eq!(
        engine.render("page.txt", value! { v: "B&O" }).unwrap(),
        "B&amp;O"
    );
}

#[test]
fn escape_decided_by_root_template() {
    let mut engine = Engine::new();
    engine.set_auto_escape(AutoEscape::on_extensions([".html"]));
    engine.add_template("part.txt", "{{ v }}").unwrap();
    engine
        .add_template("page.html", r#"{% include "part.txt" %}"#)
        .unwrap();
    engine
        .add_template("page.txt", r#"{% include "part.txt" %}"#)
        .unwrap();
    assert_eq!(
        engine.render("page.html", value! { v: "<" }).unwrap(),
        "&lt;"
    );
    assert_eq!(engine.render("page.txt", value! { v: "<" }).unwrap(), "<");
}
