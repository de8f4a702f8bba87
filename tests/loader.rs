use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

use trellis::{value, Engine, ErrorKind, FileLoader, Loader, Options};

fn write(root: &Path, name: &str, source: &str) {
    let path = root.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, source).unwrap();
}

fn engine(root: &Path) -> Engine {
    let mut engine = Engine::new();
    engine.set_loader(FileLoader::new(root));
    engine
}

#[test]
fn loader_renders_from_directory() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "base.html",
        "<title>{% block title %}{% endblock %}</title>{% include \"partials/nav.html\" %}",
    );
    write(dir.path(), "partials/nav.html", "<nav>{{ user }}</nav>");
    write(
        dir.path(),
        "page.html",
        r#"{% extends "base.html" %}{% block title %}Page{% endblock %}"#,
    );

    let result = engine(dir.path())
        .render("page.html", value! { user: "ana" })
        .unwrap();
    assert_eq!(result, "<title>Page</title><nav>ana</nav>");
}

#[test]
fn loader_err_template_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let err = engine(dir.path())
        .get_template("missing.html")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TemplateNotFound);
    assert!(err.message().contains("missing.html"), "{err}");
    assert_eq!(err.to_string(), r#"TemplateNotFound: template "missing.html" does not exist"#);
}

#[test]
fn loader_err_no_loader() {
    let err = Engine::new().render("page.html", value! {}).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TemplateNotFound);
}

#[test]
fn loader_err_path_traversal() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "templates/page.html", "x");
    write(dir.path(), "secret.txt", "secret");
    let engine = engine(&dir.path().join("templates"));

    for name in ["../secret.txt", "a/../../secret.txt", "/etc/passwd"] {
        let err = engine.get_template(name).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTemplatePath, "{name}");
        assert_eq!(err.kind().category(), trellis::Category::Load);
    }
}

#[test]
fn loader_err_traversal_in_include() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "t/page.html", r#"{% include "../secret.txt" %}"#);
    write(dir.path(), "secret.txt", "secret");
    let err = engine(&dir.path().join("t"))
        .render("page.html", value! {})
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidTemplatePath);
    assert_eq!(err.name(), Some("page.html"));
}

#[test]
fn loader_err_syntax_names_file() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "broken.html", "ok\n{% if %}");
    let err = engine(dir.path()).get_template("broken.html").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SyntaxError);
    assert_eq!(err.name(), Some("broken.html"));
    assert_eq!(err.line(), Some(2));
}

#[test]
fn loader_cache_reloads_modified_template() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("page.html");
    write(dir.path(), "page.html", "one");
    let engine = engine(dir.path());
    assert_eq!(engine.render("page.html", value! {}).unwrap(), "one");
    assert_eq!(engine.render("page.html", value! {}).unwrap(), "one");

    fs::write(&path, "two").unwrap();
    let later = SystemTime::now() + Duration::from_secs(10);
    fs::File::options()
        .write(true)
        .open(&path)
        .unwrap()
        .set_modified(later)
        .unwrap();
    assert_eq!(engine.render("page.html", value! {}).unwrap(), "two");
}

#[test]
fn loader_added_templates_take_precedence() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "page.html", "from disk");
    let mut engine = engine(dir.path());
    engine.add_template("page.html", "from memory").unwrap();
    assert_eq!(engine.render("page.html", value! {}).unwrap(), "from memory");
}

#[test]
fn loader_custom() {
    struct Static;

    impl Loader for Static {
        fn load(&self, name: &str) -> trellis::Result<Option<String>> {
            Ok((name == "hello").then(|| "Hello {{ name }}!".to_owned()))
        }
    }

    let mut engine = Engine::new();
    engine.set_loader(Static);
    assert_eq!(
        engine.render("hello", value! { name: "World" }).unwrap(),
        "Hello World!"
    );
    let err = engine.render("bye", value! {}).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TemplateNotFound);
}

#[test]
fn loader_from_options() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "page.html", "{{ v }}");
    write(dir.path(), "page.txt", "{{ v }}");
    let options = Options::new()
        .template_path(dir.path())
        .autoescape_on([".html"]);
    let engine = Engine::with_options(&options);
    assert_eq!(engine.render("page.html", value! { v: "&" }).unwrap(), "&amp;");
    assert_eq!(engine.render("page.txt", value! { v: "&" }).unwrap(), "&");
}

#[test]
fn loader_template_path_may_be_a_file() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "page.html", "x");
    write(dir.path(), "other.html", "y");
    let options = Options::new().template_path(dir.path().join("page.html"));
    let engine = Engine::with_options(&options);
    assert_eq!(engine.render("other.html", value! {}).unwrap(), "y");
}
