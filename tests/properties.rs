use proptest::prelude::*;
use trellis::{value, AutoEscape, Engine, UndefinedBehavior};

fn engine(escape: bool) -> Engine {
    let mut engine = Engine::new();
    engine.set_auto_escape(AutoEscape::enabled(escape));
    engine
}

proptest! {
    #[test]
    fn literal_text_renders_verbatim(source in "[^{}]{0,64}", n in any::<i64>()) {
        let engine = engine(true);
        let template = engine.compile(source.clone()).unwrap();
        prop_assert_eq!(template.render(value! {}).unwrap(), source.clone());
        prop_assert_eq!(template.render(value! { x: n, source: "other" }).unwrap(), source);
    }

    #[test]
    fn print_round_trips_plain_strings(s in "[^&<>\"']{0,64}", escape in any::<bool>()) {
        let result = engine(escape)
            .compile("{{ x }}")
            .unwrap()
            .render(value! { x: s.clone() })
            .unwrap();
        prop_assert_eq!(result, s);
    }

    #[test]
    fn escaped_output_has_no_markup(s in ".{0,64}") {
        let result = engine(true)
            .compile("{{ x }}")
            .unwrap()
            .render(value! { x: s })
            .unwrap();
        prop_assert!(!result.contains(['<', '>', '"', '\'']));
    }

    #[test]
    fn lenient_never_fails_on_missing_names(name in "[a-z][a-z0-9_]{0,8}") {
        prop_assume!(!matches!(
            name.as_str(),
            "and" | "or" | "not" | "in" | "is" | "if" | "else" | "true" | "false" | "none"
        ));
        let mut engine = Engine::new();
        engine.set_undefined_behavior(UndefinedBehavior::Lenient);
        let result = engine
            .compile(format!("[{{{{ {name} }}}}]"))
            .unwrap()
            .render(value! {})
            .unwrap();
        prop_assert_eq!(result, "[]");
    }

    #[test]
    fn integer_arithmetic_matches_rust(a in -1000i64..1000, b in 1i64..1000) {
        let result = engine(false)
            .compile("{{ a + b }} {{ a - b }} {{ a * b }} {{ a // b }} {{ a % b }}")
            .unwrap()
            .render(value! { a: a, b: b })
            .unwrap();
        let expected = format!(
            "{} {} {} {} {}",
            a + b,
            a - b,
            a * b,
            a.div_euclid(b),
            a.rem_euclid(b)
        );
        prop_assert_eq!(result, expected);
    }
}
