#![no_main]

use std::collections::BTreeMap;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use serde::Serialize;
use trellis::UndefinedBehavior;

#[derive(Debug, Serialize, Arbitrary)]
#[serde(untagged)]
enum Value {
    None,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

#[derive(Debug, Arbitrary)]
enum Behavior {
    Strict,
    SemiStrict,
    Chainable,
    Lenient,
}

fuzz_target!(|data: (&str, Vec<(&str, &str)>, Value, Behavior)| {
    let (root, includes, value, behavior) = data;
    let mut engine = trellis::Engine::new();
    engine.set_undefined_behavior(match behavior {
        Behavior::Strict => UndefinedBehavior::Strict,
        Behavior::SemiStrict => UndefinedBehavior::SemiStrict,
        Behavior::Chainable => UndefinedBehavior::Chainable,
        Behavior::Lenient => UndefinedBehavior::Lenient,
    });
    if engine.add_template("fuzz", root).is_err() {
        return;
    }
    for (name, data) in includes {
        let _ = engine.add_template(name, data);
    }
    let _ = engine.render("fuzz", &value);
});
