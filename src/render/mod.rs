//! Renders compiled templates against a context.

mod chain;
mod core;
mod fmt;
mod iter;
mod stack;
mod undefined;
pub(crate) mod value;

use std::sync::Arc;

use crate::render::core::Renderer;
pub use crate::render::undefined::UndefinedBehavior;
use crate::types::template::Template;
use crate::{Engine, Error, ErrorKind, Map, Result, Value};

/// Renders a template to a string.
///
/// Output is only returned if the whole render succeeds.
pub(crate) fn template(engine: &Engine, root: &Arc<Template>, globals: &Value) -> Result<String> {
    let empty = Value::Map(Map::new());
    let globals = match globals {
        Value::Map(_) => globals,
        Value::None => &empty,
        other => {
            return Err(Error::new(
                ErrorKind::BadContext,
                format!("context must be a map, found {}", other.human()),
            ))
        }
    };

    let env = chain::prepare(engine, root.clone())?;
    let escape = engine.auto_escape.should_escape(root.name.as_deref());
    tracing::debug!(
        name = root.display_name(),
        escape,
        parents = env.chain.len() - 1,
        "rendering template"
    );

    let mut out = String::with_capacity(root.source.len());
    Renderer::new(engine, &env, globals, escape).render(&env.chain, &mut out)?;
    Ok(out)
}
