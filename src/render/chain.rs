//! Resolves the templates a render needs before rendering starts.
//!
//! The `extends` chain of the root template and every template reachable
//! through `include` are loaded up front so that the renderer can borrow
//! them for the duration of the render.

use std::collections::HashMap;
use std::sync::Arc;

use crate::types::template::Template;
use crate::{Engine, Error, ErrorKind, Result};

/// Everything loaded for a single render.
#[cfg_attr(internal_debug, derive(Debug))]
pub struct Env {
    /// The root template followed by its ancestors.
    pub chain: Vec<Arc<Template>>,

    /// The chain of each included template by name.
    pub includes: HashMap<String, Include>,
}

/// The result of loading an included template.
///
/// Failures are only reported if the `include` statement is executed.
#[cfg_attr(internal_debug, derive(Debug))]
pub enum Include {
    Found(Vec<Arc<Template>>),
    Missing(Error),
    Failed(Error),
}

pub fn prepare(engine: &Engine, root: Arc<Template>) -> Result<Env> {
    let chain = resolve(engine, root)?;

    let mut includes = HashMap::new();
    let mut pending: Vec<String> = chain
        .iter()
        .flat_map(|t| t.includes.iter().cloned())
        .collect();

    while let Some(name) = pending.pop() {
        if includes.contains_key(&name) {
            continue;
        }
        let include = match engine.load(&name) {
            Ok(t) => match resolve(engine, t) {
                Ok(chain) => {
                    pending.extend(chain.iter().flat_map(|t| t.includes.iter().cloned()));
                    Include::Found(chain)
                }
                Err(err) => Include::Failed(err),
            },
            Err(err) if err.kind() == ErrorKind::TemplateNotFound => Include::Missing(err),
            Err(err) => Include::Failed(err),
        };
        includes.insert(name, include);
    }

    tracing::trace!(
        chain = chain.len(),
        includes = includes.len(),
        "resolved render environment"
    );
    Ok(Env { chain, includes })
}

/// Walks the `extends` chain starting at the given template.
fn resolve(engine: &Engine, t: Arc<Template>) -> Result<Vec<Arc<Template>>> {
    let mut names = vec![t.display_name().to_owned()];
    let mut chain = vec![t];

    loop {
        let child = match chain.last() {
            Some(child) => child.clone(),
            None => break,
        };
        let parent = match &child.parent {
            Some(parent) => parent,
            None => break,
        };
        let name = child.name.as_deref();

        if names.iter().any(|n| *n == parent.value) {
            names.push(parent.value.clone());
            let path = names
                .iter()
                .map(|n| format!("{n:?}"))
                .collect::<Vec<_>>()
                .join(" -> ");
            return Err(Error::span(
                ErrorKind::CyclicInheritance,
                format!("cyclic inheritance: {path}"),
                &child.source,
                parent.span,
            )
            .with_template_name(name));
        }

        let t = engine
            .load(&parent.value)
            .map_err(|err| err.enrich(name, &child.source, parent.span))?;
        tracing::trace!(child = child.display_name(), parent = %parent.value, "resolved parent");
        names.push(parent.value.clone());
        chain.push(t);
    }

    Ok(chain)
}
