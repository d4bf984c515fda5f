use std::collections::HashSet;
use std::sync::Arc;

use snafu::prelude::*;

use crate::binding::Binding;
use crate::container::error::{ProviderMissingSnafu, ResolveError};
use crate::container::{self, Container, Value};
use crate::identifier::{expand_output_id, Identifier};
use crate::module::{DuplicateOutputSnafu, Module, ModuleError};

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum FactoryError {
    #[snafu(transparent)]
    Module { source: ModuleError },
    #[snafu(transparent)]
    Container { source: ResolveError },
}

/// A module whose unsatisfied dependencies are supplied as instances right
/// before the container is built.
///
/// Each missing dependency is backed by a placeholder until it is
/// registered, so the rest of the graph can already be checked.
///
/// ```
/// use trellis::binding::Binding;
/// use trellis::container::Value;
/// use trellis::identifier::Identifier;
/// use trellis::module::Module;
/// use trellis::provider::Provider;
///
/// let port = Identifier::new("port");
/// let url = Identifier::new("url");
/// let factory = Module::from_binding(Binding::new(
///     url.clone(),
///     [port.clone()],
///     Provider::sync(|deps| {
///         let port = deps.instance::<u16>(0).ok_or("port is missing")?;
///         Ok(Value::new(format!("http://localhost:{port}")))
///     }),
/// ))
/// .into_factory();
///
/// assert!(factory.clone().into_container().is_err());
///
/// let container = factory
///     .register(port, Value::new(8080u16))
///     .unwrap()
///     .into_container()
///     .unwrap()
///     .into_sync()
///     .unwrap();
/// let url = container.get(&url).unwrap().downcast::<String>().unwrap();
/// assert_eq!(url.as_str(), "http://localhost:8080");
/// ```
#[derive(Debug, Clone)]
pub struct Factory {
    container: Container,
    missing: Vec<(Identifier, Vec<Identifier>)>,
    existing: HashSet<Identifier>,
    registered: Vec<Binding>,
}

impl Factory {
    pub(crate) fn new(module: &Module) -> Self {
        let bindings = module.binding_map();

        let mut missing: Vec<(Identifier, Vec<Identifier>)> = Vec::new();
        for binding in bindings.bindings() {
            for dependency_id in binding.dependency_ids() {
                let output_id = dependency_id.output_id();
                if bindings.contains(&output_id) {
                    continue;
                }
                let base_id = output_id.base_id();
                match missing.iter_mut().find(|(id, _)| *id == base_id) {
                    Some((_, requested)) if requested.contains(&output_id) => {}
                    Some((_, requested)) => requested.push(output_id),
                    None => missing.push((base_id, vec![output_id])),
                }
            }
        }

        let mut merged = bindings.clone();
        for (base_id, requested) in &missing {
            let laxest_id = base_id
                .with_nullable(requested.iter().all(Identifier::is_nullable))
                .with_undefinable(requested.iter().all(Identifier::is_undefinable));
            let placeholder = Arc::new(Binding::placeholder(laxest_id));
            for id in expand_output_id(placeholder.output_id()) {
                if !merged.contains(&id) {
                    merged.insert(id, Arc::clone(&placeholder));
                }
            }
        }

        let existing = bindings.keys().map(Identifier::base_id).collect();
        Self {
            container: container::from_bindings(merged),
            missing,
            existing,
            registered: Vec::new(),
        }
    }

    /// The dependencies no binding provides and no instance was registered
    /// for yet.
    pub fn missing(&self) -> impl Iterator<Item = &Identifier> {
        self.missing.iter().flat_map(|(_, requested)| requested.iter())
    }

    /// Supplies the value of `output_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::DuplicateOutput`] if the output is already
    /// provided, or [`ResolveError::ProviderMissing`] listing the requested
    /// forms of it a value for `output_id` cannot satisfy, e.g. a nullable
    /// registration for a dependency requested as non-nullable.
    pub fn register(&self, output_id: Identifier, value: Value) -> Result<Self, FactoryError> {
        let output_id = output_id.output_id();
        let base_id = output_id.base_id();
        if self.existing.contains(&base_id) {
            return Err(DuplicateOutputSnafu {
                output_ids: vec![output_id],
            }
            .build()
            .into());
        }

        let mut factory = self.clone();
        if let Some(position) = factory.missing.iter().position(|(id, _)| *id == base_id) {
            let actual = expand_output_id(&output_id);
            let still_missing: Vec<Identifier> = factory.missing[position]
                .1
                .iter()
                .filter(|id| !actual.contains(id))
                .cloned()
                .collect();
            if !still_missing.is_empty() {
                return Err(ProviderMissingSnafu { ids: still_missing }.build().into());
            }
            factory.missing.remove(position);
        }

        factory.existing.insert(base_id);
        factory.registered.push(Binding::instance(output_id, value));
        Ok(factory)
    }

    /// # Errors
    ///
    /// Returns the validation error of the partially bound graph.
    pub fn wire(&self) -> Result<(), ResolveError> {
        self.container.wire()
    }

    /// # Errors
    ///
    /// Returns the validation error of the partially bound graph.
    pub fn check(&self) -> Result<(), ResolveError> {
        self.container.check()
    }

    /// Builds the container with every registered instance bound.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::ProviderMissing`] listing every dependency
    /// that is still unregistered.
    pub fn into_container(self) -> Result<Container, FactoryError> {
        if !self.missing.is_empty() {
            let ids: Vec<Identifier> = self.missing().cloned().collect();
            return Err(ProviderMissingSnafu { ids }.build().into());
        }
        Ok(container::add_bound_instances(&self.container, self.registered)?)
    }
}
