use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;

use futures::future::BoxFuture;
use snafu::prelude::*;

use crate::binding::Binding;
use crate::container::core::ContainerCore;
use crate::container::error::ResolveError;
use crate::container::Value;
use crate::identifier::{expand_output_id, Identifier};
use crate::module::{BindingMap, DuplicateOutputSnafu, Module, ModuleError};

/// A container whose bindings are all synchronous. Values can be resolved
/// without an executor.
#[derive(Clone)]
pub struct SyncContainer {
    core: Arc<ContainerCore>,
}

impl SyncContainer {
    /// Resolves the value bound to `id`. The first call wires the container
    /// and resolves its optimistic singletons.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the graph cannot be resolved, or the
    /// error of the resolution itself.
    pub fn get(&self, id: &Identifier) -> Result<Value, ResolveError> {
        self.core.get(id)
    }

    pub fn get_async(&self, id: &Identifier) -> BoxFuture<'static, Result<Value, ResolveError>> {
        self.core.get_async(id)
    }

    /// Validates the graph once. Succeeds immediately after the first
    /// successful call.
    ///
    /// # Errors
    ///
    /// See [`SyncContainer::check`].
    pub fn wire(&self) -> Result<(), ResolveError> {
        self.core.wire()
    }

    /// Validates the graph every time it is called.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::ProviderMissing`],
    /// [`ResolveError::CircularDependency`] or [`ResolveError::SyncSupplier`],
    /// checked in that order.
    pub fn check(&self) -> Result<(), ResolveError> {
        self.core.check()
    }

    /// Resolves every optimistic singleton now rather than on the first
    /// request.
    ///
    /// # Errors
    ///
    /// Returns the errors of all failed singletons.
    pub fn preload(&self) -> Result<(), ResolveError> {
        self.core.preload()
    }

    pub fn preload_async(&self) -> BoxFuture<'static, Result<(), ResolveError>> {
        self.core.preload_async()
    }
}

impl Debug for SyncContainer {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("SyncContainer")
            .field("bindings", &self.core.bindings())
            .finish_non_exhaustive()
    }
}

/// A container with at least one asynchronous binding.
#[derive(Clone)]
pub struct AsyncContainer {
    core: Arc<ContainerCore>,
}

impl AsyncContainer {
    pub fn get_async(&self, id: &Identifier) -> BoxFuture<'static, Result<Value, ResolveError>> {
        self.core.get_async(id)
    }

    pub fn wire(&self) -> Result<(), ResolveError> {
        self.core.wire()
    }

    pub fn check(&self) -> Result<(), ResolveError> {
        self.core.check()
    }

    pub fn preload_async(&self) -> BoxFuture<'static, Result<(), ResolveError>> {
        self.core.preload_async()
    }
}

impl Debug for AsyncContainer {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("AsyncContainer")
            .field("bindings", &self.core.bindings())
            .finish_non_exhaustive()
    }
}

/// The resolver built from a [`Module`]. Which variant it is depends on
/// whether any binding of the module is asynchronous.
#[derive(Debug, Clone)]
pub enum Container {
    Sync(SyncContainer),
    Async(AsyncContainer),
}

impl Container {
    pub fn is_sync(&self) -> bool {
        matches!(self, Self::Sync(_))
    }

    pub fn as_sync(&self) -> Option<&SyncContainer> {
        match self {
            Self::Sync(container) => Some(container),
            Self::Async(_) => None,
        }
    }

    pub fn into_sync(self) -> Option<SyncContainer> {
        match self {
            Self::Sync(container) => Some(container),
            Self::Async(_) => None,
        }
    }

    pub fn as_async(&self) -> Option<&AsyncContainer> {
        match self {
            Self::Async(container) => Some(container),
            Self::Sync(_) => None,
        }
    }

    pub fn into_async(self) -> Option<AsyncContainer> {
        match self {
            Self::Async(container) => Some(container),
            Self::Sync(_) => None,
        }
    }

    pub fn get_async(&self, id: &Identifier) -> BoxFuture<'static, Result<Value, ResolveError>> {
        self.core().get_async(id)
    }

    pub fn wire(&self) -> Result<(), ResolveError> {
        self.core().wire()
    }

    pub fn check(&self) -> Result<(), ResolveError> {
        self.core().check()
    }

    pub fn preload_async(&self) -> BoxFuture<'static, Result<(), ResolveError>> {
        self.core().preload_async()
    }

    fn core(&self) -> &Arc<ContainerCore> {
        match self {
            Self::Sync(container) => &container.core,
            Self::Async(container) => &container.core,
        }
    }
}

pub fn create_container(module: &Module) -> Container {
    from_bindings(module.binding_map().clone())
}

pub(crate) fn from_bindings(bindings: BindingMap) -> Container {
    let core = Arc::new(ContainerCore::new(bindings));
    if core.is_async() {
        Container::Async(AsyncContainer { core })
    } else {
        Container::Sync(SyncContainer { core })
    }
}

/// Returns a new container with `bindings` added, replacing the placeholders
/// they match. Caches of `container` are not carried over.
///
/// # Errors
///
/// Returns [`ModuleError::DuplicateOutput`] naming every binding whose output
/// is already provided by a real binding.
pub fn add_bound_instances<I>(container: &Container, bindings: I) -> Result<Container, ModuleError>
where
    I: IntoIterator<Item = Binding>,
{
    let mut map = container.core().bindings().clone();
    let mut duplicates: Vec<Identifier> = Vec::new();

    for binding in bindings {
        let binding = Arc::new(binding);
        let output_id = binding.output_id();
        for id in expand_output_id(output_id) {
            let replaceable = match map.get(&id) {
                Some(existing) => existing.is_placeholder(),
                None => id == *output_id,
            };
            if replaceable {
                map.insert(id, Arc::clone(&binding));
            } else if map.contains(&id) && !duplicates.contains(output_id) {
                duplicates.push(output_id.clone());
            }
        }
    }

    ensure!(
        duplicates.is_empty(),
        DuplicateOutputSnafu {
            output_ids: duplicates,
        }
    );
    Ok(from_bindings(map))
}

#[cfg(test)]
mod tests {
    use crate::provider::Provider;

    use super::*;

    struct Config;

    struct Service;

    fn sync_binding() -> Binding {
        Binding::new(
            Identifier::of::<Service>(),
            [Identifier::of::<Config>()],
            Provider::sync(|_| Ok(Value::new(Service))),
        )
    }

    #[test]
    fn create_container_picks_variant_by_providers() {
        let module = Module::from_binding(sync_binding());
        assert!(create_container(&module).is_sync());

        let module = module
            .add_binding(Binding::new(
                Identifier::of::<Config>(),
                [],
                Provider::future(|_| async { Ok(Value::new(Config)) }),
            ))
            .unwrap();
        let container = create_container(&module);
        assert!(!container.is_sync());
        assert!(container.as_async().is_some());
        assert!(container.into_sync().is_none());
    }

    #[test]
    fn add_bound_instances_replaces_placeholders() {
        let module = Module::from_binding(sync_binding())
            .add_binding(Binding::placeholder(Identifier::of::<Config>()))
            .unwrap();
        let container = create_container(&module);
        assert!(container
            .as_sync()
            .unwrap()
            .get(&Identifier::of::<Service>())
            .is_err());

        let bound = add_bound_instances(
            &container,
            [Binding::instance(Identifier::of::<Config>(), Value::new(Config))],
        )
        .unwrap()
        .into_sync()
        .unwrap();
        assert!(bound.get(&Identifier::of::<Service>()).unwrap().is::<Service>());
        assert!(bound
            .get(&Identifier::of::<Config>().nullable())
            .unwrap()
            .is::<Config>());
    }

    #[test]
    fn add_bound_instances_fails_when_output_exists() {
        let container = create_container(&Module::from_binding(sync_binding()));
        let err = add_bound_instances(
            &container,
            [Binding::instance(Identifier::of::<Service>(), Value::new(Service))],
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Duplicate output identifier for module: Service"
        );
    }

    #[test]
    fn container_check_validates_every_time() {
        let container = create_container(&Module::from_binding(sync_binding()));
        assert!(container.wire().is_err());
        assert!(container.check().is_err());

        let container = add_bound_instances(
            &container,
            [Binding::instance(Identifier::of::<Config>(), Value::new(Config))],
        )
        .unwrap();
        assert!(container.wire().is_ok());
        assert!(container.check().is_ok());
    }
}
