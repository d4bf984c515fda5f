mod binding_map;
mod factory;

use std::sync::Arc;

use snafu::prelude::*;

use crate::binding::Binding;
use crate::container::error::SortedIds;
use crate::container::{self, Container};
use crate::identifier::{expand_output_id, Identifier};

pub(crate) use binding_map::BindingMap;
pub use factory::{Factory, FactoryError};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum ModuleError {
    #[snafu(display("Duplicate output identifier for module: {}", SortedIds::new(output_ids)))]
    #[non_exhaustive]
    DuplicateOutput { output_ids: Vec<Identifier> },
}

/// An immutable collection of bindings, the unit a container is built from.
///
/// Every binding is stored under each expanded form of its output identifier,
/// so a binding for `T` also answers requests for `T` marked nullable and/or
/// undefinable. Two bindings may never share such a key. Adding bindings
/// returns a new module and leaves the original untouched, even on failure.
///
/// ```
/// use trellis::binding::Binding;
/// use trellis::container::Value;
/// use trellis::identifier::Identifier;
/// use trellis::module::Module;
///
/// let port = Identifier::new("port");
/// let module = Module::new()
///     .add_binding(Binding::instance(port.clone(), Value::new(8080u16)))
///     .unwrap();
///
/// assert!(module.add_binding(Binding::placeholder(port.nullable())).is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct Module {
    bindings: BindingMap,
    is_async: bool,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_binding(binding: Binding) -> Self {
        let mut module = Self::new();
        module.insert(Arc::new(binding));
        module
    }

    /// # Errors
    ///
    /// Returns [`ModuleError::DuplicateOutput`] if the module already has a
    /// binding for any expanded form of the binding's output.
    pub fn add_binding(&self, binding: Binding) -> Result<Self, ModuleError> {
        ensure!(
            !self.overlaps(&binding),
            DuplicateOutputSnafu {
                output_ids: vec![binding.output_id().base_id()],
            }
        );

        let mut module = self.clone();
        module.insert(Arc::new(binding));
        Ok(module)
    }

    /// Combines two modules.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::DuplicateOutput`] naming every output both
    /// modules provide.
    pub fn merge_module(&self, other: &Module) -> Result<Self, ModuleError> {
        let mut duplicates: Vec<Identifier> = Vec::new();
        for binding in other.bindings.bindings() {
            let base_id = binding.output_id().base_id();
            if self.overlaps(binding) && !duplicates.contains(&base_id) {
                duplicates.push(base_id);
            }
        }
        ensure!(
            duplicates.is_empty(),
            DuplicateOutputSnafu {
                output_ids: duplicates,
            }
        );

        let mut module = self.clone();
        for binding in other.bindings.bindings() {
            module.insert(Arc::clone(binding));
        }
        Ok(module)
    }

    /// True if any binding has an asynchronous provider, in which case the
    /// module produces an [`AsyncContainer`](crate::container::AsyncContainer).
    pub fn is_async(&self) -> bool {
        self.is_async
    }

    /// Distinct bindings in insertion order.
    pub fn bindings(&self) -> impl Iterator<Item = &Binding> {
        self.bindings.bindings().map(|binding| &**binding)
    }

    /// Looks up the binding answering requests for `id`.
    pub fn get(&self, id: &Identifier) -> Option<&Binding> {
        self.bindings.get(&id.output_id()).map(|binding| &**binding)
    }

    /// Turns the module into a [`Factory`] which accepts the dependencies no
    /// binding provides as plain instances.
    pub fn into_factory(self) -> Factory {
        Factory::new(&self)
    }

    pub fn into_container(self) -> Container {
        container::create_container(&self)
    }

    pub(crate) fn binding_map(&self) -> &BindingMap {
        &self.bindings
    }

    fn overlaps(&self, binding: &Binding) -> bool {
        expand_output_id(binding.output_id())
            .iter()
            .any(|id| self.bindings.contains(id))
    }

    fn insert(&mut self, binding: Arc<Binding>) {
        self.is_async |= binding.is_async();
        for id in expand_output_id(binding.output_id()) {
            self.bindings.insert(id, Arc::clone(&binding));
        }
    }
}
