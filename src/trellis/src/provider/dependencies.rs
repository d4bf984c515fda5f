use std::sync::Arc;

use crate::container::{AsyncSupplier, Injected, LateBinding, Managed, Supplier, Value};

/// The resolved dependencies handed to a provider, in declaration order.
///
/// Accessors return `None` when the index is out of range or when the entry
/// was delivered in a different shape, e.g. asking for a value where the
/// dependency was declared as a supplier.
#[derive(Debug, Clone, Default)]
pub struct Dependencies {
    entries: Vec<Injected>,
}

impl Dependencies {
    pub(crate) fn new(entries: Vec<Injected>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Injected> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Injected> {
        self.entries.iter()
    }

    pub fn value(&self, index: usize) -> Option<&Value> {
        self.get(index).and_then(Injected::as_value)
    }

    /// Downcasts a plain value dependency to its concrete type.
    pub fn instance<T: Managed>(&self, index: usize) -> Option<Arc<T>> {
        self.value(index).and_then(Value::downcast::<T>)
    }

    pub fn supplier(&self, index: usize) -> Option<&Supplier> {
        self.get(index).and_then(Injected::as_supplier)
    }

    pub fn async_supplier(&self, index: usize) -> Option<&AsyncSupplier> {
        self.get(index).and_then(Injected::as_async_supplier)
    }

    pub fn late(&self, index: usize) -> Option<&LateBinding> {
        self.get(index).and_then(Injected::as_late_binding)
    }

    pub fn into_vec(self) -> Vec<Injected> {
        self.entries
    }
}
