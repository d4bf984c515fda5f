use std::fmt::{Debug, Formatter, Result as FmtResult};

use crate::container::Value;
use crate::identifier::Identifier;
use crate::provider::Provider;
use crate::scope::Scope;

/// A provider together with what it produces, what it needs and how its
/// results are cached.
///
/// Bindings are immutable: [`Binding::with_scope`] returns a new binding.
#[derive(Clone)]
pub struct Binding {
    output_id: Identifier,
    dependency_ids: Vec<Identifier>,
    provider: Provider,
    scope: Scope,
    placeholder: bool,
}

impl Binding {
    /// Creates a transient binding. Supplier and late-binding annotations on
    /// `output_id` are dropped, since they only describe how a value is
    /// requested.
    pub fn new<I>(output_id: Identifier, dependency_ids: I, provider: Provider) -> Self
    where
        I: IntoIterator<Item = Identifier>,
    {
        Self {
            output_id: output_id.output_id(),
            dependency_ids: dependency_ids.into_iter().collect(),
            provider,
            scope: Scope::Transient,
            placeholder: false,
        }
    }

    /// Binds a fixed value. The value still goes through response validation
    /// when the container preloads it.
    pub fn instance(output_id: Identifier, value: Value) -> Self {
        Self::new(output_id, [], Provider::instance(value)).with_scope(Scope::OptimisticSingleton)
    }

    /// Stands in for a value that will be supplied from outside, e.g. through
    /// a [`Factory`](crate::module::Factory). Resolving it fails with
    /// [`ResolveError::ProviderMissing`](crate::container::ResolveError::ProviderMissing).
    pub fn placeholder(output_id: Identifier) -> Self {
        Self {
            placeholder: true,
            ..Self::new(output_id, [], Provider::instance(Value::Undefined))
        }
    }

    pub fn with_scope(self, scope: Scope) -> Self {
        Self { scope, ..self }
    }

    pub fn output_id(&self) -> &Identifier {
        &self.output_id
    }

    pub fn dependency_ids(&self) -> &[Identifier] {
        &self.dependency_ids
    }

    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn is_async(&self) -> bool {
        self.provider.is_async()
    }

    pub fn is_placeholder(&self) -> bool {
        self.placeholder
    }
}

impl Debug for Binding {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Binding")
            .field("output_id", &self.output_id)
            .field("dependency_ids", &self.dependency_ids)
            .field("provider", &self.provider)
            .field("scope", &self.scope)
            .field("placeholder", &self.placeholder)
            .finish()
    }
}
