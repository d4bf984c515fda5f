use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};

use crate::container::error::{LatePendingSnafu, ResolveError};
use crate::container::Value;
use crate::identifier::Identifier;

/// The seam between supplier handles and the container producing their
/// values.
#[cfg_attr(test, mockall::automock)]
pub(crate) trait Supply: Send + Sync {
    fn supply(&self) -> Result<Value, ResolveError>;

    fn supply_async(&self) -> BoxFuture<'static, Result<Value, ResolveError>>;
}

/// A synchronous zero-argument callback handed to providers that requested
/// `id.supplier(SupplierMode::sync())`. Each call resolves the target again
/// according to its scope.
#[derive(Clone)]
pub struct Supplier {
    id: Identifier,
    source: Arc<dyn Supply>,
}

impl Supplier {
    pub(crate) fn new(id: Identifier, source: Arc<dyn Supply>) -> Self {
        Self { id, source }
    }

    /// # Errors
    ///
    /// Returns an error if the target or any of its dependencies fails.
    pub fn get(&self) -> Result<Value, ResolveError> {
        self.source.supply()
    }

    pub fn id(&self) -> &Identifier {
        &self.id
    }
}

impl Debug for Supplier {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Supplier").field("id", &self.id).finish()
    }
}

/// The asynchronous counterpart of [`Supplier`].
#[derive(Clone)]
pub struct AsyncSupplier {
    id: Identifier,
    source: Arc<dyn Supply>,
}

impl AsyncSupplier {
    pub(crate) fn new(id: Identifier, source: Arc<dyn Supply>) -> Self {
        Self { id, source }
    }

    pub fn get(&self) -> BoxFuture<'static, Result<Value, ResolveError>> {
        self.source.supply_async()
    }

    pub fn id(&self) -> &Identifier {
        &self.id
    }
}

impl Debug for AsyncSupplier {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("AsyncSupplier").field("id", &self.id).finish()
    }
}

pub(crate) type ValueFuture = BoxFuture<'static, Result<Value, ResolveError>>;

/// A deferred handle for a dependency requested with `id.late_binding()`.
///
/// The handle resolves once its target is available, which may be after the
/// provider receiving it has returned. A handle on a binding that is still
/// being constructed further up the same chain resolves to that very
/// instance.
#[derive(Clone)]
pub struct LateBinding {
    id: Identifier,
    deferred: bool,
    future: Shared<ValueFuture>,
}

impl LateBinding {
    pub(crate) fn deferred(id: Identifier, future: ValueFuture) -> Self {
        Self {
            id,
            deferred: true,
            future: future.shared(),
        }
    }

    pub(crate) fn joined(id: Identifier, future: ValueFuture) -> Self {
        Self {
            id,
            deferred: false,
            future: future.shared(),
        }
    }

    /// True if the handle resolves its target on its own instead of waiting
    /// for a binding already under construction.
    pub(crate) fn is_deferred(&self) -> bool {
        self.deferred
    }

    /// Waits for the target.
    ///
    /// # Errors
    ///
    /// Returns the error of the target's resolution.
    pub async fn resolve(&self) -> Result<Value, ResolveError> {
        self.future.clone().await
    }

    /// Reads the target without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::LatePending`] if the target is not available
    /// yet, or the error of the target's resolution.
    pub fn get(&self) -> Result<Value, ResolveError> {
        match self.poll() {
            Some(res) => res,
            None => LatePendingSnafu {
                id: self.id.clone(),
            }
            .fail(),
        }
    }

    /// Drives the target once without blocking. Returns `None` while it is
    /// still pending.
    pub(crate) fn poll(&self) -> Option<Result<Value, ResolveError>> {
        self.future.clone().now_or_never()
    }

    pub fn id(&self) -> &Identifier {
        &self.id
    }
}

impl Debug for LateBinding {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("LateBinding")
            .field("id", &self.id)
            .field("deferred", &self.deferred)
            .finish()
    }
}

/// One dependency as handed to a provider, shaped by the annotations of the
/// identifier it was requested with.
#[derive(Debug, Clone)]
pub enum Injected {
    Value(Value),
    Supplier(Supplier),
    AsyncSupplier(AsyncSupplier),
    LateBinding(LateBinding),
}

impl Injected {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_supplier(&self) -> Option<&Supplier> {
        match self {
            Self::Supplier(supplier) => Some(supplier),
            _ => None,
        }
    }

    pub fn as_async_supplier(&self) -> Option<&AsyncSupplier> {
        match self {
            Self::AsyncSupplier(supplier) => Some(supplier),
            _ => None,
        }
    }

    pub fn as_late_binding(&self) -> Option<&LateBinding> {
        match self {
            Self::LateBinding(late) => Some(late),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Self::Value(value) => Some(value),
            _ => None,
        }
    }
}
