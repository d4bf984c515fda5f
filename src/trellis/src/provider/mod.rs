mod dependencies;

use std::error::Error;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

use crate::container::Value;

pub use dependencies::Dependencies;

/// The error type user providers fail with. Any error converts into it with
/// `?`, including plain strings.
pub type BoxError = Box<dyn Error + Send + Sync>;

pub type ProvideResult = Result<Value, BoxError>;

type SyncProvide = dyn Fn(Dependencies) -> ProvideResult + Send + Sync;

type AsyncProvide = dyn Fn(Dependencies) -> BoxFuture<'static, ProvideResult> + Send + Sync;

/// A factory producing the value of one binding.
///
/// A [`Provider`] receives the already resolved dependencies of its binding,
/// positionally matching the dependency identifiers, each shaped by the
/// annotations of its identifier (see [`Dependencies`]).
///
/// Whether a provider is synchronous is fixed when it is created and never
/// inferred from what it returns. A synchronous container rejects every
/// binding graph where a synchronous value would have to wait on an
/// asynchronous provider.
///
/// Providers are shared by every resolution of their binding, possibly from
/// several threads at once, so they must be `Send + Sync`. The container
/// decides whether the produced value is cached; a provider itself should
/// return a new value on every call.
#[derive(Clone)]
pub enum Provider {
    Sync(Arc<SyncProvide>),
    Async(Arc<AsyncProvide>),
}

impl Provider {
    pub fn sync<F>(provide: F) -> Self
    where
        F: Fn(Dependencies) -> ProvideResult + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(provide))
    }

    /// Creates an asynchronous provider from a function returning a future.
    ///
    /// ```
    /// use trellis::container::Value;
    /// use trellis::provider::Provider;
    ///
    /// let provider = Provider::future(|_deps| async { Ok(Value::new(42u32)) });
    /// assert!(provider.is_async());
    /// ```
    pub fn future<F, Fut>(provide: F) -> Self
    where
        F: Fn(Dependencies) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ProvideResult> + Send + 'static,
    {
        Self::Async(Arc::new(move |deps| provide(deps).boxed()))
    }

    /// A synchronous provider handing out the same value on every call.
    pub fn instance(value: Value) -> Self {
        Self::sync(move |_| Ok(value.clone()))
    }

    pub fn is_async(&self) -> bool {
        matches!(self, Self::Async(_))
    }
}

impl Debug for Provider {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Sync(_) => write!(f, "Provider::Sync"),
            Self::Async(_) => write!(f, "Provider::Async"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_sync_succeeds() {
        let provider = Provider::sync(|deps| {
            assert!(deps.is_empty());
            Ok(Value::new(1i32))
        });
        assert!(!provider.is_async());

        let Provider::Sync(provide) = provider else {
            unreachable!("`provider` should be synchronous");
        };
        let value = provide(Dependencies::default()).unwrap();
        assert_eq!(*value.downcast::<i32>().unwrap(), 1);
    }

    #[test]
    fn provider_instance_returns_same_value() {
        let Provider::Sync(provide) = Provider::instance(Value::new(String::from("x"))) else {
            unreachable!("`provider` should be synchronous");
        };
        let first = provide(Dependencies::default()).unwrap();
        let second = provide(Dependencies::default()).unwrap();
        assert!(first.same(&second));
    }

    #[tokio::test]
    async fn provider_future_succeeds() {
        let provider = Provider::future(|_| async { Err::<Value, BoxError>("<ERROR>".into()) });
        let Provider::Async(provide) = provider else {
            unreachable!("`provider` should be asynchronous");
        };
        let err = provide(Dependencies::default()).await.unwrap_err();
        assert_eq!(err.to_string(), "<ERROR>");
    }
}
