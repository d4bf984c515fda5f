use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;

use crate::util::any::{short_type_name, AsAny, Downcast, DowncastRef};

pub trait Managed: AsAny + Send + Sync + 'static {}

impl<T> Managed for T where T: AsAny + Send + Sync + 'static {}

/// A value produced by a provider.
///
/// Besides real objects a provider may answer with `Null` or `Undefined`,
/// which the container only accepts for nullable or undefinable outputs.
#[derive(Clone)]
pub enum Value {
    Null,
    Undefined,
    Instance(Arc<dyn Managed>),
}

impl Value {
    pub fn new<T: Managed>(object: T) -> Self {
        Self::Instance(Arc::new(object))
    }

    /// Wraps an already shared object. The concrete type is `T`, not
    /// `Arc<T>`, so it passes the type check of [`Identifier::of::<T>`].
    ///
    /// [`Identifier::of::<T>`]: crate::identifier::Identifier::of
    pub fn from_arc<T: Managed>(object: Arc<T>) -> Self {
        Self::Instance(object)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    pub fn is<T: Managed>(&self) -> bool {
        match self {
            Self::Instance(object) => object.is::<T>(),
            _ => false,
        }
    }

    pub fn downcast<T: Managed>(&self) -> Option<Arc<T>> {
        match self {
            Self::Instance(object) => Arc::clone(object).downcast::<T>().ok(),
            _ => None,
        }
    }

    /// Returns true if both values are the same instance, or both are `Null`
    /// or both are `Undefined`.
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) | (Self::Undefined, Self::Undefined) => true,
            (Self::Instance(a), Self::Instance(b)) => {
                std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
            }
            _ => false,
        }
    }

    pub(crate) fn object(&self) -> Option<&Arc<dyn Managed>> {
        match self {
            Self::Instance(object) => Some(object),
            _ => None,
        }
    }

    /// Short description used in error messages.
    pub(crate) fn describe(&self) -> String {
        match self {
            Self::Null => "null".into(),
            Self::Undefined => "undefined".into(),
            Self::Instance(object) => short_type_name((**object).type_name()),
        }
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Null => write!(f, "Null"),
            Self::Undefined => write!(f, "Undefined"),
            Self::Instance(object) => write!(f, "Instance({})", (**object).type_name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Config {
        port: u16,
    }

    #[test]
    fn value_downcast_succeeds() {
        let value = Value::new(Config { port: 80 });

        assert!(value.is::<Config>());
        assert!(!value.is::<u16>());
        assert_eq!(value.downcast::<Config>().unwrap().port, 80);
        assert!(value.downcast::<u16>().is_none());
        assert!(Value::Null.downcast::<Config>().is_none());
    }

    #[test]
    fn value_same_compares_identity() {
        let shared = Arc::new(Config { port: 80 });
        let first = Value::from_arc(Arc::clone(&shared));
        let second = Value::from_arc(shared);

        assert!(first.same(&second));
        assert!(!first.same(&Value::new(Config { port: 80 })));
        assert!(Value::Null.same(&Value::Null));
        assert!(!Value::Null.same(&Value::Undefined));
    }

    #[test]
    fn value_describe_uses_short_type_name() {
        assert_eq!(Value::new(Config { port: 1 }).describe(), "Config");
        assert_eq!(Value::Null.describe(), "null");
        assert_eq!(Value::Undefined.describe(), "undefined");
    }
}
