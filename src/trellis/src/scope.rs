use std::fmt::{Display, Formatter, Result as FmtResult};

/// A cache policy applied when a binding is resolved.
///
/// A [`Scope`] decides two things: which resolution context (if any) keeps
/// the produced value, given by [`Scope::lifetime`], and whether the value is
/// produced eagerly, given by [`Scope::is_optimistic`].
///
/// | Scope                  | Cached in                 | Eager                          |
/// |------------------------|---------------------------|--------------------------------|
/// | `Transient`            | nothing                   | no                             |
/// | `Singleton`            | the container             | no                             |
/// | `OptimisticSingleton`  | the container             | on preload or first request    |
/// | `Request`              | the current request       | no                             |
/// | `OptimisticRequest`    | the current request       | when the request opens         |
/// | `Supplier`             | the current supplier call | no                             |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Scope {
    #[default]
    Transient,
    Singleton,
    OptimisticSingleton,
    Request,
    OptimisticRequest,
    Supplier,
}

impl Scope {
    pub fn lifetime(self) -> Lifetime {
        match self {
            Self::Transient => Lifetime::Transient,
            Self::Singleton | Self::OptimisticSingleton => Lifetime::Container,
            Self::Request | Self::OptimisticRequest => Lifetime::Request,
            Self::Supplier => Lifetime::Supplier,
        }
    }

    pub fn is_optimistic(self) -> bool {
        matches!(self, Self::OptimisticSingleton | Self::OptimisticRequest)
    }

    pub fn to_str(&self) -> &'static str {
        match self {
            Self::Transient => "Transient",
            Self::Singleton => "Singleton",
            Self::OptimisticSingleton => "OptimisticSingleton",
            Self::Request => "Request",
            Self::OptimisticRequest => "OptimisticRequest",
            Self::Supplier => "Supplier",
        }
    }
}

impl Display for Scope {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.to_str())
    }
}

/// The resolution context a scoped value is stored in.
///
/// Contexts nest: the container outlives every request, and a request
/// outlives the supplier calls made within it. The outermost request of a
/// `get` also serves as its supplier context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifetime {
    Transient,
    Container,
    Request,
    Supplier,
}

impl Display for Lifetime {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Transient => write!(f, "Transient"),
            Self::Container => write!(f, "Container"),
            Self::Request => write!(f, "Request"),
            Self::Supplier => write!(f, "Supplier"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_lifetime_succeeds() {
        assert_eq!(Scope::Transient.lifetime(), Lifetime::Transient);
        assert_eq!(Scope::Singleton.lifetime(), Lifetime::Container);
        assert_eq!(Scope::OptimisticSingleton.lifetime(), Lifetime::Container);
        assert_eq!(Scope::Request.lifetime(), Lifetime::Request);
        assert_eq!(Scope::OptimisticRequest.lifetime(), Lifetime::Request);
        assert_eq!(Scope::Supplier.lifetime(), Lifetime::Supplier);
    }

    #[test]
    fn scope_is_optimistic_succeeds() {
        assert!(Scope::OptimisticSingleton.is_optimistic());
        assert!(Scope::OptimisticRequest.is_optimistic());
        assert!(!Scope::Singleton.is_optimistic());
        assert!(!Scope::Request.is_optimistic());
        assert_eq!(Scope::default(), Scope::Transient);
    }
}
