#![allow(clippy::new_without_default)]

pub mod binding;
pub mod container;
pub mod identifier;
pub mod module;
pub mod provider;
pub mod scope;
mod util;

pub mod prelude {
    pub use crate::binding::Binding;
    pub use crate::container::{
        AsyncContainer, Container, Injected, LateBinding, ResolveError, SyncContainer, Value,
    };
    pub use crate::identifier::{Identifier, SupplierMode};
    pub use crate::module::{Factory, FactoryError, Module, ModuleError};
    pub use crate::provider::{Dependencies, Provider};
    pub use crate::scope::Scope;
}
