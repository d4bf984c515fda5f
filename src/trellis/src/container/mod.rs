pub mod error;

mod context;
mod core;
mod graph;
mod handle;
mod supplier;
mod value;

pub use error::{ErrorKind, ResolveError, UnsafeSupplier};
pub use handle::{add_bound_instances, create_container, AsyncContainer, Container, SyncContainer};
pub use supplier::{AsyncSupplier, Injected, LateBinding, Supplier};
pub use value::{Managed, Value};

pub(crate) use handle::from_bindings;
