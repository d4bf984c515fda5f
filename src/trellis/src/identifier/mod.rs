mod registry;

use std::any::{self, Any, TypeId};
use std::fmt::{Debug, Display, Formatter, Result as FmtResult};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// How a supplier-annotated dependency is delivered and which resolution
/// contexts its invocations see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SupplierMode {
    /// A synchronous supplier returns the value directly, an asynchronous one
    /// returns a future.
    pub sync: bool,
    /// A propagating supplier reuses the request context it was created in,
    /// otherwise each invocation opens a fresh request.
    pub propagate_scope: bool,
}

impl SupplierMode {
    pub fn sync() -> Self {
        Self {
            sync: true,
            propagate_scope: false,
        }
    }

    pub fn asynchronous() -> Self {
        Self {
            sync: false,
            propagate_scope: false,
        }
    }

    pub fn propagating(self) -> Self {
        Self {
            propagate_scope: true,
            ..self
        }
    }
}

/// Annotations layered on a base identity. Only `named` takes part in the
/// binding target; the other fields describe how a value is requested.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Annotations {
    pub named: Option<Arc<str>>,
    pub nullable: bool,
    pub undefinable: bool,
    pub supplier: Option<SupplierMode>,
    pub late_binding: bool,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Class {
    pub type_id: TypeId,
    pub type_name: &'static str,
}

#[derive(Debug)]
struct Base {
    serial: u64,
    name: Arc<str>,
    class: Option<Class>,
}

struct Inner {
    base: Arc<Base>,
    annotations: Annotations,
}

/// A canonical token naming something that can be requested from a container.
///
/// Identifiers are interned: deriving the same annotation combination from the
/// same base always returns the same instance, so equality and hashing work on
/// identity rather than structure. Cloning is cheap.
///
/// ```
/// use trellis::identifier::Identifier;
///
/// struct Database;
///
/// let id = Identifier::of::<Database>();
/// assert_eq!(id.nullable(), id.nullable().nullable());
/// assert_eq!(id.nullable().with_nullable(false), id);
/// assert_eq!(id.to_string(), "Database");
/// assert_eq!(id.nullable().late_binding().to_string(), "Database(nullable, late-binding)");
/// ```
#[derive(Clone)]
pub struct Identifier {
    inner: Arc<Inner>,
}

impl Identifier {
    /// Returns the identifier of values of type `T`. Values produced for it
    /// are checked to really be `T`.
    pub fn of<T>() -> Self
    where
        T: Any + Send + Sync,
    {
        registry::class(Class {
            type_id: TypeId::of::<T>(),
            type_name: any::type_name::<T>(),
        })
    }

    /// Creates a fresh identifier which is only equal to itself and its
    /// derivations. The name is only used for display.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        registry::token(name.into())
    }

    pub fn anonymous() -> Self {
        Self::new("trellis-id")
    }

    pub fn named(&self, name: impl Into<Arc<str>>) -> Self {
        self.derive(Annotations {
            named: Some(name.into()),
            ..self.inner.annotations.clone()
        })
    }

    pub fn unnamed(&self) -> Self {
        self.derive(Annotations {
            named: None,
            ..self.inner.annotations.clone()
        })
    }

    pub fn nullable(&self) -> Self {
        self.with_nullable(true)
    }

    pub fn with_nullable(&self, nullable: bool) -> Self {
        self.derive(Annotations {
            nullable,
            ..self.inner.annotations.clone()
        })
    }

    pub fn undefinable(&self) -> Self {
        self.with_undefinable(true)
    }

    pub fn with_undefinable(&self, undefinable: bool) -> Self {
        self.derive(Annotations {
            undefinable,
            ..self.inner.annotations.clone()
        })
    }

    pub fn supplier(&self, mode: SupplierMode) -> Self {
        self.with_supplier(Some(mode))
    }

    pub fn with_supplier(&self, supplier: Option<SupplierMode>) -> Self {
        self.derive(Annotations {
            supplier,
            ..self.inner.annotations.clone()
        })
    }

    pub fn late_binding(&self) -> Self {
        self.with_late_binding(true)
    }

    pub fn with_late_binding(&self, late_binding: bool) -> Self {
        self.derive(Annotations {
            late_binding,
            ..self.inner.annotations.clone()
        })
    }

    /// Returns the binding target: the same base and name with every request
    /// annotation removed.
    pub fn base_id(&self) -> Self {
        self.derive(Annotations {
            named: self.inner.annotations.named.clone(),
            ..Annotations::default()
        })
    }

    /// Returns the form a binding is registered under, keeping nullability
    /// but dropping supplier and late-binding delivery.
    pub fn output_id(&self) -> Self {
        self.derive(Annotations {
            supplier: None,
            late_binding: false,
            ..self.inner.annotations.clone()
        })
    }

    pub fn annotations(&self) -> &Annotations {
        &self.inner.annotations
    }

    pub fn name(&self) -> &str {
        &self.inner.base.name
    }

    /// The full name of the bound type, if the identifier was created by
    /// [`Identifier::of`].
    pub fn type_name(&self) -> Option<&'static str> {
        self.inner.base.class.map(|class| class.type_name)
    }

    pub fn is_nullable(&self) -> bool {
        self.inner.annotations.nullable
    }

    pub fn is_undefinable(&self) -> bool {
        self.inner.annotations.undefinable
    }

    pub fn supplier_mode(&self) -> Option<SupplierMode> {
        self.inner.annotations.supplier
    }

    pub fn is_late_binding(&self) -> bool {
        self.inner.annotations.late_binding
    }

    pub(crate) fn class(&self) -> Option<Class> {
        self.inner.base.class
    }

    fn derive(&self, annotations: Annotations) -> Self {
        if annotations == self.inner.annotations {
            self.clone()
        } else {
            registry::variant(&self.inner.base, annotations)
        }
    }
}

/// Returns every identifier a binding for `output_id` satisfies: the output
/// itself plus its nullable and undefinable relaxations.
pub fn expand_output_id(output_id: &Identifier) -> Vec<Identifier> {
    let output_id = output_id.output_id();
    let nullable = [output_id.is_nullable(), true];
    let undefinable = [output_id.is_undefinable(), true];

    let mut expanded: Vec<Identifier> = Vec::with_capacity(4);
    for nullable in nullable {
        for undefinable in undefinable {
            let id = output_id
                .with_nullable(nullable)
                .with_undefinable(undefinable);
            if !expanded.contains(&id) {
                expanded.push(id);
            }
        }
    }
    expanded
}

impl PartialEq for Identifier {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Identifier {}

impl Hash for Identifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.inner).hash(state);
    }
}

impl Display for Identifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let annotations = &self.inner.annotations;
        let mut texts: Vec<String> = Vec::new();
        if let Some(named) = &annotations.named {
            texts.push(format!("named: {named}"));
        }
        if annotations.nullable {
            texts.push("nullable".into());
        }
        if annotations.undefinable {
            texts.push("undefinable".into());
        }
        if let Some(supplier) = annotations.supplier {
            let sync = if supplier.sync { "sync" } else { "async" };
            if supplier.propagate_scope {
                texts.push(format!("supplier({sync}, propagating)"));
            } else {
                texts.push(format!("supplier({sync})"));
            }
        }
        if annotations.late_binding {
            texts.push("late-binding".into());
        }

        write!(f, "{}", self.inner.base.name)?;
        if !texts.is_empty() {
            write!(f, "({})", texts.join(", "))?;
        }
        Ok(())
    }
}

impl Debug for Identifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "Identifier({self}#{})", self.inner.base.serial)
    }
}
