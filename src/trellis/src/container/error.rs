use std::error::Error;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::slice;
use std::sync::Arc;

use snafu::prelude::*;

use crate::identifier::Identifier;

/// Broad classification of a [`ResolveError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The binding graph can never be resolved. Found by `wire()`/`check()`.
    Validation,
    /// A provider answered with a value its output does not allow.
    Response,
    /// A provider failed on its own.
    Upstream,
    /// Several independent branches failed.
    Aggregate,
    /// The resolution itself could not proceed.
    Resolution,
}

#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum ResolveError {
    #[snafu(display("Providers missing for container: {}", SortedIds::new(ids)))]
    #[non_exhaustive]
    ProviderMissing { ids: Vec<Identifier> },
    #[snafu(display(
        "Circular dependencies detected in container: {}",
        ChainsDisplayer::new(chains)
    ))]
    #[non_exhaustive]
    CircularDependency { chains: Vec<Vec<Identifier>> },
    #[snafu(display(
        "Binding has dependency on syncronous supplier that must be async: {}",
        SuppliersDisplayer::new(suppliers)
    ))]
    #[non_exhaustive]
    SyncSupplier { suppliers: Vec<UnsafeSupplier> },
    #[snafu(display("Null value returned for non-nullable provider: {output_id}"))]
    #[non_exhaustive]
    NullResponse { output_id: Identifier },
    #[snafu(display("Undefined value returned for non-undefinable provider: {output_id}"))]
    #[non_exhaustive]
    UndefinedResponse { output_id: Identifier },
    #[snafu(display(
        "Value {value} returned by provider is not instance of class: {output_id}"
    ))]
    #[non_exhaustive]
    InstanceOfResponse { output_id: Identifier, value: String },
    #[snafu(display("{source}"))]
    #[non_exhaustive]
    Provider {
        output_id: Identifier,
        source: Arc<dyn Error + Send + Sync>,
    },
    #[snafu(display("Multiple errors: [{}]", CausesDisplayer::new(causes)))]
    #[non_exhaustive]
    Multi { causes: Vec<ResolveError> },
    #[snafu(display("could not construct {id} which depends on itself somehow"))]
    #[non_exhaustive]
    CyclicResolution { id: Identifier },
    #[snafu(display("could not resolve {id} synchronously since its provider is asynchronous"))]
    #[non_exhaustive]
    AsyncInSyncResolution { id: Identifier },
    #[snafu(display("late binding {id} is not resolved yet"))]
    #[non_exhaustive]
    LatePending { id: Identifier },
}

impl ResolveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ProviderMissing { .. }
            | Self::CircularDependency { .. }
            | Self::SyncSupplier { .. } => ErrorKind::Validation,
            Self::NullResponse { .. }
            | Self::UndefinedResponse { .. }
            | Self::InstanceOfResponse { .. } => ErrorKind::Response,
            Self::Provider { .. } => ErrorKind::Upstream,
            Self::Multi { .. } => ErrorKind::Aggregate,
            Self::CyclicResolution { .. }
            | Self::AsyncInSyncResolution { .. }
            | Self::LatePending { .. } => ErrorKind::Resolution,
        }
    }

    /// Returns the individual failures: the causes of a multi-error, or the
    /// error itself.
    pub fn causes(&self) -> &[ResolveError] {
        match self {
            Self::Multi { causes } => causes,
            other => slice::from_ref(other),
        }
    }

    /// Returns the error raised by a user provider, if this is one.
    pub fn upstream(&self) -> Option<&(dyn Error + Send + Sync + 'static)> {
        match self {
            Self::Provider { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }

    pub(crate) fn upstream_of(output_id: &Identifier, source: Box<dyn Error + Send + Sync>) -> Self {
        Self::Provider {
            output_id: output_id.clone(),
            source: Arc::from(source),
        }
    }

    /// Folds failures of independent branches. A single failure is returned
    /// as is, several become one flattened [`ResolveError::Multi`].
    pub(crate) fn aggregate(mut errors: Vec<ResolveError>) -> Result<(), ResolveError> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => {
                let causes: Vec<ResolveError> = errors
                    .into_iter()
                    .flat_map(|err| match err {
                        Self::Multi { causes } => causes,
                        other => vec![other],
                    })
                    .collect();
                MultiSnafu { causes }.fail()
            }
        }
    }
}

/// A binding whose synchronous supplier dependency would need asynchronous
/// work to produce a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsafeSupplier {
    pub output_id: Identifier,
    pub supplier_id: Identifier,
}

impl Display for UnsafeSupplier {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(
            f,
            "[output id: {}, dependency supplier id: {}]",
            self.output_id, self.supplier_id
        )
    }
}

pub(crate) struct SortedIds<'a> {
    ids: &'a [Identifier],
}

impl<'a> SortedIds<'a> {
    pub(crate) fn new(ids: &'a [Identifier]) -> Self {
        Self { ids }
    }
}

impl Display for SortedIds<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let mut texts: Vec<String> = self.ids.iter().map(ToString::to_string).collect();
        texts.sort();
        write!(f, "{}", texts.join(", "))
    }
}

struct ChainsDisplayer<'a> {
    chains: &'a [Vec<Identifier>],
}

impl<'a> ChainsDisplayer<'a> {
    fn new(chains: &'a [Vec<Identifier>]) -> Self {
        Self { chains }
    }
}

impl Display for ChainsDisplayer<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        for (i, chain) in self.chains.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", render_chain(chain))?;
        }
        Ok(())
    }
}

pub(crate) fn render_chain(chain: &[Identifier]) -> String {
    chain
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("->")
}

struct SuppliersDisplayer<'a> {
    suppliers: &'a [UnsafeSupplier],
}

impl<'a> SuppliersDisplayer<'a> {
    fn new(suppliers: &'a [UnsafeSupplier]) -> Self {
        Self { suppliers }
    }
}

impl Display for SuppliersDisplayer<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let mut texts: Vec<String> = self.suppliers.iter().map(ToString::to_string).collect();
        texts.sort();
        write!(f, "{}", texts.join(", "))
    }
}

struct CausesDisplayer<'a> {
    causes: &'a [ResolveError],
}

impl<'a> CausesDisplayer<'a> {
    fn new(causes: &'a [ResolveError]) -> Self {
        Self { causes }
    }
}

impl Display for CausesDisplayer<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        for (i, cause) in self.causes.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{cause}")?;
        }
        Ok(())
    }
}
