//! Error types for the projection engine.

use thiserror::Error;

/// Errors that can occur during projection view operations.
///
/// All errors are surfaced synchronously to the caller; the engine never
/// recovers from them internally.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ViewError {
    /// A mutating method was called on the read-only projection façade.
    ///
    /// The source collection is the single source of truth; mutate it
    /// instead and let the projection follow.
    #[error("the projection is read-only; mutate the source collection instead")]
    ReadOnly,

    /// A view was constructed without a source collection.
    #[error("a source collection is required")]
    MissingSource,

    /// The source does not satisfy the enumeration contract.
    #[error("source does not satisfy the enumeration contract: {0}")]
    BadSource(String),

    /// Uniqueness or uid extraction was requested, but neither an id
    /// property nor a record identity is available.
    #[error("no id property is configured and the record exposes no identity")]
    MissingIdProperty,

    /// An operation was attempted on a destroyed view.
    #[error("the view has been destroyed")]
    Destroyed,
}

/// Result type for projection view operations.
pub type ViewResult<T> = Result<T, ViewError>;
