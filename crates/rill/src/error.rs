//! Error kinds shared across the crate.

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong when driving the reactive graph.
///
/// Synchronous API errors surface immediately to the caller and leave no
/// partial state behind. [`Error::ResolverFailure`] is the one asynchronous
/// kind: it is caught inside the sync worker, logged once, and quarantines
/// the owning engine until it is manually re-enabled.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Caller tried to mutate a derived collection.
    #[error("derived collection is read-only")]
    ReadonlyAccess,

    /// Caller tried to mutate a container whose reactivity has been
    /// turned off.
    #[error("reactivity is disabled for this container")]
    ReactivityDisabled,

    /// Attempt to register the same source twice in a combinator, or the
    /// same dependency name twice in a projection engine.
    #[error("source is already registered")]
    DuplicateSource,

    /// A projection dependency resolved to neither the declared kind nor
    /// the declared element type.
    #[error("dependency `{name}` is not wired as the requested kind")]
    InvalidDependencyKind {
        /// Name the dependency was registered under.
        name: String,
    },

    /// A cell delta buffer was asked to commit with no pending change.
    #[error("no pending change to commit")]
    CommitWithoutPending,

    /// Extraction or commit was called on a detached delta buffer.
    #[error("delta buffer is disabled")]
    BufferDisabled,

    /// A resolver returned an error or its future was rejected.
    #[error("resolver `{name}` failed: {message}")]
    ResolverFailure {
        /// Name of the dependency whose resolver failed.
        name: String,
        /// Stringified resolver error.
        message: String,
    },
}
