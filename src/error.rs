use miette::Diagnostic;
use thiserror::Error;

/// Errors produced by the engine.
///
/// Backing I/O and codec decoders never retry: a failed metadata write may
/// leave the image in an intermediate state (e.g. a refcount block written
/// but its parent pointer not yet updated) and is always reported fatal.
#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    /// A decode failure or an internal invariant violation.
    #[error("{0}")]
    Unknown(String),

    /// An on-disk feature this core deliberately does not implement.
    #[error("unsupported: {0}")]
    #[diagnostic(help(
        "this engine implements only the QCOW2 v2 core path; compressed clusters, \
         encryption, snapshots, backing files, and refcount table growth beyond one \
         cluster are out of scope"
    ))]
    Unsupported(String),

    /// The engine (or its cache) was used after `disconnect`.
    #[error("engine is disconnected")]
    #[diagnostic(help("this handle is no longer usable; reconnect to the backing device"))]
    Disconnected,

    /// An opaque error surfaced by the backing device.
    #[error("backing device error: {0}")]
    Backing(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl EngineError {
    /// Wraps a scenario the design treats as impossible by construction
    /// (e.g. an allocating `walk` returning `None`).
    pub(crate) fn internal(context: impl Into<String>) -> Self {
        EngineError::Unknown(format!("internal: {}", context.into()))
    }

    /// Wraps an opaque backing-device error.
    pub(crate) fn backing<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        EngineError::Backing(Box::new(source))
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EngineError>;
