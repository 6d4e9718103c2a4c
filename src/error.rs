//! Error kinds surfaced by the engine.
//!
//! Every fallible path in this crate returns `anyhow::Result<T>` so callers can
//! use `?` freely and attach context with [`anyhow::Context`]. When a failure
//! needs to be distinguished programmatically (for example, a caller that
//! wants to special-case a [`EngineError::WorkerFailure`] and retry at a
//! higher level), the original [`EngineError`] is preserved in the error chain
//! and can be recovered with `err.downcast_ref::<EngineError>()`.
//!
//! `EngineError` is a plain enum with a hand-written `Display`/`Error` impl,
//! not a `thiserror` derive.

use std::fmt;

/// The distinct error kinds named by the engine's failure semantics.
#[derive(Debug, Clone)]
pub enum EngineError {
    /// Mutually exclusive options both set, a splitter names an unknown
    /// parameter, or a function signature uses positional-only parameters.
    Configuration(String),

    /// A partition generator yielded an `actual_size` greater than requested,
    /// a non-positive size, or failed to terminate with remaining input.
    InvalidPartition(String),

    /// A splitter-specific precondition was violated (empty input, mismatched
    /// row counts across co-partitioned arguments, ...).
    InvalidInput(String),

    /// No backend is configured. Recovered automatically by the controller,
    /// which runs the function sequentially; this variant exists so the
    /// recovery path can still be observed/logged by callers who inspect the
    /// warning, and so tests can assert on the exact condition.
    BackendUnavailable,

    /// A worker task failed. `partition_index` locates which partition raised
    /// it; `source` is the formatted original error.
    WorkerFailure {
        partition_index: usize,
        source: String,
    },

    /// The invocation was aborted externally (for example, a session close
    /// requested mid-flight) before it could produce a result.
    Cancelled,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(msg) => write!(f, "configuration error: {msg}"),
            Self::InvalidPartition(msg) => write!(f, "invalid partition: {msg}"),
            Self::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            Self::BackendUnavailable => write!(f, "no parallel backend engine set"),
            Self::WorkerFailure {
                partition_index,
                source,
            } => write!(f, "worker task failed on partition {partition_index}: {source}"),
            Self::Cancelled => write!(f, "invocation was cancelled"),
        }
    }
}

impl std::error::Error for EngineError {}
