use thiserror::Error;

/// Error kinds from the error handling design (spec §7).
///
/// `NotFound` is intentionally absent here — per §7 it is represented as
/// `Option::None` at call sites, not as a propagated error.
#[derive(Debug, Error)]
pub enum SpecMemError {
    /// Bad input: empty query, non-positive limit, unknown memory type.
    /// Never retried, surfaced to the caller verbatim.
    #[error("validation: {0}")]
    Validation(String),

    /// Vector length didn't match the target column and neither re-embed
    /// nor projection could reconcile it.
    #[error("dimension mismatch for {table}.{column}: have {actual}, want {expected}")]
    DimensionMismatch {
        table: String,
        column: String,
        expected: usize,
        actual: usize,
    },

    /// No target column dimension and no prior vectors to infer one from.
    #[error("dimension unknown for {table}.{column}")]
    DimensionUnknown { table: String, column: String },

    /// Socket timeout, DB connection lost, HTTP 5xx/429. Caller should have
    /// already retried with backoff before this surfaces; once it does, the
    /// caller degrades (queue, fallback scoring, empty enrichment).
    #[error("transient backend failure: {0}")]
    TransientBackend(String),

    /// Queue or registry is full. Caller-visible, not retried internally.
    #[error("capacity exceeded: {0}")]
    Capacity(String),

    /// Database unavailable during a mandatory fetch. Propagated to the
    /// caller — there is no degraded response to fall back to.
    #[error("fatal: {0}")]
    Fatal(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl SpecMemError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::TransientBackend(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, SpecMemError>;
