//! Typed errors shared by embedding backends and vector indexes.
//!
//! Provider errors are classified so the ingestion pipeline can tell rate
//! limiting apart from other failures when it logs a retry.

use thiserror::Error;

/// Failure returned by an [`Embedder`](crate::embedding::Embedder).
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider signalled throttling (HTTP 429 or equivalent).
    #[error("rate limited by embedding provider: {0}")]
    RateLimited(String),

    /// Network failure or server-side error; worth retrying.
    #[error("transient embedding provider error: {0}")]
    Transient(String),

    /// Client-side error the provider will keep rejecting.
    #[error("embedding provider rejected request: {0}")]
    Fatal(String),

    /// The response could not be decoded into vectors.
    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),

    #[error("embedding provider is disabled")]
    Disabled,
}

impl ProviderError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, ProviderError::RateLimited(_))
    }
}

/// Failure raised by a [`VectorIndex`](crate::store::VectorIndex) on write.
#[derive(Debug, Error)]
pub enum IndexError {
    /// A chunk's embedding length differs from the vectors already stored.
    ///
    /// Mixing dimensionalities (e.g. after switching provider) would make
    /// every similarity comparison meaningless, so the write is refused.
    #[error("embedding dimension mismatch: index holds {expected}-d vectors, got {actual}-d")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("chunk from {0} has an empty embedding")]
    EmptyEmbedding(String),
}
