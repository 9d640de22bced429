//! Sampler error types.

use thiserror::Error;
use vetbot_core::{RepoId, StoreError};

#[derive(Debug, Error)]
pub enum SamplerError {
    #[error("failed to read backlog: {0}")]
    Backlog(#[source] StoreError),

    #[error("visited set error: {0}")]
    Visited(#[source] StoreError),
}

/// Why [`crate::RepositorySampler::sample`] stopped early.
#[derive(Debug, Error)]
pub enum SampleError<E> {
    /// The per-item function failed. The item has already been marked
    /// visited unless the function asked otherwise.
    #[error("processing {repo} failed: {source}")]
    Item {
        repo: RepoId,
        #[source]
        source: E,
    },

    #[error(transparent)]
    Sampler(#[from] SamplerError),
}
