//! Resumable backlog sampling.
//!
//! [`RepositorySampler`] yields backlog items that have not been visited
//! yet, in backlog order, and records each visit durably so a restarted
//! process picks up exactly where the previous one stopped.

pub mod error;
pub mod sampler;

pub use error::{SampleError, SamplerError};
pub use sampler::{ItemError, RepositorySampler, SampleSummary, VisitOutcome, VisitedRecord};
