//! Scan orchestration.
//!
//! [`ScanLoop`] pulls unvisited repositories from the sampler, runs the
//! [`Analyzer`] on each, hands findings to the reporter and drains all
//! reporting work before it returns.

pub mod analyzer;
pub mod orchestrator;

pub use analyzer::{AnalysisError, Analyzer, CommandAnalyzer};
pub use orchestrator::{LoopState, ScanLoop, ScanSummary, StopReason};
