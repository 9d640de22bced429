//! Finding reporting.
//!
//! This crate provides:
//! - `ReportSink` trait for pluggable report destinations
//! - `GithubIssueSink`, filing one issue per finding, and `DryRunSink`
//! - `IssueReporter`, which deduplicates findings against everything
//!   already reported and files the rest in the background

pub mod github_issue;
pub mod reporter;
pub mod traits;

pub use github_issue::{DryRunSink, GithubIssueSink};
pub use reporter::{IssueReporter, ReportedRecord, ReporterStats, Submission};
pub use traits::{NotifyError, Report, ReportSink};
