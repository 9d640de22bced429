//! Rate-limit-aware access to the GitHub REST API.
//!
//! This crate provides:
//! - [`Transport`], the raw request capability, with a reqwest-backed
//!   [`GithubTransport`]
//! - [`Budget`], the server-advertised call allowance
//! - [`RateLimitedClient`], which every outbound call goes through: it waits
//!   out an exhausted budget, backs off on throttling and transient failures,
//!   and classifies what it cannot recover from

pub mod budget;
pub mod client;
pub mod error;
pub mod github;
pub mod transport;

pub use budget::Budget;
pub use client::RateLimitedClient;
pub use error::{AccessError, TransportError};
pub use github::GithubTransport;
pub use transport::{ApiRequest, ApiResponse, RateInfo, Transport};
