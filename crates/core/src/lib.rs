pub mod config;
pub mod error;
pub mod model;
pub mod store;

pub use config::{Config, RateLimitConfig, StopPolicy};
pub use error::*;
pub use model::*;
pub use store::JsonlStore;
