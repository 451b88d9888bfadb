//! Configuration loading and query engine bootstrap.

pub mod bootstrap;
pub mod config;
pub mod error;

pub use bootstrap::{EngineStats, QueryEngine};
pub use config::Config;
pub use error::CoreError;
