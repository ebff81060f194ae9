//! Bookshelf Common Library
//!
//! Shared code for the Bookshelf services including:
//! - Database models, storage ports and their backends
//! - Cache backends and key builders
//! - Error types and handling
//! - Configuration management
//! - Request identity extraction
//! - Metrics and tracing setup

pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod errors;
pub mod metrics;
pub mod telemetry;

// Re-export commonly used types
pub use cache::{Cache, CacheBackend, MemoryCache};
pub use config::AppConfig;
pub use db::{DbPool, MemoryStore, Repository};
pub use errors::{AppError, Result};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
