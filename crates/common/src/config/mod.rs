//! Configuration management for Bookshelf services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default, config/{APP_ENV}, config/local)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Redis configuration
    pub redis: RedisConfig,

    /// Cache coherency policy
    #[serde(default)]
    pub cache: CachePolicyConfig,

    /// Book lifecycle settings
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Observability configuration
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Primary database URL (for writes)
    pub url: String,

    /// Read replica URL (optional, falls back to primary)
    pub read_url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Run pending migrations on startup
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisConfig {
    /// Redis URL
    pub url: String,

    /// Key prefix for namespacing
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

/// How derived views and warm entries are maintained after a mutation.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CachePolicyConfig {
    /// Refresh materialized views on a spawned task instead of inline
    #[serde(default = "default_true")]
    pub refresh_in_background: bool,

    /// Pre-populate the owner's hot keys after invalidation
    #[serde(default = "default_true")]
    pub warm_after_invalidate: bool,

    /// TTL for warmed entries in seconds
    #[serde(default = "default_warm_ttl")]
    pub warm_ttl_secs: u64,

    /// Number of books kept in the warmed recent-books list
    #[serde(default = "default_recent_books_limit")]
    pub recent_books_limit: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CatalogConfig {
    /// Invalidate the owner's cache after a book is created
    #[serde(default = "default_true")]
    pub invalidate_on_create: bool,

    /// Retries for a tag insert that loses a race to a concurrent creator
    #[serde(default = "default_tag_insert_retries")]
    pub tag_insert_retries: u32,

    /// Initial backoff between tag insert attempts in milliseconds
    #[serde(default = "default_tag_retry_backoff")]
    pub tag_retry_backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 30 }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_run_migrations() -> bool { true }
fn default_key_prefix() -> String { "bookshelf".to_string() }
fn default_true() -> bool { true }
fn default_warm_ttl() -> u64 { 600 }
fn default_recent_books_limit() -> u64 { 10 }
fn default_tag_insert_retries() -> u32 { 3 }
fn default_tag_retry_backoff() -> u64 { 25 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "bookshelf".to_string() }

impl Default for CachePolicyConfig {
    fn default() -> Self {
        Self {
            refresh_in_background: true,
            warm_after_invalidate: true,
            warm_ttl_secs: default_warm_ttl(),
            recent_books_limit: default_recent_books_limit(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            invalidate_on_create: true,
            tag_insert_retries: default_tag_insert_retries(),
            tag_retry_backoff_ms: default_tag_retry_backoff(),
        }
    }
}

impl CatalogConfig {
    /// Initial delay between tag insert attempts
    pub fn tag_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.tag_retry_backoff_ms)
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with defaults
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?

            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__DATABASE__URL=postgres://...
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: default_host(),
                port: default_port(),
                request_timeout_secs: default_request_timeout(),
            },
            database: DatabaseConfig {
                url: "postgres://localhost/bookshelf".to_string(),
                read_url: None,
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                connect_timeout_secs: default_connect_timeout(),
                idle_timeout_secs: default_idle_timeout(),
                run_migrations: default_run_migrations(),
            },
            redis: RedisConfig {
                url: "redis://localhost:6379".to_string(),
                key_prefix: default_key_prefix(),
            },
            cache: CachePolicyConfig::default(),
            catalog: CatalogConfig::default(),
            observability: ObservabilityConfig {
                log_level: default_log_level(),
                json_logging: default_json_logging(),
                metrics_port: default_metrics_port(),
                service_name: default_service_name(),
            },
        }
    }
}
