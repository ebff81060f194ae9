//! Redis cache integration
//!
//! Provides:
//! - The `CacheBackend` port used by cache coherency logic
//! - Redis implementation with TTL writes and prefix invalidation
//! - In-memory implementation for tests
//! - Cache key builders for book and user views

use crate::config::RedisConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// Key/value cache with prefix invalidation
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn set_raw(&self, key: &str, value: String, ttl_secs: u64) -> Result<()>;

    /// Delete a single key. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Delete every key starting with `prefix`. Returns the number deleted.
    async fn delete_prefix(&self, prefix: &str) -> Result<u64>;
}

/// Redis cache client
pub struct Cache {
    connection: RwLock<MultiplexedConnection>,
    key_prefix: String,
}

impl Cache {
    /// Create a new cache client
    pub async fn new(config: &RedisConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to create Redis client: {}", e),
            })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to connect to Redis: {}", e),
            })?;

        Ok(Self {
            connection: RwLock::new(connection),
            key_prefix: config.key_prefix.clone(),
        })
    }

    /// Build a prefixed key
    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }

    /// Ping Redis to check connectivity
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.write().await;
        redis::cmd("PING")
            .query_async::<String>(&mut *conn)
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Redis ping failed: {}", e),
            })?;
        Ok(())
    }
}

#[async_trait]
impl CacheBackend for Cache {
    async fn set_raw(&self, key: &str, value: String, ttl_secs: u64) -> Result<()> {
        let full_key = self.key(key);
        let mut conn = self.connection.write().await;

        conn.set_ex::<_, _, ()>(&full_key, value, ttl_secs)
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to set key '{}': {}", full_key, e),
            })?;

        debug!(key = %full_key, ttl_secs, "Cache set");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let full_key = self.key(key);
        let mut conn = self.connection.write().await;

        let deleted: i32 = conn.del(&full_key).await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to delete key '{}': {}", full_key, e),
            })?;

        debug!(key = %full_key, deleted = deleted > 0, "Cache delete");
        Ok(deleted > 0)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        let pattern = format!("{}*", self.key(prefix));
        let mut conn = self.connection.write().await;

        // SCAN rather than KEYS so a large keyspace does not block Redis
        let mut keys: Vec<String> = Vec::new();
        {
            let mut iter = conn
                .scan_match::<_, String>(&pattern)
                .await
                .map_err(|e| AppError::CacheError {
                    message: format!("Failed to scan '{}': {}", pattern, e),
                })?;
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
        }

        if keys.is_empty() {
            return Ok(0);
        }

        let deleted: u64 = conn.del(&keys).await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to delete keys for '{}': {}", pattern, e),
            })?;

        debug!(pattern = %pattern, deleted, "Cache prefix delete");
        Ok(deleted)
    }
}

/// In-memory cache backend
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, String>>,
    fail: AtomicBool,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail, as if the cache were unreachable
    pub fn fail_all(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.entries.lock().await.contains_key(key)
    }

    /// Raw stored value of a key
    pub async fn value(&self, key: &str) -> Option<String> {
        self.entries.lock().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    fn check(&self) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::CacheError {
                message: "cache unreachable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn set_raw(&self, key: &str, value: String, _ttl_secs: u64) -> Result<()> {
        self.check()?;
        self.entries.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.check()?;
        Ok(self.entries.lock().await.remove(key).is_some())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok((before - entries.len()) as u64)
    }
}

/// Cache key builder helpers
pub mod keys {
    use uuid::Uuid;

    /// Prefix of every search result key, invalidated wholesale
    pub const SEARCH_PREFIX: &str = "search:";

    pub fn book_detail(book_id: Uuid) -> String {
        format!("book:{}:detail", book_id)
    }

    pub fn book_notes(book_id: Uuid) -> String {
        format!("book:{}:notes", book_id)
    }

    pub fn book_ratings(book_id: Uuid) -> String {
        format!("book:{}:ratings", book_id)
    }

    pub fn book_tags(book_id: Uuid) -> String {
        format!("book:{}:tags", book_id)
    }

    pub fn user_books(user_id: Uuid) -> String {
        format!("user:{}:books", user_id)
    }

    pub fn user_stats(user_id: Uuid) -> String {
        format!("user:{}:stats", user_id)
    }

    pub fn user_recent_books(user_id: Uuid) -> String {
        format!("user:{}:recent_books", user_id)
    }

    /// Prefix covering every key of a user
    pub fn user_prefix(user_id: Uuid) -> String {
        format!("user:{}:", user_id)
    }

    /// Every per-book key
    pub fn book_keys(book_id: Uuid) -> [String; 4] {
        [
            book_detail(book_id),
            book_notes(book_id),
            book_ratings(book_id),
            book_tags(book_id),
        ]
    }

    /// Per-user keys touched by a change to one of the user's books
    pub fn user_keys(user_id: Uuid) -> [String; 3] {
        [
            user_books(user_id),
            user_stats(user_id),
            user_recent_books(user_id),
        ]
    }
}
