//! Cache coherency after mutations
//!
//! Everything here is best-effort. Failures are logged, counted and
//! reported through `CacheOutcome`, never returned as errors: a stale cache
//! heals itself on TTL, a failed mutation does not.

use crate::dto::{BookSummary, CacheOutcome, ViewRefresh};
use bookshelf_common::cache::{keys, CacheBackend};
use bookshelf_common::config::CachePolicyConfig;
use bookshelf_common::db::ports::{BookStore, DerivedView, DerivedViews, TagStore};
use bookshelf_common::errors::Result;
use bookshelf_common::metrics;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

pub struct CacheService {
    cache: Arc<dyn CacheBackend>,
    books: Arc<dyn BookStore>,
    tags: Arc<dyn TagStore>,
    views: Arc<dyn DerivedViews>,
    policy: CachePolicyConfig,
}

impl CacheService {
    pub fn new(
        cache: Arc<dyn CacheBackend>,
        books: Arc<dyn BookStore>,
        tags: Arc<dyn TagStore>,
        views: Arc<dyn DerivedViews>,
        policy: CachePolicyConfig,
    ) -> Self {
        Self {
            cache,
            books,
            tags,
            views,
            policy,
        }
    }

    /// Drop every key derived from one book and its owner, then recompute
    /// the derived views.
    #[instrument(skip(self), fields(book_id = %book_id, user_id = %user_id))]
    pub async fn invalidate_book(&self, book_id: Uuid, user_id: Uuid) -> CacheOutcome {
        let mut outcome = CacheOutcome::default();

        for key in keys::book_keys(book_id).iter().chain(keys::user_keys(user_id).iter()) {
            match self.cache.delete(key).await {
                Ok(true) => outcome.keys_invalidated += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(key = %key, error = %e, "Cache key invalidation failed");
                    outcome.record_failure(format!("delete {}", key));
                }
            }
        }

        self.delete_prefix(keys::SEARCH_PREFIX, &mut outcome).await;

        outcome.views = self.refresh_views().await;
        self.finish("book", outcome)
    }

    /// Drop every key of a user, then recompute the derived views
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn invalidate_user_cache(&self, user_id: Uuid) -> CacheOutcome {
        let mut outcome = CacheOutcome::default();

        self.delete_prefix(&keys::user_prefix(user_id), &mut outcome).await;
        self.delete_prefix(keys::SEARCH_PREFIX, &mut outcome).await;

        outcome.views = self.refresh_views().await;
        self.finish("user", outcome)
    }

    /// Pre-populate the user's hot keys, and the book's reader-independent
    /// summary when the book still exists.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn warm_cache(&self, user_id: Uuid, book_id: Option<Uuid>) -> CacheOutcome {
        let mut outcome = CacheOutcome::default();

        let recent = self.books.recent_books(user_id, self.policy.recent_books_limit).await;
        self.warm_key(&keys::user_recent_books(user_id), recent, &mut outcome).await;

        let stats = self.books.reading_stats(user_id).await;
        self.warm_key(&keys::user_stats(user_id), stats, &mut outcome).await;

        if let Some(book_id) = book_id {
            match self.books.find_book(book_id).await {
                Ok(Some(book)) => {
                    let summary = self
                        .tags
                        .tags_for_book(book_id)
                        .await
                        .map(|tags| BookSummary { book, tags });
                    self.warm_key(&keys::book_detail(book_id), summary, &mut outcome).await
                }
                Ok(None) => debug!(book_id = %book_id, "Book gone, detail not warmed"),
                Err(e) => {
                    warn!(book_id = %book_id, error = %e, "Loading book for warm failed");
                    outcome.record_failure(format!("load {}", book_id));
                }
            }
        }

        self.finish("warm", outcome)
    }

    /// Invalidate after a mutation of one book and warm per policy
    pub async fn after_mutation(&self, book_id: Uuid, user_id: Uuid) -> CacheOutcome {
        let outcome = self.invalidate_book(book_id, user_id).await;
        if !self.policy.warm_after_invalidate {
            return outcome;
        }
        outcome.merge(self.warm_cache(user_id, Some(book_id)).await)
    }

    async fn delete_prefix(&self, prefix: &str, outcome: &mut CacheOutcome) {
        match self.cache.delete_prefix(prefix).await {
            Ok(deleted) => outcome.keys_invalidated += deleted,
            Err(e) => {
                warn!(prefix = %prefix, error = %e, "Cache prefix invalidation failed");
                outcome.record_failure(format!("delete prefix {}", prefix));
            }
        }
    }

    async fn warm_key<T: Serialize>(&self, key: &str, value: Result<T>, outcome: &mut CacheOutcome) {
        let written = match value.and_then(|v| Ok(serde_json::to_string(&v)?)) {
            Ok(json) => self.cache.set_raw(key, json, self.policy.warm_ttl_secs).await,
            Err(e) => Err(e),
        };

        match written {
            Ok(()) => outcome.keys_warmed += 1,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache warm failed");
                outcome.record_failure(format!("warm {}", key));
            }
        }
    }

    async fn refresh_views(&self) -> ViewRefresh {
        if self.policy.refresh_in_background {
            let views = Arc::clone(&self.views);
            tokio::spawn(async move {
                if refresh_all(views.as_ref()).await == ViewRefresh::Failed {
                    metrics::record_cache_invalidation("views", false);
                }
            });
            return ViewRefresh::Scheduled;
        }

        refresh_all(self.views.as_ref()).await
    }

    fn finish(&self, scope: &str, outcome: CacheOutcome) -> CacheOutcome {
        metrics::record_cache_invalidation(scope, !outcome.is_degraded());
        if outcome.is_degraded() {
            warn!(scope, failures = ?outcome.failures, "Cache pass degraded");
        } else {
            debug!(
                scope,
                keys_invalidated = outcome.keys_invalidated,
                keys_warmed = outcome.keys_warmed,
                "Cache pass complete"
            );
        }
        outcome
    }
}

async fn refresh_all(views: &dyn DerivedViews) -> ViewRefresh {
    let mut result = ViewRefresh::Refreshed;
    for view in DerivedView::ALL {
        if let Err(e) = views.refresh_view(view).await {
            warn!(view = view.view_name(), error = %e, "Derived view refresh failed");
            result = ViewRefresh::Failed;
        }
    }
    result
}
