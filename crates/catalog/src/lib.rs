//! Bookshelf Catalog
//!
//! Book lifecycle orchestration: creation with related data, duplicate
//! detection, owner-checked update, audited deletion, tag upsert and cache
//! coherency after mutations.

pub mod dto;
pub mod saga;
pub mod services;

pub use dto::{
    BookCreationResult, BookDetail, BookPatch, BookSummary, CacheOutcome, CreateBookInput,
    DeleteBookResult, DuplicateCheck, ViewRefresh,
};
pub use services::{AuditService, BookService, CacheService, TagService};

use bookshelf_common::cache::CacheBackend;
use bookshelf_common::config::{CachePolicyConfig, CatalogConfig};
use bookshelf_common::db::ports::{AuditSink, BookStore, DerivedViews, TagStore};
use std::sync::Arc;

/// Wire a `BookService` and its collaborators over one store that
/// implements every storage port.
pub fn build_book_service<S>(
    store: Arc<S>,
    cache: Arc<dyn CacheBackend>,
    catalog: &CatalogConfig,
    policy: &CachePolicyConfig,
) -> BookService
where
    S: BookStore + TagStore + AuditSink + DerivedViews + 'static,
{
    let tags = TagService::new(store.clone(), catalog);
    let audit = AuditService::new(store.clone());
    let cache = CacheService::new(cache, store.clone(), store.clone(), store.clone(), policy.clone());

    BookService::new(store, tags, audit, cache, catalog.clone())
}
