#![allow(dead_code)]

use bookshelf_catalog::{build_book_service, BookService, CreateBookInput};
use bookshelf_common::cache::MemoryCache;
use bookshelf_common::config::{CachePolicyConfig, CatalogConfig};
use bookshelf_common::db::models::Book;
use bookshelf_common::db::MemoryStore;
use std::sync::Arc;
use uuid::Uuid;

/// Services wired over the in-memory store and cache
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub cache: Arc<MemoryCache>,
    pub books: Arc<BookService>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_catalog(CatalogConfig::default())
    }

    pub fn with_catalog(mut catalog: CatalogConfig) -> Self {
        catalog.tag_retry_backoff_ms = 1;
        let policy = CachePolicyConfig {
            refresh_in_background: false,
            ..Default::default()
        };

        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(MemoryCache::new());
        let books = build_book_service(store.clone(), cache.clone(), &catalog, &policy);

        Self {
            store,
            cache,
            books: Arc::new(books),
        }
    }

    pub async fn create(&self, title: &str, author: &str, owner: Uuid) -> Book {
        self.books
            .create_book_with_related_data(CreateBookInput::new(title, author), owner)
            .await
            .expect("create book")
            .book
    }
}
