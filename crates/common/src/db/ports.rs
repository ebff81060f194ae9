//! Storage ports consumed by the catalog services
//!
//! Each port is a narrow async trait so the services can be wired to
//! Postgres in production and to the in-memory store in tests. Row types
//! are the SeaORM models; write inputs are plain structs.

use crate::db::models::*;
use crate::errors::Result;
use async_trait::async_trait;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Input for a new book row
#[derive(Debug, Clone)]
pub struct NewBook {
    pub title: String,
    pub author: String,
    pub isbn: Option<String>,
    pub cover_url: Option<String>,
    pub description: Option<String>,
    pub created_by: Uuid,
}

/// Column changes for a book update.
///
/// `None` leaves a column untouched; for nullable columns `Some(None)`
/// clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookChanges {
    pub title: Option<String>,
    pub author: Option<String>,
    pub isbn: Option<Option<String>>,
    pub cover_url: Option<Option<String>>,
    pub description: Option<Option<String>>,
}

impl BookChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.author.is_none()
            && self.isbn.is_none()
            && self.cover_url.is_none()
            && self.description.is_none()
    }

    /// Apply the changes to an in-memory row
    pub fn apply_to(&self, book: &mut Book) {
        if let Some(title) = &self.title {
            book.title = title.clone();
        }
        if let Some(author) = &self.author {
            book.author = author.clone();
        }
        if let Some(isbn) = &self.isbn {
            book.isbn = isbn.clone();
        }
        if let Some(cover_url) = &self.cover_url {
            book.cover_url = cover_url.clone();
        }
        if let Some(description) = &self.description {
            book.description = description.clone();
        }
    }
}

/// Input for a reading status row
#[derive(Debug, Clone)]
pub struct NewBookStatus {
    pub book_id: Uuid,
    pub user_id: Uuid,
    pub status: ReadingStatus,
    pub started_at: Option<DateTimeWithTimeZone>,
    pub finished_at: Option<DateTimeWithTimeZone>,
}

/// Input for a rating row
#[derive(Debug, Clone)]
pub struct NewRating {
    pub book_id: Uuid,
    pub user_id: Uuid,
    pub rating: i16,
}

/// Rows that reference a book and go away with it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependentCounts {
    pub book_statuses: u64,
    pub ratings: u64,
    pub notes: u64,
    pub book_tags: u64,
}

impl DependentCounts {
    pub fn total(&self) -> u64 {
        self.book_statuses + self.ratings + self.notes + self.book_tags
    }
}

/// Per-owner reading statistics, used to warm the stats cache key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadingStats {
    pub total_books: u64,
    pub want_to_read: u64,
    pub reading: u64,
    pub finished: u64,
}

/// Materialized aggregates recomputed after mutations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DerivedView {
    ReadingStatistics,
    PopularityStatistics,
}

impl DerivedView {
    pub const ALL: [DerivedView; 2] = [DerivedView::ReadingStatistics, DerivedView::PopularityStatistics];

    /// Name of the backing materialized view
    pub fn view_name(&self) -> &'static str {
        match self {
            DerivedView::ReadingStatistics => "user_reading_stats",
            DerivedView::PopularityStatistics => "book_popularity_stats",
        }
    }
}

/// Access to the `books` aggregate root and its per-user dependents
#[async_trait]
pub trait BookStore: Send + Sync {
    async fn find_book(&self, id: Uuid) -> Result<Option<Book>>;

    /// Exact match on the natural key, optionally ignoring one book id
    async fn find_book_by_natural_key(
        &self,
        title: &str,
        author: &str,
        owner: Uuid,
        exclude: Option<Uuid>,
    ) -> Result<Option<Book>>;

    async fn insert_book(&self, book: NewBook) -> Result<Book>;

    /// Update scoped by id and owner. `None` when no row matched.
    async fn update_book(&self, id: Uuid, owner: Uuid, changes: BookChanges) -> Result<Option<Book>>;

    /// Delete scoped by id and owner; dependents cascade. `false` when no row matched.
    async fn delete_book(&self, id: Uuid, owner: Uuid) -> Result<bool>;

    async fn insert_status(&self, status: NewBookStatus) -> Result<BookStatus>;

    async fn find_status(&self, book_id: Uuid, user_id: Uuid) -> Result<Option<BookStatus>>;

    async fn insert_rating(&self, rating: NewRating) -> Result<Rating>;

    async fn find_rating(&self, book_id: Uuid, user_id: Uuid) -> Result<Option<Rating>>;

    async fn count_dependents(&self, book_id: Uuid) -> Result<DependentCounts>;

    async fn count_notes(&self, book_id: Uuid, user_id: Uuid) -> Result<u64>;

    /// Most recently created books of an owner
    async fn recent_books(&self, owner: Uuid, limit: u64) -> Result<Vec<Book>>;

    async fn reading_stats(&self, owner: Uuid) -> Result<ReadingStats>;
}

/// Access to shared tags and the book/tag junction
#[async_trait]
pub trait TagStore: Send + Sync {
    /// Tags whose stored name is one of `names`
    async fn find_tags_by_names(&self, names: &[String]) -> Result<Vec<Tag>>;

    /// Insert new tags. A name created concurrently surfaces as a unique violation.
    async fn insert_tags(&self, names: &[String]) -> Result<Vec<Tag>>;

    async fn linked_tag_ids(&self, book_id: Uuid) -> Result<Vec<Uuid>>;

    /// Link tags to a book in one batch, skipping existing links. Returns links created.
    async fn link_tags(&self, book_id: Uuid, tag_ids: &[Uuid]) -> Result<u64>;

    async fn tags_for_book(&self, book_id: Uuid) -> Result<Vec<Tag>>;
}

/// Append-only audit trail: no update, no delete.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, entry: AuditLog) -> Result<()>;

    async fn entries_for_resource(&self, resource_type: &str, resource_id: &str) -> Result<Vec<AuditLog>>;
}

/// Recomputation of materialized aggregates
#[async_trait]
pub trait DerivedViews: Send + Sync {
    async fn refresh_view(&self, view: DerivedView) -> Result<()>;
}
