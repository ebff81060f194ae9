//! Book lifecycle orchestration
//!
//! Composes the book store with the tag, audit and cache services.
//! Creation and deletion run as step sequences (see `saga`); the store's
//! unique constraint on `(title, author, created_by)` backs the advisory
//! duplicate lookup and cascading foreign keys remove dependents on delete.

use crate::dto::{
    clearable, BookCreationResult, BookDetail, BookPatch, BookSummary, CacheOutcome,
    CreateBookInput, DeleteBookResult, DuplicateCheck,
};
use crate::saga::{CreateStep, DeleteStep, Saga};
use crate::services::audit::{AuditService, BookDeletionAuditLog, SecurityEventKind, BOOK_RESOURCE};
use crate::services::cache::CacheService;
use crate::services::tag::TagService;
use bookshelf_common::config::CatalogConfig;
use bookshelf_common::db::constraints;
use bookshelf_common::db::models::{Book, BookStatus, Rating, ReadingStatus, Tag};
use bookshelf_common::db::ports::{BookStore, NewBook, NewBookStatus, NewRating};
use bookshelf_common::errors::{AppError, Result};
use bookshelf_common::metrics;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

pub struct BookService {
    books: Arc<dyn BookStore>,
    tags: TagService,
    audit: AuditService,
    cache: CacheService,
    config: CatalogConfig,
}

/// Rows written by the optional create steps
struct RelatedRows {
    status: Option<BookStatus>,
    rating: Option<Rating>,
    tags: Vec<Tag>,
}

impl BookService {
    pub fn new(
        books: Arc<dyn BookStore>,
        tags: TagService,
        audit: AuditService,
        cache: CacheService,
        config: CatalogConfig,
    ) -> Self {
        Self {
            books,
            tags,
            audit,
            cache,
            config,
        }
    }

    // ========================================================================
    // Duplicate detection
    // ========================================================================

    /// Advisory lookup of a book with the same trimmed title and author
    /// owned by `owner`.
    pub async fn check_for_duplicate(&self, title: &str, author: &str, owner: Uuid) -> Result<DuplicateCheck> {
        let found = self.find_duplicate(title.trim(), author.trim(), owner, None).await?;
        Ok(DuplicateCheck::from_match(found.as_ref()))
    }

    async fn find_duplicate(
        &self,
        title: &str,
        author: &str,
        owner: Uuid,
        exclude: Option<Uuid>,
    ) -> Result<Option<Book>> {
        self.books
            .find_book_by_natural_key(title, author, owner, exclude)
            .await
    }

    /// Turn a natural-key violation from the store into `DuplicateBook`,
    /// naming the winning row if it is visible by now.
    async fn map_natural_key_violation(
        &self,
        err: AppError,
        title: &str,
        author: &str,
        owner: Uuid,
        exclude: Option<Uuid>,
    ) -> AppError {
        if !err.is_unique_violation_of(constraints::BOOKS_NATURAL_KEY) {
            return err;
        }

        let existing_id = self
            .find_duplicate(title, author, owner, exclude)
            .await
            .ok()
            .flatten()
            .map(|b| b.id);

        warn!(
            title = %title,
            existing_id = ?existing_id,
            "Duplicate check race lost, rejected by unique constraint"
        );
        duplicate_book(title, author, existing_id)
    }

    // ========================================================================
    // Create
    // ========================================================================

    /// Create a book and, when supplied, the creator's status, rating and tags.
    ///
    /// Steps run in order and a failure aborts the rest. If anything fails
    /// after the book row was written, the row is deleted again so a retry
    /// is not rejected as a duplicate.
    #[instrument(skip(self, input), fields(user_id = %user_id))]
    pub async fn create_book_with_related_data(
        &self,
        input: CreateBookInput,
        user_id: Uuid,
    ) -> Result<BookCreationResult> {
        let started = Instant::now();
        let result = self.create(input, user_id).await;
        record_operation("create", &result, started);
        result
    }

    async fn create(&self, input: CreateBookInput, user_id: Uuid) -> Result<BookCreationResult> {
        let title = input.title.trim().to_string();
        let author = input.author.trim().to_string();
        if title.is_empty() || author.is_empty() {
            return Err(AppError::Validation {
                message: "title and author are required".to_string(),
                field: Some(if title.is_empty() { "title" } else { "author" }.to_string()),
            });
        }

        let mut saga = Saga::new("create_book");

        saga.run(CreateStep::CheckDuplicate, async {
            match self.find_duplicate(&title, &author, user_id, None).await? {
                Some(existing) => Err(duplicate_book(&title, &author, Some(existing.id))),
                None => Ok(()),
            }
        })
        .await?;

        let new_book = NewBook {
            title: title.clone(),
            author: author.clone(),
            isbn: clearable(input.isbn.clone()),
            cover_url: clearable(input.cover_url.clone()),
            description: clearable(input.description.clone()),
            created_by: user_id,
        };

        let book = saga
            .run(CreateStep::InsertBook, async {
                match self.books.insert_book(new_book).await {
                    Ok(book) => Ok(book),
                    Err(e) => Err(self.map_natural_key_violation(e, &title, &author, user_id, None).await),
                }
            })
            .await?;

        let related = match self.create_related(&mut saga, &book, &input, user_id).await {
            Ok(related) => related,
            Err(e) => {
                if saga.has_completed(CreateStep::InsertBook) {
                    self.compensate_create(&book, saga.completed()).await;
                }
                return Err(e);
            }
        };

        info!(
            book_id = %book.id,
            has_status = related.status.is_some(),
            has_rating = related.rating.is_some(),
            tag_count = related.tags.len(),
            "Book created"
        );

        let cache = if self.config.invalidate_on_create {
            self.cache.after_mutation(book.id, user_id).await
        } else {
            CacheOutcome::skipped()
        };

        Ok(BookCreationResult {
            book,
            status: related.status,
            rating: related.rating,
            tags: related.tags,
            cache,
        })
    }

    async fn create_related(
        &self,
        saga: &mut Saga<CreateStep>,
        book: &Book,
        input: &CreateBookInput,
        user_id: Uuid,
    ) -> Result<RelatedRows> {
        let status = match input.status {
            Some(status) => Some(
                saga.run(CreateStep::InsertStatus, self.books.insert_status(new_status(book.id, user_id, status)))
                    .await?,
            ),
            None => None,
        };

        // Range is validated upstream; the ratings check constraint is the backstop
        let rating = match input.rating {
            Some(rating) => Some(
                saga.run(
                    CreateStep::InsertRating,
                    self.books.insert_rating(NewRating {
                        book_id: book.id,
                        user_id,
                        rating,
                    }),
                )
                .await?,
            ),
            None => None,
        };

        let tags = if input.tags.is_empty() {
            Vec::new()
        } else {
            saga.run(CreateStep::LinkTags, self.tags.process_tags_for_book(book.id, &input.tags))
                .await?
        };

        Ok(RelatedRows { status, rating, tags })
    }

    /// Undo a partially created book. Cascades remove whatever dependents
    /// were already written; tags created on the way stay, they are shared.
    async fn compensate_create(&self, book: &Book, completed: &[CreateStep]) {
        match self.books.delete_book(book.id, book.created_by).await {
            Ok(true) => warn!(book_id = %book.id, undone = ?completed, "Partially created book removed"),
            Ok(false) => warn!(book_id = %book.id, "Partially created book already gone"),
            Err(e) => error!(
                book_id = %book.id,
                completed = ?completed,
                error = %e,
                "Compensation failed, partially created book left behind"
            ),
        }
    }

    // ========================================================================
    // Update
    // ========================================================================

    /// Owner-only partial update
    #[instrument(skip(self, patch), fields(book_id = %book_id, user_id = %user_id))]
    pub async fn update_book(&self, book_id: Uuid, user_id: Uuid, patch: BookPatch) -> Result<Book> {
        let started = Instant::now();
        let result = self.update(book_id, user_id, patch).await;
        record_operation("update", &result, started);
        result
    }

    async fn update(&self, book_id: Uuid, user_id: Uuid, patch: BookPatch) -> Result<Book> {
        let changes = patch.into_changes()?;
        if changes.is_empty() {
            return Err(AppError::Validation {
                message: "at least one field must be provided".to_string(),
                field: None,
            });
        }

        let book = self
            .books
            .find_book(book_id)
            .await?
            .ok_or(AppError::BookNotFound { id: book_id })?;

        if !book.is_owned_by(user_id) {
            return Err(AppError::Forbidden {
                message: "only the owner can update this book".to_string(),
            });
        }

        let title = changes.title.clone().unwrap_or_else(|| book.title.clone());
        let author = changes.author.clone().unwrap_or_else(|| book.author.clone());
        let natural_key_changed = title != book.title || author != book.author;

        if natural_key_changed {
            if let Some(existing) = self.find_duplicate(&title, &author, user_id, Some(book_id)).await? {
                return Err(duplicate_book(&title, &author, Some(existing.id)));
            }
        }

        // Scoped by owner as well, in case ownership changed since the load
        let updated = match self.books.update_book(book_id, user_id, changes).await {
            Ok(updated) => updated,
            Err(e) => {
                return Err(self
                    .map_natural_key_violation(e, &title, &author, user_id, Some(book_id))
                    .await)
            }
        };
        let updated = updated.ok_or(AppError::BookNotFound { id: book_id })?;

        info!(natural_key_changed, "Book updated");

        let cache = self.cache.invalidate_book(book_id, user_id).await;
        if cache.is_degraded() {
            warn!(failures = ?cache.failures, "Book updated with stale cache");
        }

        Ok(updated)
    }

    // ========================================================================
    // Delete
    // ========================================================================

    /// Owner-only hard delete with an audit record.
    ///
    /// A non-owner attempt is recorded as a `PERMISSION_DENIED` security
    /// event before it is rejected. If the deletion commits but its audit
    /// record cannot be written the caller gets `AuditLogFailed` with
    /// `mutation_committed` set, never a success.
    #[instrument(skip(self), fields(book_id = %book_id, user_id = %user_id))]
    pub async fn delete_book(&self, book_id: Uuid, user_id: Uuid) -> Result<DeleteBookResult> {
        let started = Instant::now();
        let result = self.delete(book_id, user_id).await;
        record_operation("delete", &result, started);
        result
    }

    async fn delete(&self, book_id: Uuid, user_id: Uuid) -> Result<DeleteBookResult> {
        let mut saga = Saga::new("delete_book");

        let book = saga
            .run(DeleteStep::LoadBook, async {
                self.books
                    .find_book(book_id)
                    .await?
                    .ok_or(AppError::BookNotFound { id: book_id })
            })
            .await?;

        saga.run(DeleteStep::Authorize, self.authorize_delete(&book, user_id))
            .await?;

        let counts = saga
            .run(DeleteStep::CountDependents, self.books.count_dependents(book_id))
            .await?;

        let snapshot = BookDeletionAuditLog::snapshot(&book, user_id, counts);

        saga.run(DeleteStep::DeleteBook, async {
            match self.books.delete_book(book_id, user_id).await? {
                true => Ok(()),
                // Lost a race with another delete
                false => Err(AppError::BookNotFound { id: book_id }),
            }
        })
        .await?;

        let audit_id = saga
            .run(DeleteStep::WriteAudit, self.audit.log_book_deletion(&snapshot))
            .await?;

        info!(
            audit_id = %audit_id,
            dependents = counts.total(),
            "Book deleted"
        );

        let cache = self.cache.after_mutation(book_id, user_id).await;

        Ok(DeleteBookResult {
            book_id,
            title: book.title,
            deleted_related_data: counts,
            audit_id,
            cache,
        })
    }

    async fn authorize_delete(&self, book: &Book, user_id: Uuid) -> Result<()> {
        if book.is_owned_by(user_id) {
            return Ok(());
        }

        warn!(owner = %book.created_by, "Delete attempted by non-owner");

        self.audit
            .log_security_event(
                SecurityEventKind::PermissionDenied,
                BOOK_RESOURCE,
                &book.id.to_string(),
                user_id,
                json!({
                    "attempted_operation": "delete",
                    "owner_id": book.created_by,
                    "title": book.title,
                }),
            )
            .await?;

        Err(AppError::InsufficientPermissions {
            message: "only the owner can delete this book".to_string(),
        })
    }

    // ========================================================================
    // Read
    // ========================================================================

    /// Book with the requesting user's status, rating and note count
    #[instrument(skip(self), fields(book_id = %book_id, user_id = %user_id))]
    pub async fn get_book_detail(&self, book_id: Uuid, user_id: Uuid) -> Result<BookDetail> {
        let book = self
            .books
            .find_book(book_id)
            .await?
            .ok_or(AppError::BookNotFound { id: book_id })?;

        let (status, rating, tags, note_count) = futures::try_join!(
            self.books.find_status(book_id, user_id),
            self.books.find_rating(book_id, user_id),
            self.tags.tags_for_book(book_id),
            self.books.count_notes(book_id, user_id),
        )?;

        Ok(BookDetail {
            is_owner: book.is_owned_by(user_id),
            summary: BookSummary { book, tags },
            status,
            rating,
            note_count,
        })
    }
}

fn new_status(book_id: Uuid, user_id: Uuid, status: ReadingStatus) -> NewBookStatus {
    let now = Utc::now();
    NewBookStatus {
        book_id,
        user_id,
        status,
        started_at: (status == ReadingStatus::Reading).then(|| now.into()),
        finished_at: (status == ReadingStatus::Finished).then(|| now.into()),
    }
}

fn duplicate_book(title: &str, author: &str, existing_id: Option<Uuid>) -> AppError {
    AppError::DuplicateBook {
        message: format!("You already have \"{}\" by {}", title, author),
        existing_id,
    }
}

fn record_operation<T>(operation: &str, result: &Result<T>, started: Instant) {
    let outcome = match result {
        Ok(_) => "success",
        Err(e) if e.is_operationally_critical() => "critical",
        Err(e) if e.is_client_error() => "rejected",
        Err(_) => "failed",
    };
    metrics::record_book_operation(operation, outcome, started.elapsed().as_secs_f64());
}
