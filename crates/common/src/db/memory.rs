//! In-process storage backend
//!
//! Implements every storage port against plain collections guarded by a
//! single mutex. It mirrors the Postgres schema's guarantees (natural key
//! uniqueness, tag name uniqueness, the rating check and cascading deletes)
//! so service behaviour observed in tests matches production. Fault
//! injection switches let tests exercise the failure paths.

use crate::db::constraints;
use crate::db::models::*;
use crate::db::ports::*;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct MemoryState {
    books: HashMap<Uuid, Book>,
    statuses: Vec<BookStatus>,
    ratings: Vec<Rating>,
    notes: Vec<Note>,
    tags: HashMap<Uuid, Tag>,
    book_tags: Vec<BookTag>,
    audit_logs: Vec<AuditLog>,
    refreshed_views: Vec<DerivedView>,
    /// Tag names another writer will create just before our next insert
    contended_tag_names: HashSet<String>,
}

/// In-memory implementation of all storage ports
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    fail_audit_writes: AtomicBool,
    fail_view_refresh: AtomicBool,
    fail_tag_links: AtomicBool,
    hide_natural_key_matches: AtomicBool,
    natural_key_lookups: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Fault injection
    // ========================================================================

    /// Make every audit append fail
    pub fn fail_audit_writes(&self, fail: bool) {
        self.fail_audit_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every materialized view refresh fail
    pub fn fail_view_refresh(&self, fail: bool) {
        self.fail_view_refresh.store(fail, Ordering::SeqCst);
    }

    /// Make every book/tag link insert fail
    pub fn fail_tag_links(&self, fail: bool) {
        self.fail_tag_links.store(fail, Ordering::SeqCst);
    }

    /// Make natural-key lookups miss, as if a concurrent insert had not
    /// been visible yet. The uniqueness constraint still applies.
    pub fn hide_natural_key_matches(&self, hide: bool) {
        self.hide_natural_key_matches.store(hide, Ordering::SeqCst);
    }

    /// Simulate a concurrent writer creating `name` right before the next
    /// tag insert that includes it.
    pub async fn contend_tag_name(&self, name: &str) {
        self.state.lock().await.contended_tag_names.insert(name.to_string());
    }

    // ========================================================================
    // Seeding and inspection
    // ========================================================================

    /// Add a note; note CRUD lives outside the catalog services
    pub async fn add_note(&self, book_id: Uuid, user_id: Uuid, content: &str) -> Result<Note> {
        let mut state = self.state.lock().await;
        if !state.books.contains_key(&book_id) {
            return Err(foreign_key_violation("notes_book_id_fkey"));
        }

        let now = Utc::now();
        let note = Note {
            id: Uuid::new_v4(),
            book_id,
            user_id,
            content: content.to_string(),
            created_at: now.into(),
            updated_at: now.into(),
        };
        state.notes.push(note.clone());
        Ok(note)
    }

    /// Number of natural-key lookups served so far
    pub fn natural_key_lookups(&self) -> u64 {
        self.natural_key_lookups.load(Ordering::SeqCst)
    }

    pub async fn book_count(&self) -> usize {
        self.state.lock().await.books.len()
    }

    pub async fn tag_count(&self) -> usize {
        self.state.lock().await.tags.len()
    }

    pub async fn all_tags(&self) -> Vec<Tag> {
        self.state.lock().await.tags.values().cloned().collect()
    }

    /// Every row in every dependent table that references `book_id`
    pub async fn dependent_rows(&self, book_id: Uuid) -> u64 {
        let state = self.state.lock().await;
        count_dependents_locked(&state, book_id).total()
    }

    pub async fn audit_entries(&self) -> Vec<AuditLog> {
        self.state.lock().await.audit_logs.clone()
    }

    pub async fn refreshed_views(&self) -> Vec<DerivedView> {
        self.state.lock().await.refreshed_views.clone()
    }
}

fn unique_violation(constraint: &str) -> AppError {
    AppError::UniqueViolation {
        constraint: constraint.to_string(),
    }
}

fn foreign_key_violation(constraint: &str) -> AppError {
    AppError::ConstraintViolation {
        constraint: constraint.to_string(),
        message: "referenced book does not exist".to_string(),
    }
}

fn count_dependents_locked(state: &MemoryState, book_id: Uuid) -> DependentCounts {
    DependentCounts {
        book_statuses: state.statuses.iter().filter(|s| s.book_id == book_id).count() as u64,
        ratings: state.ratings.iter().filter(|r| r.book_id == book_id).count() as u64,
        notes: state.notes.iter().filter(|n| n.book_id == book_id).count() as u64,
        book_tags: state.book_tags.iter().filter(|l| l.book_id == book_id).count() as u64,
    }
}

fn natural_key_taken(state: &MemoryState, book: &Book) -> bool {
    state.books.values().any(|other| {
        other.id != book.id
            && other.title == book.title
            && other.author == book.author
            && other.created_by == book.created_by
    })
}

#[async_trait]
impl BookStore for MemoryStore {
    async fn find_book(&self, id: Uuid) -> Result<Option<Book>> {
        Ok(self.state.lock().await.books.get(&id).cloned())
    }

    async fn find_book_by_natural_key(
        &self,
        title: &str,
        author: &str,
        owner: Uuid,
        exclude: Option<Uuid>,
    ) -> Result<Option<Book>> {
        self.natural_key_lookups.fetch_add(1, Ordering::SeqCst);
        if self.hide_natural_key_matches.load(Ordering::SeqCst) {
            return Ok(None);
        }

        let state = self.state.lock().await;
        Ok(state
            .books
            .values()
            .find(|b| {
                b.title == title
                    && b.author == author
                    && b.created_by == owner
                    && Some(b.id) != exclude
            })
            .cloned())
    }

    async fn insert_book(&self, book: NewBook) -> Result<Book> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        let row = Book {
            id: Uuid::new_v4(),
            title: book.title,
            author: book.author,
            isbn: book.isbn,
            cover_url: book.cover_url,
            description: book.description,
            created_by: book.created_by,
            created_at: now.into(),
            updated_at: now.into(),
        };

        if natural_key_taken(&state, &row) {
            return Err(unique_violation(constraints::BOOKS_NATURAL_KEY));
        }

        state.books.insert(row.id, row.clone());
        Ok(row)
    }

    async fn update_book(&self, id: Uuid, owner: Uuid, changes: BookChanges) -> Result<Option<Book>> {
        let mut state = self.state.lock().await;

        let mut updated = match state.books.get(&id) {
            Some(book) if book.created_by == owner => book.clone(),
            _ => return Ok(None),
        };
        changes.apply_to(&mut updated);
        updated.updated_at = Utc::now().into();

        if natural_key_taken(&state, &updated) {
            return Err(unique_violation(constraints::BOOKS_NATURAL_KEY));
        }

        state.books.insert(id, updated.clone());
        Ok(Some(updated))
    }

    async fn delete_book(&self, id: Uuid, owner: Uuid) -> Result<bool> {
        let mut state = self.state.lock().await;

        match state.books.get(&id) {
            Some(book) if book.created_by == owner => {}
            _ => return Ok(false),
        }

        // ON DELETE CASCADE
        state.books.remove(&id);
        state.statuses.retain(|s| s.book_id != id);
        state.ratings.retain(|r| r.book_id != id);
        state.notes.retain(|n| n.book_id != id);
        state.book_tags.retain(|l| l.book_id != id);
        Ok(true)
    }

    async fn insert_status(&self, status: NewBookStatus) -> Result<BookStatus> {
        let mut state = self.state.lock().await;
        if !state.books.contains_key(&status.book_id) {
            return Err(foreign_key_violation("book_statuses_book_id_fkey"));
        }
        if state
            .statuses
            .iter()
            .any(|s| s.book_id == status.book_id && s.user_id == status.user_id)
        {
            return Err(unique_violation("book_statuses_pkey"));
        }

        let row = BookStatus {
            book_id: status.book_id,
            user_id: status.user_id,
            status: status.status.into(),
            started_at: status.started_at,
            finished_at: status.finished_at,
            updated_at: Utc::now().into(),
        };
        state.statuses.push(row.clone());
        Ok(row)
    }

    async fn find_status(&self, book_id: Uuid, user_id: Uuid) -> Result<Option<BookStatus>> {
        let state = self.state.lock().await;
        Ok(state
            .statuses
            .iter()
            .find(|s| s.book_id == book_id && s.user_id == user_id)
            .cloned())
    }

    async fn insert_rating(&self, rating: NewRating) -> Result<Rating> {
        let mut state = self.state.lock().await;
        if !state.books.contains_key(&rating.book_id) {
            return Err(foreign_key_violation("ratings_book_id_fkey"));
        }
        if !(MIN_RATING..=MAX_RATING).contains(&rating.rating) {
            return Err(AppError::ConstraintViolation {
                constraint: constraints::RATINGS_RANGE_CHECK.to_string(),
                message: format!("rating {} outside {}..={}", rating.rating, MIN_RATING, MAX_RATING),
            });
        }

        let now = Utc::now();
        let row = Rating {
            id: Uuid::new_v4(),
            book_id: rating.book_id,
            user_id: rating.user_id,
            rating: rating.rating,
            created_at: now.into(),
            updated_at: now.into(),
        };
        state.ratings.push(row.clone());
        Ok(row)
    }

    async fn find_rating(&self, book_id: Uuid, user_id: Uuid) -> Result<Option<Rating>> {
        let state = self.state.lock().await;
        Ok(state
            .ratings
            .iter()
            .filter(|r| r.book_id == book_id && r.user_id == user_id)
            .max_by_key(|r| r.updated_at)
            .cloned())
    }

    async fn count_dependents(&self, book_id: Uuid) -> Result<DependentCounts> {
        let state = self.state.lock().await;
        Ok(count_dependents_locked(&state, book_id))
    }

    async fn count_notes(&self, book_id: Uuid, user_id: Uuid) -> Result<u64> {
        let state = self.state.lock().await;
        Ok(state
            .notes
            .iter()
            .filter(|n| n.book_id == book_id && n.user_id == user_id)
            .count() as u64)
    }

    async fn recent_books(&self, owner: Uuid, limit: u64) -> Result<Vec<Book>> {
        let state = self.state.lock().await;
        let mut books: Vec<Book> = state
            .books
            .values()
            .filter(|b| b.created_by == owner)
            .cloned()
            .collect();
        books.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        books.truncate(limit as usize);
        Ok(books)
    }

    async fn reading_stats(&self, owner: Uuid) -> Result<ReadingStats> {
        let state = self.state.lock().await;
        let mut stats = ReadingStats {
            total_books: state.books.values().filter(|b| b.created_by == owner).count() as u64,
            ..Default::default()
        };

        for status in state
            .statuses
            .iter()
            .filter(|s| s.user_id == owner)
            .filter_map(|s| s.reading_status())
        {
            match status {
                ReadingStatus::WantToRead => stats.want_to_read += 1,
                ReadingStatus::Reading => stats.reading += 1,
                ReadingStatus::Finished => stats.finished += 1,
            }
        }

        Ok(stats)
    }
}

#[async_trait]
impl TagStore for MemoryStore {
    async fn find_tags_by_names(&self, names: &[String]) -> Result<Vec<Tag>> {
        let state = self.state.lock().await;
        Ok(state
            .tags
            .values()
            .filter(|t| names.contains(&t.name))
            .cloned()
            .collect())
    }

    async fn insert_tags(&self, names: &[String]) -> Result<Vec<Tag>> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        // The concurrent writer commits first
        let contended: Vec<String> = names
            .iter()
            .filter(|n| state.contended_tag_names.contains(*n))
            .cloned()
            .collect();
        if !contended.is_empty() {
            for name in contended {
                state.contended_tag_names.remove(&name);
                let tag = Tag {
                    id: Uuid::new_v4(),
                    name,
                    created_at: now.into(),
                };
                state.tags.insert(tag.id, tag);
            }
            return Err(unique_violation(constraints::TAGS_NAME_KEY));
        }

        // All-or-nothing, like a single INSERT statement
        let mut seen = HashSet::new();
        for name in names {
            if !seen.insert(name) || state.tags.values().any(|t| &t.name == name) {
                return Err(unique_violation(constraints::TAGS_NAME_KEY));
            }
        }

        let tags: Vec<Tag> = names
            .iter()
            .map(|name| Tag {
                id: Uuid::new_v4(),
                name: name.clone(),
                created_at: now.into(),
            })
            .collect();
        for tag in &tags {
            state.tags.insert(tag.id, tag.clone());
        }
        Ok(tags)
    }

    async fn linked_tag_ids(&self, book_id: Uuid) -> Result<Vec<Uuid>> {
        let state = self.state.lock().await;
        Ok(state
            .book_tags
            .iter()
            .filter(|l| l.book_id == book_id)
            .map(|l| l.tag_id)
            .collect())
    }

    async fn link_tags(&self, book_id: Uuid, tag_ids: &[Uuid]) -> Result<u64> {
        if self.fail_tag_links.load(Ordering::SeqCst) {
            return Err(AppError::Internal {
                message: "book_tags insert failed".to_string(),
            });
        }

        let mut state = self.state.lock().await;
        if !state.books.contains_key(&book_id) {
            return Err(foreign_key_violation("book_tags_book_id_fkey"));
        }

        let now = Utc::now();
        let mut created = 0;
        for tag_id in tag_ids {
            // ON CONFLICT (book_id, tag_id) DO NOTHING
            if state
                .book_tags
                .iter()
                .any(|l| l.book_id == book_id && l.tag_id == *tag_id)
            {
                continue;
            }
            state.book_tags.push(BookTag {
                book_id,
                tag_id: *tag_id,
                created_at: now.into(),
            });
            created += 1;
        }
        Ok(created)
    }

    async fn tags_for_book(&self, book_id: Uuid) -> Result<Vec<Tag>> {
        let state = self.state.lock().await;
        let mut tags: Vec<Tag> = state
            .book_tags
            .iter()
            .filter(|l| l.book_id == book_id)
            .filter_map(|l| state.tags.get(&l.tag_id).cloned())
            .collect();
        tags.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tags)
    }
}

#[async_trait]
impl AuditSink for MemoryStore {
    async fn append(&self, entry: AuditLog) -> Result<()> {
        if self.fail_audit_writes.load(Ordering::SeqCst) {
            return Err(AppError::ServiceUnavailable {
                message: "audit sink unavailable".to_string(),
            });
        }

        let mut state = self.state.lock().await;
        if state.audit_logs.iter().any(|e| e.id == entry.id) {
            return Err(unique_violation("audit_logs_pkey"));
        }
        state.audit_logs.push(entry);
        Ok(())
    }

    async fn entries_for_resource(&self, resource_type: &str, resource_id: &str) -> Result<Vec<AuditLog>> {
        let state = self.state.lock().await;
        Ok(state
            .audit_logs
            .iter()
            .filter(|e| e.resource_type == resource_type && e.resource_id == resource_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl DerivedViews for MemoryStore {
    async fn refresh_view(&self, view: DerivedView) -> Result<()> {
        if self.fail_view_refresh.load(Ordering::SeqCst) {
            return Err(AppError::Internal {
                message: format!("refresh of {} failed", view.view_name()),
            });
        }

        self.state.lock().await.refreshed_views.push(view);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn new_book(owner: Uuid, title: &str) -> NewBook {
        NewBook {
            title: title.to_string(),
            author: "Ursula K. Le Guin".to_string(),
            isbn: None,
            cover_url: None,
            description: None,
            created_by: owner,
        }
    }

    #[tokio::test]
    async fn test_natural_key_is_unique_per_owner() {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();

        assert_ok!(store.insert_book(new_book(owner, "The Dispossessed")).await);
        let err = assert_err!(store.insert_book(new_book(owner, "The Dispossessed")).await);
        assert!(err.is_unique_violation_of(constraints::BOOKS_NATURAL_KEY));

        // Another owner may hold the same title
        assert_ok!(store.insert_book(new_book(Uuid::new_v4(), "The Dispossessed")).await);
        assert_eq!(store.book_count().await, 2);
    }

    #[tokio::test]
    async fn test_delete_cascades_to_dependents_but_not_tags() {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        let book = store.insert_book(new_book(owner, "Lathe of Heaven")).await.unwrap();

        store
            .insert_status(NewBookStatus {
                book_id: book.id,
                user_id: owner,
                status: ReadingStatus::Reading,
                started_at: Some(Utc::now().into()),
                finished_at: None,
            })
            .await
            .unwrap();
        store
            .insert_rating(NewRating { book_id: book.id, user_id: owner, rating: 4 })
            .await
            .unwrap();
        store.add_note(book.id, owner, "dreams").await.unwrap();
        let tags = store.insert_tags(&["fiction".to_string()]).await.unwrap();
        store.link_tags(book.id, &[tags[0].id]).await.unwrap();

        assert_eq!(store.dependent_rows(book.id).await, 4);
        assert!(store.delete_book(book.id, owner).await.unwrap());
        assert_eq!(store.dependent_rows(book.id).await, 0);
        assert_eq!(store.tag_count().await, 1);
    }

    #[tokio::test]
    async fn test_scoped_writes_ignore_other_owners() {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        let intruder = Uuid::new_v4();
        let book = store.insert_book(new_book(owner, "Always Coming Home")).await.unwrap();

        let changes = BookChanges {
            title: Some("Renamed".to_string()),
            ..Default::default()
        };
        assert_eq!(store.update_book(book.id, intruder, changes).await.unwrap(), None);
        assert!(!store.delete_book(book.id, intruder).await.unwrap());
        assert_eq!(store.find_book(book.id).await.unwrap(), Some(book));
    }

    #[tokio::test]
    async fn test_rating_check_constraint() {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        let book = store.insert_book(new_book(owner, "Tehanu")).await.unwrap();

        let err = assert_err!(
            store
                .insert_rating(NewRating { book_id: book.id, user_id: owner, rating: 6 })
                .await
        );
        assert!(matches!(err, AppError::ConstraintViolation { ref constraint, .. }
            if constraint == constraints::RATINGS_RANGE_CHECK));
    }

    #[tokio::test]
    async fn test_links_are_not_duplicated() {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        let book = store.insert_book(new_book(owner, "Earthsea")).await.unwrap();
        let tags = store
            .insert_tags(&["fantasy".to_string(), "classic".to_string()])
            .await
            .unwrap();
        let ids: Vec<Uuid> = tags.iter().map(|t| t.id).collect();

        assert_eq!(store.link_tags(book.id, &ids).await.unwrap(), 2);
        assert_eq!(store.link_tags(book.id, &ids).await.unwrap(), 0);
        assert_eq!(store.linked_tag_ids(book.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_contended_tag_insert_reports_unique_violation() {
        let store = MemoryStore::new();
        store.contend_tag_name("poetry").await;

        let err = assert_err!(store.insert_tags(&["poetry".to_string()]).await);
        assert!(err.is_unique_violation_of(constraints::TAGS_NAME_KEY));

        // The other writer's row is now visible
        let found = store.find_tags_by_names(&["poetry".to_string()]).await.unwrap();
        assert_eq!(found.len(), 1);
    }
}
