//! Input and result types of the catalog operations

use bookshelf_common::db::models::{Book, BookStatus, Rating, ReadingStatus, Tag};
use bookshelf_common::db::ports::{BookChanges, DependentCounts};
use bookshelf_common::errors::{AppError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Input for creating a book together with its related data
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateBookInput {
    #[validate(length(min = 1, max = 500))]
    pub title: String,

    #[validate(length(min = 1, max = 300))]
    pub author: String,

    #[validate(length(max = 20))]
    pub isbn: Option<String>,

    #[validate(url)]
    pub cover_url: Option<String>,

    #[validate(length(max = 5000))]
    pub description: Option<String>,

    /// Reading status of the creator
    pub status: Option<ReadingStatus>,

    #[validate(range(min = 1, max = 5))]
    pub rating: Option<i16>,

    #[serde(default)]
    pub tags: Vec<String>,
}

impl CreateBookInput {
    pub fn new(title: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            author: author.into(),
            isbn: None,
            cover_url: None,
            description: None,
            status: None,
            rating: None,
            tags: Vec::new(),
        }
    }

    pub fn with_status(mut self, status: ReadingStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_rating(mut self, rating: i16) -> Self {
        self.rating = Some(rating);
        self
    }

    pub fn with_tags<S: Into<String>>(mut self, tags: impl IntoIterator<Item = S>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// Partial update of a book.
///
/// For `isbn`, `cover_url` and `description` an absent field is left alone
/// while an explicit `null` or empty string clears the column. `title` and
/// `author` can only be replaced.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct BookPatch {
    #[validate(length(min = 1, max = 500))]
    pub title: Option<String>,

    #[validate(length(min = 1, max = 300))]
    pub author: Option<String>,

    #[serde(default, deserialize_with = "nullable")]
    pub isbn: Option<Option<String>>,

    #[serde(default, deserialize_with = "nullable")]
    pub cover_url: Option<Option<String>>,

    #[serde(default, deserialize_with = "nullable")]
    pub description: Option<Option<String>>,
}

/// Keeps `null` distinguishable from an absent field
fn nullable<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl BookPatch {
    /// Trim every field and turn the patch into column changes
    pub fn into_changes(self) -> Result<BookChanges> {
        Ok(BookChanges {
            title: self.title.map(|t| required("title", t)).transpose()?,
            author: self.author.map(|a| required("author", a)).transpose()?,
            isbn: self.isbn.map(clearable),
            cover_url: self.cover_url.map(clearable),
            description: self.description.map(clearable),
        })
    }
}

fn required(field: &str, value: String) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation {
            message: format!("{} cannot be empty", field),
            field: Some(field.to_string()),
        });
    }
    Ok(trimmed.to_string())
}

/// Trim an optional column value, treating blank as absent
pub(crate) fn clearable(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Result of the advisory duplicate lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DuplicateCheck {
    pub exists: bool,
    pub book_id: Option<Uuid>,
}

impl DuplicateCheck {
    pub fn from_match(book: Option<&Book>) -> Self {
        Self {
            exists: book.is_some(),
            book_id: book.map(|b| b.id),
        }
    }
}

/// State of the derived view recomputation triggered by an invalidation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewRefresh {
    #[default]
    NotRequested,
    /// Handed to a background task
    Scheduled,
    Refreshed,
    Failed,
}

/// What the best-effort cache pass achieved.
///
/// Failures are collected here instead of being returned as errors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheOutcome {
    pub keys_invalidated: u64,
    pub keys_warmed: u64,
    pub views: ViewRefresh,
    pub failures: Vec<String>,
}

impl CacheOutcome {
    /// No cache work was attempted
    pub fn skipped() -> Self {
        Self::default()
    }

    pub fn is_degraded(&self) -> bool {
        !self.failures.is_empty() || self.views == ViewRefresh::Failed
    }

    pub(crate) fn record_failure(&mut self, what: impl Into<String>) {
        self.failures.push(what.into());
    }

    /// Fold a follow-up pass into this one
    pub fn merge(mut self, other: CacheOutcome) -> Self {
        self.keys_invalidated += other.keys_invalidated;
        self.keys_warmed += other.keys_warmed;
        if other.views != ViewRefresh::NotRequested {
            self.views = other.views;
        }
        self.failures.extend(other.failures);
        self
    }
}

/// A freshly created book with whatever related rows were produced
#[derive(Debug, Clone, Serialize)]
pub struct BookCreationResult {
    pub book: Book,
    pub status: Option<BookStatus>,
    pub rating: Option<Rating>,
    pub tags: Vec<Tag>,
    pub cache: CacheOutcome,
}

/// The part of a book detail that is the same for every reader. This is
/// what gets warmed under the book's detail key.
#[derive(Debug, Clone, Serialize)]
pub struct BookSummary {
    pub book: Book,
    pub tags: Vec<Tag>,
}

/// Read model of one book as seen by the requesting user
#[derive(Debug, Clone, Serialize)]
pub struct BookDetail {
    #[serde(flatten)]
    pub summary: BookSummary,
    pub is_owner: bool,
    pub status: Option<BookStatus>,
    pub rating: Option<Rating>,
    pub note_count: u64,
}

/// Outcome of a committed and audited deletion
#[derive(Debug, Clone, Serialize)]
pub struct DeleteBookResult {
    pub book_id: Uuid,
    pub title: String,
    /// Dependent rows counted before the delete
    pub deleted_related_data: DependentCounts,
    pub audit_id: Uuid,
    pub cache: CacheOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_distinguishes_null_from_absent() {
        let patch: BookPatch =
            serde_json::from_str(r#"{"description": null, "isbn": "  978-0441013593 "}"#).unwrap();
        assert_eq!(patch.description, Some(None));
        assert_eq!(patch.cover_url, None);

        let changes = patch.into_changes().unwrap();
        assert_eq!(changes.description, Some(None));
        assert_eq!(changes.isbn, Some(Some("978-0441013593".to_string())));
        assert_eq!(changes.cover_url, None);
    }

    #[test]
    fn test_empty_string_clears_nullable_field() {
        let patch: BookPatch = serde_json::from_str(r#"{"cover_url": "   "}"#).unwrap();
        assert_eq!(patch.into_changes().unwrap().cover_url, Some(None));
    }

    #[test]
    fn test_title_cannot_be_blanked() {
        let patch = BookPatch {
            title: Some("   ".to_string()),
            ..Default::default()
        };
        let err = patch.into_changes().unwrap_err();
        assert!(matches!(err, AppError::Validation { field: Some(ref f), .. } if f == "title"));
    }

    #[test]
    fn test_create_input_validation() {
        let input = CreateBookInput::new("Dune", "Herbert").with_rating(6);
        assert!(input.validate().is_err());

        let input = CreateBookInput::new("Dune", "Herbert").with_rating(5);
        assert!(input.validate().is_ok());

        let input = CreateBookInput::new("", "Herbert");
        assert!(input.validate().is_err());
    }

    #[test]
    fn test_cache_outcome_merge() {
        let first = CacheOutcome {
            keys_invalidated: 7,
            views: ViewRefresh::Refreshed,
            ..Default::default()
        };
        let mut second = CacheOutcome {
            keys_warmed: 2,
            ..Default::default()
        };
        second.record_failure("warm recent books");

        let merged = first.merge(second);
        assert_eq!(merged.keys_invalidated, 7);
        assert_eq!(merged.keys_warmed, 2);
        assert_eq!(merged.views, ViewRefresh::Refreshed);
        assert!(merged.is_degraded());
        assert!(!CacheOutcome::skipped().is_degraded());
    }
}
