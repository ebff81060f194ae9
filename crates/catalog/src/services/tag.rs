//! Tag normalization, upsert and linking

use backoff::{future::retry, ExponentialBackoffBuilder};
use bookshelf_common::config::CatalogConfig;
use bookshelf_common::db::constraints;
use bookshelf_common::db::models::Tag;
use bookshelf_common::db::ports::TagStore;
use bookshelf_common::errors::Result;
use bookshelf_common::metrics;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Upper bound on time spent retrying a contended tag insert
const MAX_RETRY_ELAPSED: Duration = Duration::from_secs(5);

/// Lowercase, trim, drop empties and deduplicate, keeping first-seen order
pub fn normalize_tags<S: AsRef<str>>(tags: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    tags.iter()
        .map(|t| t.as_ref().trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Idempotent upsert-and-link of a book's tags
pub struct TagService {
    store: Arc<dyn TagStore>,
    max_retries: u32,
    initial_backoff: Duration,
}

impl TagService {
    pub fn new(store: Arc<dyn TagStore>, config: &CatalogConfig) -> Self {
        Self {
            store,
            max_retries: config.tag_insert_retries,
            initial_backoff: config.tag_retry_backoff(),
        }
    }

    /// Make sure every tag exists and is linked to the book.
    ///
    /// Returns the tag rows for the normalized input, in input order.
    /// Running it again with overlapping names adds no duplicate links.
    #[instrument(skip(self, tags), fields(book_id = %book_id, tag_count = tags.len()))]
    pub async fn process_tags_for_book(&self, book_id: Uuid, tags: &[String]) -> Result<Vec<Tag>> {
        let names = normalize_tags(tags);
        if names.is_empty() {
            debug!("No tags after normalization");
            return Ok(Vec::new());
        }

        let tags = self.ensure_tags(&names).await?;

        let linked: HashSet<Uuid> = self.store.linked_tag_ids(book_id).await?.into_iter().collect();
        let to_link: Vec<Uuid> = tags
            .iter()
            .map(|t| t.id)
            .filter(|id| !linked.contains(id))
            .collect();

        if !to_link.is_empty() {
            let created = self.store.link_tags(book_id, &to_link).await?;
            info!(links_created = created, "Tags linked to book");
        }

        Ok(tags)
    }

    /// Tags currently linked to a book, by name
    pub async fn tags_for_book(&self, book_id: Uuid) -> Result<Vec<Tag>> {
        self.store.tags_for_book(book_id).await
    }

    /// Look up existing tags and insert the missing ones, retrying when a
    /// concurrent creator wins the race on the unique name.
    async fn ensure_tags(&self, names: &[String]) -> Result<Vec<Tag>> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_backoff)
            .with_max_elapsed_time(Some(MAX_RETRY_ELAPSED))
            .build();

        let max_retries = self.max_retries;
        let mut attempt = 0u32;

        let mut tags = retry(policy, || {
            attempt += 1;
            let attempt = attempt;
            async move {
                match self.upsert_once(names).await {
                    Ok(tags) => Ok(tags),
                    Err(e) if e.is_unique_violation_of(constraints::TAGS_NAME_KEY) && attempt <= max_retries => {
                        warn!(attempt, "Tag insert lost a race to a concurrent creator, retrying");
                        metrics::record_tag_insert_retry();
                        Err(backoff::Error::transient(e))
                    }
                    Err(e) => Err(backoff::Error::permanent(e)),
                }
            }
        })
        .await?;

        // Input order, so callers see tags the way they were given
        tags.sort_by_key(|t| names.iter().position(|n| n == &t.name));
        Ok(tags)
    }

    async fn upsert_once(&self, names: &[String]) -> Result<Vec<Tag>> {
        let mut tags = self.store.find_tags_by_names(names).await?;

        let existing: HashSet<&str> = tags.iter().map(|t| t.name.as_str()).collect();
        let missing: Vec<String> = names
            .iter()
            .filter(|n| !existing.contains(n.as_str()))
            .cloned()
            .collect();

        if !missing.is_empty() {
            debug!(new_tags = missing.len(), "Inserting new tags");
            tags.extend(self.store.insert_tags(&missing).await?);
        }

        Ok(tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_tags() {
        let tags = normalize_tags(&["Fiction", " fiction ", "FICTION", "", "  ", "Sci-Fi"]);
        assert_eq!(tags, vec!["fiction", "sci-fi"]);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let once = normalize_tags(&["  Space Opera", "space opera", "Classics "]);
        let twice = normalize_tags(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_normalize_empty_input() {
        let empty: [&str; 0] = [];
        assert!(normalize_tags(&empty).is_empty());
    }
}
