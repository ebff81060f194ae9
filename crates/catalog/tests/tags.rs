mod common;

use bookshelf_catalog::TagService;
use bookshelf_common::config::CatalogConfig;
use bookshelf_common::db::ports::TagStore;
use bookshelf_common::db::MemoryStore;
use bookshelf_common::errors::AppError;
use common::Harness;
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};
use uuid::Uuid;

fn tags(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

fn fast_retry(retries: u32) -> CatalogConfig {
    CatalogConfig {
        tag_insert_retries: retries,
        tag_retry_backoff_ms: 1,
        ..Default::default()
    }
}

#[tokio::test]
async fn case_and_whitespace_variants_collapse_to_one_tag() {
    let harness = Harness::new();
    let book = harness.create("Foundation", "Isaac Asimov", Uuid::new_v4()).await;
    let service = TagService::new(harness.store.clone(), &CatalogConfig::default());

    let linked = assert_ok!(
        service
            .process_tags_for_book(book.id, &tags(&["Fiction", " fiction ", "FICTION"]))
            .await
    );

    assert_eq!(linked.len(), 1);
    assert_eq!(linked[0].name, "fiction");
    assert_eq!(harness.store.tag_count().await, 1);
    assert_eq!(harness.store.linked_tag_ids(book.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn reprocessing_overlapping_tags_adds_no_duplicate_links() {
    let harness = Harness::new();
    let book = harness.create("Foundation", "Isaac Asimov", Uuid::new_v4()).await;
    let service = TagService::new(harness.store.clone(), &CatalogConfig::default());

    assert_ok!(service.process_tags_for_book(book.id, &tags(&["classics", "robots"])).await);
    let second = assert_ok!(
        service
            .process_tags_for_book(book.id, &tags(&["Robots", "empire"]))
            .await
    );

    assert_eq!(second.len(), 2);
    assert_eq!(harness.store.tag_count().await, 3);

    let names: Vec<_> = service
        .tags_for_book(book.id)
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert_eq!(names, vec!["classics", "empire", "robots"]);
}

#[tokio::test]
async fn existing_tags_are_shared_between_books() {
    let harness = Harness::new();
    let owner = Uuid::new_v4();
    let first = harness.create("I, Robot", "Isaac Asimov", owner).await;
    let second = harness.create("The Caves of Steel", "Isaac Asimov", owner).await;
    let service = TagService::new(harness.store.clone(), &CatalogConfig::default());

    let a = assert_ok!(service.process_tags_for_book(first.id, &tags(&["robots"])).await);
    let b = assert_ok!(service.process_tags_for_book(second.id, &tags(&["ROBOTS"])).await);

    assert_eq!(a[0].id, b[0].id);
    assert_eq!(harness.store.tag_count().await, 1);
}

#[tokio::test]
async fn blank_tags_are_a_no_op() {
    let store = Arc::new(MemoryStore::new());
    let service = TagService::new(store.clone(), &CatalogConfig::default());

    // No book row needed: nothing is looked up or linked
    let linked = assert_ok!(service.process_tags_for_book(Uuid::new_v4(), &tags(&["", "   "])).await);
    assert!(linked.is_empty());
    assert_eq!(store.tag_count().await, 0);
}

#[tokio::test]
async fn concurrent_tag_creation_is_retried() {
    let harness = Harness::new();
    let book = harness.create("The Expanse", "James S. A. Corey", Uuid::new_v4()).await;
    let service = TagService::new(harness.store.clone(), &fast_retry(3));

    harness.store.contend_tag_name("space").await;
    let linked = assert_ok!(
        service
            .process_tags_for_book(book.id, &tags(&["space", "politics"]))
            .await
    );

    let names: Vec<_> = linked.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["space", "politics"]);

    // The concurrent creator's row is reused, not duplicated
    let all = harness.store.all_tags().await;
    assert_eq!(all.iter().filter(|t| t.name == "space").count(), 1);
    assert_eq!(harness.store.linked_tag_ids(book.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn retry_gives_up_after_the_configured_bound() {
    let harness = Harness::new();
    let book = harness.create("The Expanse", "James S. A. Corey", Uuid::new_v4()).await;
    let service = TagService::new(harness.store.clone(), &fast_retry(0));

    harness.store.contend_tag_name("space").await;
    let err = assert_err!(service.process_tags_for_book(book.id, &tags(&["space"])).await);
    assert!(matches!(err, AppError::UniqueViolation { .. }));
}
