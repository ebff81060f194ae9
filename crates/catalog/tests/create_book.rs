mod common;

use bookshelf_catalog::{CreateBookInput, ViewRefresh};
use bookshelf_common::cache::{keys, CacheBackend};
use bookshelf_common::config::CatalogConfig;
use bookshelf_common::db::models::ReadingStatus;
use bookshelf_common::db::ports::BookStore;
use bookshelf_common::errors::AppError;
use common::Harness;
use tokio_test::{assert_err, assert_ok};
use uuid::Uuid;

#[tokio::test]
async fn create_trims_title_and_author() {
    let harness = Harness::new();
    let owner = Uuid::new_v4();

    let input = CreateBookInput::new("  The Left Hand of Darkness ", "\tUrsula K. Le Guin ");
    let result = assert_ok!(harness.books.create_book_with_related_data(input, owner).await);

    assert_eq!(result.book.title, "The Left Hand of Darkness");
    assert_eq!(result.book.author, "Ursula K. Le Guin");
    assert_eq!(result.book.created_by, owner);
    assert!(result.status.is_none());
    assert!(result.rating.is_none());
    assert!(result.tags.is_empty());
}

#[tokio::test]
async fn create_with_related_data() {
    let harness = Harness::new();
    let owner = Uuid::new_v4();

    let input = CreateBookInput::new("Hyperion", "Dan Simmons")
        .with_status(ReadingStatus::Reading)
        .with_rating(4)
        .with_tags(["Space Opera", "classics"]);
    let result = assert_ok!(harness.books.create_book_with_related_data(input, owner).await);

    let status = result.status.expect("status row");
    assert_eq!(status.reading_status(), Some(ReadingStatus::Reading));
    assert!(status.started_at.is_some());
    assert!(status.finished_at.is_none());

    assert_eq!(result.rating.map(|r| r.rating), Some(4));

    let names: Vec<_> = result.tags.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["space opera", "classics"]);

    let counts = harness.store.count_dependents(result.book.id).await.unwrap();
    assert_eq!(counts.book_statuses, 1);
    assert_eq!(counts.ratings, 1);
    assert_eq!(counts.book_tags, 2);
}

#[tokio::test]
async fn duplicate_create_is_rejected_without_second_row() {
    let harness = Harness::new();
    let owner = Uuid::new_v4();

    let first = harness.create("Dune", "Herbert", owner).await;

    let err = assert_err!(
        harness
            .books
            .create_book_with_related_data(CreateBookInput::new(" Dune ", "Herbert"), owner)
            .await
    );
    match err {
        AppError::DuplicateBook { existing_id, .. } => assert_eq!(existing_id, Some(first.id)),
        other => panic!("expected DuplicateBook, got {other:?}"),
    }
    assert_eq!(harness.store.book_count().await, 1);

    // Same title for a different owner is fine
    harness.create("Dune", "Herbert", Uuid::new_v4()).await;
    assert_eq!(harness.store.book_count().await, 2);
}

#[tokio::test]
async fn check_for_duplicate_is_owner_scoped() {
    let harness = Harness::new();
    let owner = Uuid::new_v4();
    let book = harness.create("Solaris", "Stanisław Lem", owner).await;

    let check = harness.books.check_for_duplicate(" Solaris", "Stanisław Lem ", owner).await.unwrap();
    assert!(check.exists);
    assert_eq!(check.book_id, Some(book.id));

    let other = harness
        .books
        .check_for_duplicate("Solaris", "Stanisław Lem", Uuid::new_v4())
        .await
        .unwrap();
    assert!(!other.exists);

    // Exact match: case matters as stored
    let lower = harness.books.check_for_duplicate("solaris", "Stanisław Lem", owner).await.unwrap();
    assert!(!lower.exists);
}

#[tokio::test]
async fn failed_tag_link_removes_partial_book() {
    let harness = Harness::new();
    let owner = Uuid::new_v4();
    harness.store.fail_tag_links(true);

    let input = CreateBookInput::new("Anathem", "Neal Stephenson")
        .with_status(ReadingStatus::Finished)
        .with_tags(["philosophy"]);
    assert_err!(harness.books.create_book_with_related_data(input.clone(), owner).await);

    assert_eq!(harness.store.book_count().await, 0);

    // A retry is not mistaken for a duplicate
    harness.store.fail_tag_links(false);
    let result = assert_ok!(harness.books.create_book_with_related_data(input, owner).await);
    assert_eq!(result.tags.len(), 1);
    assert!(result.status.and_then(|s| s.finished_at).is_some());
}

#[tokio::test]
async fn out_of_range_rating_rejected_by_store_and_rolled_back() {
    let harness = Harness::new();
    let owner = Uuid::new_v4();

    let input = CreateBookInput::new("Blindsight", "Peter Watts").with_rating(9);
    let err = assert_err!(harness.books.create_book_with_related_data(input, owner).await);

    assert!(matches!(err, AppError::ConstraintViolation { .. }));
    assert_eq!(err.status_code().as_u16(), 400);
    assert_eq!(harness.store.book_count().await, 0);
}

#[tokio::test]
async fn create_invalidates_owner_cache() {
    let harness = Harness::new();
    let owner = Uuid::new_v4();
    harness
        .cache
        .set_raw(&keys::user_books(owner), "[]".into(), 60)
        .await
        .unwrap();

    let result = assert_ok!(
        harness
            .books
            .create_book_with_related_data(CreateBookInput::new("Ubik", "Philip K. Dick"), owner)
            .await
    );

    assert!(!harness.cache.contains(&keys::user_books(owner)).await);
    assert_eq!(result.cache.views, ViewRefresh::Refreshed);
    // Warmed right after invalidation
    assert!(harness.cache.contains(&keys::user_recent_books(owner)).await);
    assert!(harness.cache.contains(&keys::book_detail(result.book.id)).await);
}

#[tokio::test]
async fn create_can_leave_cache_alone() {
    let harness = Harness::with_catalog(CatalogConfig {
        invalidate_on_create: false,
        ..Default::default()
    });
    let owner = Uuid::new_v4();
    harness
        .cache
        .set_raw(&keys::user_books(owner), "[]".into(), 60)
        .await
        .unwrap();

    let result = assert_ok!(
        harness
            .books
            .create_book_with_related_data(CreateBookInput::new("Ubik", "Philip K. Dick"), owner)
            .await
    );

    assert!(harness.cache.contains(&keys::user_books(owner)).await);
    assert_eq!(result.cache.views, ViewRefresh::NotRequested);
}

#[tokio::test]
async fn cache_outage_does_not_fail_create() {
    let harness = Harness::new();
    harness.cache.fail_all(true);

    let result = assert_ok!(
        harness
            .books
            .create_book_with_related_data(CreateBookInput::new("Neuromancer", "William Gibson"), Uuid::new_v4())
            .await
    );
    assert!(result.cache.is_degraded());
    assert_eq!(harness.store.book_count().await, 1);
}
