mod common;

use bookshelf_catalog::CreateBookInput;
use bookshelf_common::db::models::ReadingStatus;
use bookshelf_common::errors::AppError;
use common::Harness;
use tokio_test::{assert_err, assert_ok};
use uuid::Uuid;

#[tokio::test]
async fn dune_end_to_end() {
    let harness = Harness::new();
    let owner = Uuid::new_v4();

    let input = CreateBookInput::new("Dune", "Herbert").with_tags(["scifi", "scifi "]);
    let created = assert_ok!(harness.books.create_book_with_related_data(input, owner).await);

    assert_eq!(created.tags.len(), 1);
    assert_eq!(created.tags[0].name, "scifi");

    let detail = assert_ok!(harness.books.get_book_detail(created.book.id, owner).await);
    assert!(detail.is_owner);
    assert_eq!(detail.summary.tags.len(), 1);

    let deleted = assert_ok!(harness.books.delete_book(created.book.id, owner).await);
    assert_eq!(deleted.deleted_related_data.book_tags, 1);
    assert_eq!(deleted.deleted_related_data.book_statuses, 0);
    assert_eq!(deleted.deleted_related_data.ratings, 0);
    assert_eq!(deleted.deleted_related_data.notes, 0);

    let err = assert_err!(harness.books.get_book_detail(created.book.id, owner).await);
    assert!(matches!(err, AppError::BookNotFound { .. }));
}

#[tokio::test]
async fn concurrent_duplicate_creates_yield_one_book() {
    let harness = Harness::new();
    let owner = Uuid::new_v4();

    let first = {
        let books = harness.books.clone();
        tokio::spawn(async move {
            books
                .create_book_with_related_data(CreateBookInput::new("Dune", "Herbert"), owner)
                .await
        })
    };
    let second = {
        let books = harness.books.clone();
        tokio::spawn(async move {
            books
                .create_book_with_related_data(CreateBookInput::new("Dune", "Herbert"), owner)
                .await
        })
    };

    let results = [first.await.unwrap(), second.await.unwrap()];
    let created = results.iter().filter(|r| r.is_ok()).count();
    let duplicates = results
        .iter()
        .filter(|r| matches!(r, Err(AppError::DuplicateBook { .. })))
        .count();

    assert_eq!(created, 1);
    assert_eq!(duplicates, 1);
    assert_eq!(harness.store.book_count().await, 1);
}

#[tokio::test]
async fn lost_check_race_is_caught_by_constraint() {
    let harness = Harness::new();
    let owner = Uuid::new_v4();
    harness.create("Dune", "Herbert", owner).await;

    // The second caller's advisory check runs before the first insert is visible
    harness.store.hide_natural_key_matches(true);
    let err = assert_err!(
        harness
            .books
            .create_book_with_related_data(CreateBookInput::new("Dune", "Herbert"), owner)
            .await
    );

    assert!(matches!(err, AppError::DuplicateBook { .. }));
    assert_eq!(err.status_code().as_u16(), 409);
    assert_eq!(harness.store.book_count().await, 1);
}

#[tokio::test]
async fn detail_shows_requesting_users_own_data() {
    let harness = Harness::new();
    let owner = Uuid::new_v4();
    let reader = Uuid::new_v4();

    let input = CreateBookInput::new("Middlemarch", "George Eliot")
        .with_status(ReadingStatus::Reading)
        .with_rating(5)
        .with_tags(["classics"]);
    let created = assert_ok!(harness.books.create_book_with_related_data(input, owner).await);
    harness.store.add_note(created.book.id, owner, "Dorothea").await.unwrap();

    let mine = assert_ok!(harness.books.get_book_detail(created.book.id, owner).await);
    assert!(mine.is_owner);
    assert!(mine.status.is_some());
    assert_eq!(mine.rating.map(|r| r.rating), Some(5));
    assert_eq!(mine.note_count, 1);

    let theirs = assert_ok!(harness.books.get_book_detail(created.book.id, reader).await);
    assert!(!theirs.is_owner);
    assert!(theirs.status.is_none());
    assert!(theirs.rating.is_none());
    assert_eq!(theirs.note_count, 0);
    assert_eq!(theirs.summary.tags.len(), 1);
}
