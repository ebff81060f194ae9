mod common;

use bookshelf_catalog::CreateBookInput;
use bookshelf_common::cache::keys;
use bookshelf_common::db::models::ReadingStatus;
use bookshelf_common::db::ports::{BookStore, DerivedView};
use bookshelf_common::errors::AppError;
use common::Harness;
use tokio_test::{assert_err, assert_ok};
use uuid::Uuid;

#[tokio::test]
async fn owner_delete_removes_dependents_and_reports_counts() {
    let harness = Harness::new();
    let owner = Uuid::new_v4();
    let reader = Uuid::new_v4();

    let input = CreateBookInput::new("The Fifth Season", "N. K. Jemisin")
        .with_status(ReadingStatus::Finished)
        .with_rating(5)
        .with_tags(["fantasy", "hugo"]);
    let created = assert_ok!(harness.books.create_book_with_related_data(input, owner).await);
    let book_id = created.book.id;

    harness.store.add_note(book_id, owner, "Stone lore").await.unwrap();
    harness.store.add_note(book_id, reader, "Re-read").await.unwrap();

    let result = assert_ok!(harness.books.delete_book(book_id, owner).await);

    assert_eq!(result.book_id, book_id);
    assert_eq!(result.title, "The Fifth Season");
    let counts = result.deleted_related_data;
    assert_eq!(counts.book_statuses, 1);
    assert_eq!(counts.ratings, 1);
    assert_eq!(counts.notes, 2);
    assert_eq!(counts.book_tags, 2);

    assert!(harness.store.find_book(book_id).await.unwrap().is_none());
    assert_eq!(harness.store.dependent_rows(book_id).await, 0);
    // Shared tags survive
    assert_eq!(harness.store.tag_count().await, 2);
}

#[tokio::test]
async fn delete_writes_one_audit_entry_with_snapshot() {
    let harness = Harness::new();
    let owner = Uuid::new_v4();
    let book = harness.create("Ancillary Justice", "Ann Leckie", owner).await;

    let result = assert_ok!(harness.books.delete_book(book.id, owner).await);

    let entries = harness.store.audit_entries().await;
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.id, result.audit_id);
    assert_eq!(entry.operation, "BOOK_DELETE");
    assert_eq!(entry.resource_type, "book");
    assert_eq!(entry.resource_id, book.id.to_string());
    assert_eq!(entry.user_id, owner);
    assert_eq!(entry.metadata["title"], "Ancillary Justice");
    assert_eq!(entry.metadata["deleted_related_data"]["notes"], 0);
}

#[tokio::test]
async fn non_owner_delete_is_denied_and_audited_once() {
    let harness = Harness::new();
    let owner = Uuid::new_v4();
    let intruder = Uuid::new_v4();
    let book = harness.create("Ancillary Sword", "Ann Leckie", owner).await;

    let err = assert_err!(harness.books.delete_book(book.id, intruder).await);
    assert!(matches!(err, AppError::InsufficientPermissions { .. }));

    let entries = harness.store.audit_entries().await;
    let denied: Vec<_> = entries.iter().filter(|e| e.operation == "PERMISSION_DENIED").collect();
    assert_eq!(denied.len(), 1);
    assert_eq!(denied[0].user_id, intruder);
    assert_eq!(denied[0].resource_id, book.id.to_string());
    assert_eq!(entries.len(), 1);

    assert!(harness.store.find_book(book.id).await.unwrap().is_some());
}

#[tokio::test]
async fn denied_delete_with_audit_down_is_still_an_audit_failure() {
    let harness = Harness::new();
    let owner = Uuid::new_v4();
    let book = harness.create("Ancillary Mercy", "Ann Leckie", owner).await;
    harness.store.fail_audit_writes(true);

    let err = assert_err!(harness.books.delete_book(book.id, Uuid::new_v4()).await);
    assert!(matches!(
        err,
        AppError::AuditLogFailed { mutation_committed: false, .. }
    ));
    assert!(harness.store.find_book(book.id).await.unwrap().is_some());
}

#[tokio::test]
async fn unaudited_delete_is_reported_as_committed() {
    let harness = Harness::new();
    let owner = Uuid::new_v4();
    let book = harness.create("Embassytown", "China Miéville", owner).await;
    harness.store.fail_audit_writes(true);

    let err = assert_err!(harness.books.delete_book(book.id, owner).await);
    match &err {
        AppError::AuditLogFailed {
            mutation_committed,
            resource_id,
            ..
        } => {
            assert!(*mutation_committed);
            assert_eq!(resource_id, &book.id.to_string());
        }
        other => panic!("expected AuditLogFailed, got {other:?}"),
    }
    assert!(err.is_operationally_critical());

    // The delete itself went through
    assert!(harness.store.find_book(book.id).await.unwrap().is_none());
}

#[tokio::test]
async fn missing_book_is_not_found() {
    let harness = Harness::new();
    let err = assert_err!(harness.books.delete_book(Uuid::new_v4(), Uuid::new_v4()).await);
    assert!(matches!(err, AppError::BookNotFound { .. }));
    assert!(harness.store.audit_entries().await.is_empty());
}

#[tokio::test]
async fn cache_failures_never_fail_delete() {
    let harness = Harness::new();
    let owner = Uuid::new_v4();
    let book = harness.create("Perdido Street Station", "China Miéville", owner).await;

    harness.cache.fail_all(true);
    harness.store.fail_view_refresh(true);

    let result = assert_ok!(harness.books.delete_book(book.id, owner).await);
    assert!(result.cache.is_degraded());
    assert!(harness.store.find_book(book.id).await.unwrap().is_none());
    assert_eq!(harness.store.audit_entries().await.len(), 1);
}

#[tokio::test]
async fn delete_invalidates_and_rewarms_owner_cache() {
    let harness = Harness::new();
    let owner = Uuid::new_v4();
    let keep = harness.create("The Scar", "China Miéville", owner).await;
    let book = harness.create("Iron Council", "China Miéville", owner).await;

    let result = assert_ok!(harness.books.delete_book(book.id, owner).await);

    assert!(!result.cache.is_degraded());
    assert!(!harness.cache.contains(&keys::book_detail(book.id)).await);
    assert!(harness.cache.contains(&keys::user_recent_books(owner)).await);

    let refreshed = harness.store.refreshed_views().await;
    assert!(refreshed.contains(&DerivedView::ReadingStatistics));
    assert!(refreshed.contains(&DerivedView::PopularityStatistics));

    assert!(harness.store.find_book(keep.id).await.unwrap().is_some());
}
