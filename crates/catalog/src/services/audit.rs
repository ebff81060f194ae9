//! Append-only audit trail for destructive and security-relevant operations
//!
//! Unlike the cache, failures here always reach the caller as
//! `AppError::AuditLogFailed`. Every entry is also emitted as a structured
//! event on the `audit` tracing target so a log aggregator holds a copy.

use bookshelf_common::db::models::{AuditLog, Book};
use bookshelf_common::db::ports::{AuditSink, DependentCounts};
use bookshelf_common::errors::{AppError, Result};
use bookshelf_common::metrics;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

pub const BOOK_RESOURCE: &str = "book";
pub const OP_BOOK_DELETE: &str = "BOOK_DELETE";

/// Kinds of security events recorded in the audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityEventKind {
    /// An authenticated user tried to mutate something they do not own
    PermissionDenied,
}

impl SecurityEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEventKind::PermissionDenied => "PERMISSION_DENIED",
        }
    }
}

/// A new audit entry before it is stamped with an id and timestamp
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub operation: String,
    pub resource_type: String,
    pub resource_id: String,
    pub user_id: Uuid,
    pub metadata: serde_json::Value,
}

/// Snapshot of a book taken right before it is deleted
#[derive(Debug, Clone, Serialize)]
pub struct BookDeletionAuditLog {
    book_id: Uuid,
    title: String,
    author: String,
    isbn: Option<String>,
    deleted_by: Uuid,
    deleted_at: DateTime<Utc>,
    deleted_related_data: DependentCounts,
}

impl BookDeletionAuditLog {
    pub fn snapshot(book: &Book, deleted_by: Uuid, deleted_related_data: DependentCounts) -> Self {
        Self {
            book_id: book.id,
            title: book.title.clone(),
            author: book.author.clone(),
            isbn: book.isbn.clone(),
            deleted_by,
            deleted_at: Utc::now(),
            deleted_related_data,
        }
    }
}

/// Writes audit entries to the sink
pub struct AuditService {
    sink: Arc<dyn AuditSink>,
}

impl AuditService {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// Append a generic entry
    pub async fn create_audit_log(&self, entry: AuditEntry) -> Result<AuditLog> {
        self.write(entry, false).await
    }

    /// Record a committed book deletion. A failure means the book is gone
    /// but the trail does not show it.
    pub async fn log_book_deletion(&self, snapshot: &BookDeletionAuditLog) -> Result<Uuid> {
        let entry = AuditEntry {
            operation: OP_BOOK_DELETE.to_string(),
            resource_type: BOOK_RESOURCE.to_string(),
            resource_id: snapshot.book_id.to_string(),
            user_id: snapshot.deleted_by,
            metadata: serde_json::to_value(snapshot)?,
        };

        Ok(self.write(entry, true).await?.id)
    }

    /// Record a security-relevant event such as a denied mutation
    pub async fn log_security_event(
        &self,
        kind: SecurityEventKind,
        resource_type: &str,
        resource_id: &str,
        user_id: Uuid,
        metadata: serde_json::Value,
    ) -> Result<Uuid> {
        let entry = AuditEntry {
            operation: kind.as_str().to_string(),
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            user_id,
            metadata: json!({
                "security_event": kind,
                "details": metadata,
            }),
        };

        Ok(self.write(entry, false).await?.id)
    }

    /// Entries recorded for one resource, oldest first
    pub async fn entries_for_resource(&self, resource_type: &str, resource_id: &str) -> Result<Vec<AuditLog>> {
        let mut entries = self.sink.entries_for_resource(resource_type, resource_id).await?;
        entries.sort_by_key(|e| e.created_at);
        Ok(entries)
    }

    async fn write(&self, entry: AuditEntry, mutation_committed: bool) -> Result<AuditLog> {
        let row = AuditLog {
            id: Uuid::new_v4(),
            operation: entry.operation,
            resource_type: entry.resource_type,
            resource_id: entry.resource_id,
            user_id: entry.user_id,
            metadata: entry.metadata,
            created_at: Utc::now().into(),
        };

        match self.sink.append(row.clone()).await {
            Ok(()) => {
                metrics::record_audit_write(&row.operation, true);
                info!(
                    target: "audit",
                    audit_id = %row.id,
                    operation = %row.operation,
                    resource_type = %row.resource_type,
                    resource_id = %row.resource_id,
                    user_id = %row.user_id,
                    metadata = %row.metadata,
                    "Audit entry recorded"
                );
                Ok(row)
            }
            Err(e) => {
                metrics::record_audit_write(&row.operation, false);
                error!(
                    target: "audit",
                    alert = true,
                    operation = %row.operation,
                    resource_id = %row.resource_id,
                    user_id = %row.user_id,
                    mutation_committed,
                    metadata = %row.metadata,
                    error = %e,
                    "Audit entry could not be persisted"
                );
                Err(AppError::AuditLogFailed {
                    operation: row.operation,
                    resource_id: row.resource_id,
                    mutation_committed,
                    message: e.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bookshelf_common::db::MemoryStore;
    use tokio_test::assert_ok;

    fn entry(resource_id: &str) -> AuditEntry {
        AuditEntry {
            operation: "BOOK_EXPORT".to_string(),
            resource_type: BOOK_RESOURCE.to_string(),
            resource_id: resource_id.to_string(),
            user_id: Uuid::new_v4(),
            metadata: json!({ "format": "csv" }),
        }
    }

    #[tokio::test]
    async fn test_each_entry_gets_its_own_id() {
        let store = Arc::new(MemoryStore::new());
        let audit = AuditService::new(store.clone());

        let first = assert_ok!(audit.create_audit_log(entry("b1")).await);
        let second = assert_ok!(audit.create_audit_log(entry("b1")).await);
        assert_ne!(first.id, second.id);

        let entries = audit.entries_for_resource(BOOK_RESOURCE, "b1").await.unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn test_security_event_metadata() {
        let store = Arc::new(MemoryStore::new());
        let audit = AuditService::new(store.clone());
        let user = Uuid::new_v4();

        audit
            .log_security_event(
                SecurityEventKind::PermissionDenied,
                BOOK_RESOURCE,
                "b2",
                user,
                json!({ "attempted_operation": "delete" }),
            )
            .await
            .unwrap();

        let entries = store.audit_entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].operation, "PERMISSION_DENIED");
        assert_eq!(entries[0].user_id, user);
        assert_eq!(entries[0].metadata["security_event"], "PERMISSION_DENIED");
        assert_eq!(entries[0].metadata["details"]["attempted_operation"], "delete");
    }

    #[tokio::test]
    async fn test_sink_failure_is_surfaced() {
        let store = Arc::new(MemoryStore::new());
        store.fail_audit_writes(true);
        let audit = AuditService::new(store.clone());

        let err = audit.create_audit_log(entry("b3")).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::AuditLogFailed { mutation_committed: false, .. }
        ));
        assert!(err.is_operationally_critical());
    }
}
