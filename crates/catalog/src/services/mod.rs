//! Catalog services
//!
//! `BookService` orchestrates; the tag, audit and cache services are its
//! collaborators and are usable on their own.

pub mod audit;
pub mod book;
pub mod cache;
pub mod tag;

pub use audit::{AuditEntry, AuditService, BookDeletionAuditLog, SecurityEventKind};
pub use book::BookService;
pub use cache::CacheService;
pub use tag::{normalize_tags, TagService};
