//! SeaORM entity models
//!
//! Database entities for the book aggregate and its audit trail

mod audit_log;
mod book;
mod book_status;
mod book_tag;
mod note;
mod rating;
mod tag;

pub use book::{
    Entity as BookEntity,
    Model as Book,
    ActiveModel as BookActiveModel,
    Column as BookColumn,
};

pub use book_status::{
    Entity as BookStatusEntity,
    Model as BookStatus,
    ActiveModel as BookStatusActiveModel,
    Column as BookStatusColumn,
    ReadingStatus,
};

pub use rating::{
    Entity as RatingEntity,
    Model as Rating,
    ActiveModel as RatingActiveModel,
    Column as RatingColumn,
    MAX_RATING,
    MIN_RATING,
};

pub use tag::{
    Entity as TagEntity,
    Model as Tag,
    ActiveModel as TagActiveModel,
    Column as TagColumn,
};

pub use book_tag::{
    Entity as BookTagEntity,
    Model as BookTag,
    ActiveModel as BookTagActiveModel,
    Column as BookTagColumn,
};

pub use note::{
    Entity as NoteEntity,
    Model as Note,
    ActiveModel as NoteActiveModel,
    Column as NoteColumn,
};

pub use audit_log::{
    Entity as AuditLogEntity,
    Model as AuditLog,
    ActiveModel as AuditLogActiveModel,
    Column as AuditLogColumn,
};
