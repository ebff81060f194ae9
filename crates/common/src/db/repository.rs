//! Repository pattern for database operations
//!
//! Postgres implementation of the storage ports. Multi-row writes rely on
//! the schema's constraints (unique natural keys, cascading foreign keys)
//! rather than on application transactions.

use crate::db::models::*;
use crate::db::ports::*;
use crate::db::DbPool;
use crate::errors::Result;
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, Statement, Value,
};
use tracing::debug;
use uuid::Uuid;

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the read connection
    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    /// Get the write connection
    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }
}

// ============================================================================
// Book Operations
// ============================================================================

#[async_trait]
impl BookStore for Repository {
    async fn find_book(&self, id: Uuid) -> Result<Option<Book>> {
        BookEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn find_book_by_natural_key(
        &self,
        title: &str,
        author: &str,
        owner: Uuid,
        exclude: Option<Uuid>,
    ) -> Result<Option<Book>> {
        let mut query = BookEntity::find()
            .filter(BookColumn::Title.eq(title))
            .filter(BookColumn::Author.eq(author))
            .filter(BookColumn::CreatedBy.eq(owner));

        if let Some(id) = exclude {
            query = query.filter(BookColumn::Id.ne(id));
        }

        // Primary, not the replica: a lagging replica widens the race window
        query.one(self.write_conn()).await.map_err(Into::into)
    }

    async fn insert_book(&self, book: NewBook) -> Result<Book> {
        let now = Utc::now();

        let model = BookActiveModel {
            id: Set(Uuid::new_v4()),
            title: Set(book.title),
            author: Set(book.author),
            isbn: Set(book.isbn),
            cover_url: Set(book.cover_url),
            description: Set(book.description),
            created_by: Set(book.created_by),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        model.insert(self.write_conn()).await.map_err(Into::into)
    }

    async fn update_book(&self, id: Uuid, owner: Uuid, changes: BookChanges) -> Result<Option<Book>> {
        let now = Utc::now();

        let mut update = BookEntity::update_many()
            .col_expr(BookColumn::UpdatedAt, Expr::value(Value::from(now)));

        if let Some(title) = changes.title {
            update = update.col_expr(BookColumn::Title, Expr::value(title));
        }
        if let Some(author) = changes.author {
            update = update.col_expr(BookColumn::Author, Expr::value(author));
        }
        if let Some(isbn) = changes.isbn {
            update = update.col_expr(BookColumn::Isbn, Expr::value(isbn));
        }
        if let Some(cover_url) = changes.cover_url {
            update = update.col_expr(BookColumn::CoverUrl, Expr::value(cover_url));
        }
        if let Some(description) = changes.description {
            update = update.col_expr(BookColumn::Description, Expr::value(description));
        }

        let result = update
            .filter(BookColumn::Id.eq(id))
            .filter(BookColumn::CreatedBy.eq(owner))
            .exec(self.write_conn())
            .await?;

        if result.rows_affected == 0 {
            return Ok(None);
        }

        BookEntity::find_by_id(id)
            .one(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn delete_book(&self, id: Uuid, owner: Uuid) -> Result<bool> {
        let result = BookEntity::delete_many()
            .filter(BookColumn::Id.eq(id))
            .filter(BookColumn::CreatedBy.eq(owner))
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected > 0)
    }

    async fn insert_status(&self, status: NewBookStatus) -> Result<BookStatus> {
        let model = BookStatusActiveModel {
            book_id: Set(status.book_id),
            user_id: Set(status.user_id),
            status: Set(status.status.into()),
            started_at: Set(status.started_at),
            finished_at: Set(status.finished_at),
            updated_at: Set(Utc::now().into()),
        };

        model.insert(self.write_conn()).await.map_err(Into::into)
    }

    async fn find_status(&self, book_id: Uuid, user_id: Uuid) -> Result<Option<BookStatus>> {
        BookStatusEntity::find_by_id((book_id, user_id))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn insert_rating(&self, rating: NewRating) -> Result<Rating> {
        let now = Utc::now();

        let model = RatingActiveModel {
            id: Set(Uuid::new_v4()),
            book_id: Set(rating.book_id),
            user_id: Set(rating.user_id),
            rating: Set(rating.rating),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        model.insert(self.write_conn()).await.map_err(Into::into)
    }

    async fn find_rating(&self, book_id: Uuid, user_id: Uuid) -> Result<Option<Rating>> {
        RatingEntity::find()
            .filter(RatingColumn::BookId.eq(book_id))
            .filter(RatingColumn::UserId.eq(user_id))
            .order_by_desc(RatingColumn::UpdatedAt)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn count_dependents(&self, book_id: Uuid) -> Result<DependentCounts> {
        // Counted on the primary so the snapshot matches what the delete removes
        let conn = self.write_conn();

        let (book_statuses, ratings, notes, book_tags) = futures::try_join!(
            BookStatusEntity::find()
                .filter(BookStatusColumn::BookId.eq(book_id))
                .count(conn),
            RatingEntity::find()
                .filter(RatingColumn::BookId.eq(book_id))
                .count(conn),
            NoteEntity::find()
                .filter(NoteColumn::BookId.eq(book_id))
                .count(conn),
            BookTagEntity::find()
                .filter(BookTagColumn::BookId.eq(book_id))
                .count(conn),
        )?;

        Ok(DependentCounts {
            book_statuses,
            ratings,
            notes,
            book_tags,
        })
    }

    async fn count_notes(&self, book_id: Uuid, user_id: Uuid) -> Result<u64> {
        NoteEntity::find()
            .filter(NoteColumn::BookId.eq(book_id))
            .filter(NoteColumn::UserId.eq(user_id))
            .count(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn recent_books(&self, owner: Uuid, limit: u64) -> Result<Vec<Book>> {
        BookEntity::find()
            .filter(BookColumn::CreatedBy.eq(owner))
            .order_by_desc(BookColumn::CreatedAt)
            .limit(limit)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn reading_stats(&self, owner: Uuid) -> Result<ReadingStats> {
        let conn = self.read_conn();

        let total_books = BookEntity::find()
            .filter(BookColumn::CreatedBy.eq(owner))
            .count(conn)
            .await?;

        let statuses = BookStatusEntity::find()
            .filter(BookStatusColumn::UserId.eq(owner))
            .all(conn)
            .await?;

        let mut stats = ReadingStats {
            total_books,
            ..Default::default()
        };
        for status in statuses.iter().filter_map(|s| s.reading_status()) {
            match status {
                ReadingStatus::WantToRead => stats.want_to_read += 1,
                ReadingStatus::Reading => stats.reading += 1,
                ReadingStatus::Finished => stats.finished += 1,
            }
        }

        Ok(stats)
    }
}

// ============================================================================
// Tag Operations
// ============================================================================

#[async_trait]
impl TagStore for Repository {
    async fn find_tags_by_names(&self, names: &[String]) -> Result<Vec<Tag>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }

        TagEntity::find()
            .filter(TagColumn::Name.is_in(names.iter().cloned()))
            .all(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn insert_tags(&self, names: &[String]) -> Result<Vec<Tag>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let tags: Vec<Tag> = names
            .iter()
            .map(|name| Tag {
                id: Uuid::new_v4(),
                name: name.clone(),
                created_at: now.into(),
            })
            .collect();

        let models = tags.iter().map(|tag| TagActiveModel {
            id: Set(tag.id),
            name: Set(tag.name.clone()),
            created_at: Set(tag.created_at),
        });

        TagEntity::insert_many(models)
            .exec(self.write_conn())
            .await?;

        debug!(count = tags.len(), "Tags inserted");
        Ok(tags)
    }

    async fn linked_tag_ids(&self, book_id: Uuid) -> Result<Vec<Uuid>> {
        let links = BookTagEntity::find()
            .filter(BookTagColumn::BookId.eq(book_id))
            .all(self.write_conn())
            .await?;

        Ok(links.into_iter().map(|link| link.tag_id).collect())
    }

    async fn link_tags(&self, book_id: Uuid, tag_ids: &[Uuid]) -> Result<u64> {
        if tag_ids.is_empty() {
            return Ok(0);
        }

        // One statement for the whole batch; existing pairs are skipped
        let placeholders = (0..tag_ids.len())
            .map(|i| format!("($1, ${}, NOW())", i + 2))
            .collect::<Vec<_>>()
            .join(", ");

        let sql = format!(
            r#"
            INSERT INTO book_tags (book_id, tag_id, created_at)
            VALUES {}
            ON CONFLICT (book_id, tag_id) DO NOTHING
            "#,
            placeholders
        );

        let mut values: Vec<Value> = Vec::with_capacity(tag_ids.len() + 1);
        values.push(book_id.into());
        values.extend(tag_ids.iter().map(|id| Value::from(*id)));

        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, &sql, values);
        let result = self.write_conn().execute(stmt).await?;

        Ok(result.rows_affected())
    }

    async fn tags_for_book(&self, book_id: Uuid) -> Result<Vec<Tag>> {
        let tag_ids = self.linked_tag_ids(book_id).await?;
        if tag_ids.is_empty() {
            return Ok(Vec::new());
        }

        TagEntity::find()
            .filter(TagColumn::Id.is_in(tag_ids))
            .order_by_asc(TagColumn::Name)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }
}

// ============================================================================
// Audit Operations
// ============================================================================

#[async_trait]
impl AuditSink for Repository {
    async fn append(&self, entry: AuditLog) -> Result<()> {
        let model = AuditLogActiveModel {
            id: Set(entry.id),
            operation: Set(entry.operation),
            resource_type: Set(entry.resource_type),
            resource_id: Set(entry.resource_id),
            user_id: Set(entry.user_id),
            metadata: Set(entry.metadata),
            created_at: Set(entry.created_at),
        };

        AuditLogEntity::insert(model)
            .exec(self.write_conn())
            .await?;

        Ok(())
    }

    async fn entries_for_resource(&self, resource_type: &str, resource_id: &str) -> Result<Vec<AuditLog>> {
        AuditLogEntity::find()
            .filter(AuditLogColumn::ResourceType.eq(resource_type))
            .filter(AuditLogColumn::ResourceId.eq(resource_id))
            .order_by_asc(AuditLogColumn::CreatedAt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }
}

// ============================================================================
// Derived Views
// ============================================================================

#[async_trait]
impl DerivedViews for Repository {
    async fn refresh_view(&self, view: DerivedView) -> Result<()> {
        let sql = format!("REFRESH MATERIALIZED VIEW CONCURRENTLY {}", view.view_name());
        self.write_conn().execute_unprepared(&sql).await?;

        debug!(view = view.view_name(), "Materialized view refreshed");
        Ok(())
    }
}
