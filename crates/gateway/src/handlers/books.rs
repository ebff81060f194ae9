//! Book lifecycle handlers
//!
//! Thin translation between HTTP and `BookService`: input validation,
//! identity from the auth context, and `AppError` into status codes.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use bookshelf_catalog::{
    BookCreationResult, BookDetail, BookPatch, CreateBookInput, DeleteBookResult, DuplicateCheck,
};
use bookshelf_common::{
    auth::AuthContext,
    db::models::Book,
    errors::{AppError, Result},
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct DuplicateQuery {
    pub title: String,
    pub author: String,
}

/// Create a book with optional status, rating and tags
pub async fn create_book(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(input): Json<CreateBookInput>,
) -> Result<(StatusCode, Json<BookCreationResult>)> {
    input.validate()?;

    let result = state
        .books
        .create_book_with_related_data(input, auth.user_id)
        .await?;

    tracing::info!(
        book_id = %result.book.id,
        user_id = %auth.user_id,
        request_id = %auth.request_id,
        "Book created via API"
    );

    Ok((StatusCode::CREATED, Json(result)))
}

/// Get a book as seen by the caller
pub async fn get_book(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<Json<BookDetail>> {
    let detail = state.books.get_book_detail(id, auth.user_id).await?;
    Ok(Json(detail))
}

/// Partially update a book owned by the caller
pub async fn update_book(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(patch): Json<BookPatch>,
) -> Result<Json<Book>> {
    patch.validate()?;

    let book = state.books.update_book(id, auth.user_id, patch).await?;
    Ok(Json(book))
}

/// Delete a book owned by the caller
pub async fn delete_book(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<Json<DeleteBookResult>> {
    let result = state.books.delete_book(id, auth.user_id).await?;

    tracing::info!(
        book_id = %id,
        user_id = %auth.user_id,
        audit_id = %result.audit_id,
        request_id = %auth.request_id,
        "Book deleted via API"
    );

    Ok(Json(result))
}

/// Advisory duplicate lookup for the caller's shelf
pub async fn check_duplicate(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(query): Query<DuplicateQuery>,
) -> Result<Json<DuplicateCheck>> {
    if query.title.trim().is_empty() || query.author.trim().is_empty() {
        return Err(AppError::MissingField {
            field: if query.title.trim().is_empty() { "title" } else { "author" }.to_string(),
        });
    }

    let check = state
        .books
        .check_for_duplicate(&query.title, &query.author, auth.user_id)
        .await?;
    Ok(Json(check))
}
