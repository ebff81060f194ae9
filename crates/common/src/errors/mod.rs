//! Error types for Bookshelf services
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for different failure modes
//! - Classification of storage constraint violations
//! - HTTP status code mapping for the transport layer
//! - Structured error responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::{DbErr, RuntimeErr};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    MissingField,

    // Authentication errors (2xxx)
    Unauthorized,

    // Authorization errors (3xxx)
    Forbidden,
    InsufficientPermissions,

    // Resource errors (4xxx)
    BookNotFound,

    // Conflict errors (5xxx)
    Conflict,
    DuplicateBook,

    // Database errors (7xxx)
    DatabaseError,
    ConnectionError,

    // Side-effect errors (8xxx)
    AuditLogFailed,
    CacheError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,

    // Service unavailable
    ServiceUnavailable,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationError => 1001,
            ErrorCode::MissingField => 1002,

            ErrorCode::Unauthorized => 2001,

            ErrorCode::Forbidden => 3001,
            ErrorCode::InsufficientPermissions => 3002,

            ErrorCode::BookNotFound => 4001,

            ErrorCode::Conflict => 5001,
            ErrorCode::DuplicateBook => 5002,

            ErrorCode::DatabaseError => 7001,
            ErrorCode::ConnectionError => 7002,

            ErrorCode::AuditLogFailed => 8001,
            ErrorCode::CacheError => 8002,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,

            ErrorCode::ServiceUnavailable => 9999,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Required field missing: {field}")]
    MissingField { field: String },

    /// A CHECK, NOT NULL or foreign key constraint rejected the write.
    #[error("Constraint {constraint} violated: {message}")]
    ConstraintViolation { constraint: String, message: String },

    // Authentication errors
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    // Authorization errors
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    /// Ownership violation that has already been recorded as a security event.
    #[error("Insufficient permissions: {message}")]
    InsufficientPermissions { message: String },

    // Resource errors
    #[error("Book not found: {id}")]
    BookNotFound { id: Uuid },

    // Conflict errors
    #[error("Duplicate book: {message}")]
    DuplicateBook {
        message: String,
        existing_id: Option<Uuid>,
    },

    /// Raw uniqueness violation reported by the store, before the service
    /// layer maps it onto a domain error.
    #[error("Unique constraint {constraint} violated")]
    UniqueViolation { constraint: String },

    // Database errors
    #[error("Database error: {0}")]
    Database(DbErr),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    /// The audit trail could not be written. When `mutation_committed` is
    /// set the data change already happened and is now unaudited.
    #[error("Audit log write failed for {operation} on {resource_id}: {message}")]
    AuditLogFailed {
        operation: String,
        resource_id: String,
        mutation_committed: bool,
        message: String,
    },

    #[error("Cache error: {message}")]
    CacheError { message: String },

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Service unavailable: {message}")]
    ServiceUnavailable { message: String },

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::MissingField { .. } => ErrorCode::MissingField,
            AppError::ConstraintViolation { .. } => ErrorCode::ValidationError,
            AppError::Unauthorized { .. } => ErrorCode::Unauthorized,
            AppError::Forbidden { .. } => ErrorCode::Forbidden,
            AppError::InsufficientPermissions { .. } => ErrorCode::InsufficientPermissions,
            AppError::BookNotFound { .. } => ErrorCode::BookNotFound,
            AppError::DuplicateBook { .. } => ErrorCode::DuplicateBook,
            AppError::UniqueViolation { .. } => ErrorCode::Conflict,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::DatabaseConnection { .. } => ErrorCode::ConnectionError,
            AppError::AuditLogFailed { .. } => ErrorCode::AuditLogFailed,
            AppError::CacheError { .. } => ErrorCode::CacheError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::ServiceUnavailable { .. } => ErrorCode::ServiceUnavailable,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. }
            | AppError::MissingField { .. }
            | AppError::ConstraintViolation { .. } => StatusCode::BAD_REQUEST,

            // 401 Unauthorized
            AppError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,

            // 403 Forbidden
            AppError::Forbidden { .. } | AppError::InsufficientPermissions { .. } => {
                StatusCode::FORBIDDEN
            }

            // 404 Not Found
            AppError::BookNotFound { .. } => StatusCode::NOT_FOUND,

            // 409 Conflict
            AppError::DuplicateBook { .. } | AppError::UniqueViolation { .. } => {
                StatusCode::CONFLICT
            }

            // 500 Internal Server Error
            AppError::Database(_)
            | AppError::DatabaseConnection { .. }
            | AppError::AuditLogFailed { .. }
            | AppError::Internal { .. }
            | AppError::Configuration { .. }
            | AppError::Serialization(_)
            | AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 503 Service Unavailable
            AppError::CacheError { .. } | AppError::ServiceUnavailable { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Errors that need an operator, not just a log line.
    pub fn is_operationally_critical(&self) -> bool {
        matches!(self, AppError::AuditLogFailed { .. })
    }

    /// Whether this is a uniqueness violation of the named constraint.
    pub fn is_unique_violation_of(&self, name: &str) -> bool {
        matches!(self, AppError::UniqueViolation { constraint } if constraint == name)
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        // Log based on severity
        if self.is_operationally_critical() {
            tracing::error!(
                error = %message,
                code = ?code,
                code_num = code.as_code(),
                status = status.as_u16(),
                alert = true,
                "Critical server error"
            );
        } else if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                code_num = code.as_code(),
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                code_num = code.as_code(),
                status = status.as_u16(),
                "Client error"
            );
        }

        let details = match &self {
            AppError::DuplicateBook {
                existing_id: Some(id),
                ..
            } => Some(serde_json::json!({ "existing_book_id": id })),
            AppError::AuditLogFailed {
                mutation_committed, ..
            } => Some(serde_json::json!({ "mutation_committed": mutation_committed })),
            AppError::Validation {
                field: Some(field), ..
            } => Some(serde_json::json!({ "field": field })),
            _ => None,
        };

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<DbErr> for AppError {
    fn from(err: DbErr) -> Self {
        classify_constraint(&err).unwrap_or(AppError::Database(err))
    }
}

/// Map Postgres SQLSTATE constraint classes onto typed errors.
fn classify_constraint(err: &DbErr) -> Option<AppError> {
    let runtime = match err {
        DbErr::Exec(runtime) | DbErr::Query(runtime) => runtime,
        _ => return None,
    };
    let RuntimeErr::SqlxError(sqlx_err) = runtime else {
        return None;
    };
    let db_err = sqlx_err.as_database_error()?;
    let constraint = db_err.constraint().unwrap_or("unknown").to_string();

    match db_err.code().as_deref() {
        Some("23505") => Some(AppError::UniqueViolation { constraint }),
        Some("23502") | Some("23503") | Some("23514") => Some(AppError::ConstraintViolation {
            constraint,
            message: db_err.message().to_string(),
        }),
        _ => None,
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::CacheError {
            message: err.to_string(),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        let field = err.field_errors().keys().next().map(|f| f.to_string());
        AppError::Validation {
            message: err.to_string(),
            field,
        }
    }
}
