//! Request identity
//!
//! Authentication happens upstream; the proxy forwards the resolved user
//! in the `X-User-Id` header. This module only turns that header into an
//! `AuthContext` the handlers can hand to the services.

use crate::errors::{AppError, Result};
use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Extracted authentication context available to handlers
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Authenticated user
    pub user_id: Uuid,

    /// Request ID for tracing
    pub request_id: String,
}

impl AuthContext {
    fn from_parts(parts: &Parts) -> Result<Self> {
        let request_id = parts
            .headers
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s.trim()).ok())
            .ok_or_else(|| AppError::Unauthorized {
                message: "Missing or invalid X-User-Id header".to_string(),
            })?;

        Ok(AuthContext { user_id, request_id })
    }
}

/// Axum extractor for AuthContext
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        Self::from_parts(parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts_with(headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().uri("/v1/books");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_user_header_is_required() {
        let parts = parts_with(&[]);
        let err = AuthContext::from_parts(&parts).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized { .. }));
    }

    #[test]
    fn test_user_and_request_id_extracted() {
        let user = Uuid::new_v4();
        let parts = parts_with(&[
            (USER_ID_HEADER, &user.to_string()),
            (REQUEST_ID_HEADER, "req-42"),
        ]);
        let ctx = AuthContext::from_parts(&parts).unwrap();
        assert_eq!(ctx.user_id, user);
        assert_eq!(ctx.request_id, "req-42");
    }

    #[test]
    fn test_malformed_user_id_rejected() {
        let parts = parts_with(&[(USER_ID_HEADER, "not-a-uuid")]);
        assert!(AuthContext::from_parts(&parts).is_err());
    }
}
