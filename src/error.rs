//! # Error Handling
//!
//! Unified error handling for the tenant admin API: repository errors with a
//! typed taxonomy, and a problem+json HTTP error carrying a trace id.

use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use sea_orm::{DbErr, RuntimeErr, sqlx::error::DatabaseError as SqlxDatabaseError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use utoipa::ToSchema;

use crate::telemetry;

/// Unified API error response structure
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    /// HTTP status code for the response
    #[serde(skip_serializing, skip_deserializing)]
    pub status: StatusCode,
    /// Error code for programmatic handling
    pub code: Box<str>,
    /// Human-readable error message
    pub message: Box<str>,
    /// Additional error details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Box<serde_json::Value>>,
    /// Suggested retry delay in seconds (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    /// Correlation trace ID for debugging (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    /// Create a new API error with the given status code and message
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into().into_boxed_str(),
            message: message.into().into_boxed_str(),
            details: None,
            retry_after: None,
            trace_id: Self::current_trace_id(),
        }
    }

    /// Add details to the error
    pub fn with_details<V: Into<serde_json::Value>>(mut self, details: V) -> Self {
        self.details = Some(Box::new(details.into()));
        self
    }

    /// Set retry after delay
    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    /// Trace id of the active request, or a generated correlation id.
    fn current_trace_id() -> Option<Box<str>> {
        telemetry::current_trace_id()
            .map(|trace_id| trace_id.into_boxed_str())
            .or_else(|| {
                Some(format!("corr-{}", &uuid::Uuid::new_v4().to_string()[..8]).into_boxed_str())
            })
    }
}

/// Errors surfaced by the repository layer.
///
/// Constraint violations reported by the database are classified so callers
/// can tell "already exists" and "missing parent row" apart from genuine
/// database failures.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    ForeignKey(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("crypto error: {0}")]
    Crypto(#[from] crate::crypto::CryptoError),
    #[error("database error: {0}")]
    Database(DbErr),
}

impl RepositoryError {
    /// Classifies a SeaORM error. Use with `map_err`.
    pub fn database_error(error: DbErr) -> Self {
        if is_unique_violation(&error) {
            return Self::Conflict("resource already exists".to_string());
        }
        if is_foreign_key_violation(&error) {
            return Self::ForeignKey("referenced record does not exist".to_string());
        }
        if let DbErr::RecordNotFound(record) = error {
            return Self::NotFound(record);
        }
        Self::Database(error)
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Replaces the generic conflict message with an entity specific one.
    pub fn conflict_as(self, message: impl Into<String>) -> Self {
        match self {
            Self::Conflict(_) => Self::Conflict(message.into()),
            other => other,
        }
    }
}

impl From<DbErr> for RepositoryError {
    fn from(error: DbErr) -> Self {
        Self::database_error(error)
    }
}

fn sqlx_database_error(error: &DbErr) -> Option<&(dyn SqlxDatabaseError + 'static)> {
    let sqlx_err = match error {
        DbErr::Query(RuntimeErr::SqlxError(sqlx_err))
        | DbErr::Exec(RuntimeErr::SqlxError(sqlx_err))
        | DbErr::Conn(RuntimeErr::SqlxError(sqlx_err)) => sqlx_err,
        _ => return None,
    };
    sqlx_err.as_database_error()
}

fn is_unique_violation(error: &DbErr) -> bool {
    const PG_UNIQUE: &str = "23505";
    const MYSQL_DUPLICATE_CODES: &[&str] = &["1022", "1062", "1169", "1586"];
    const SQLITE_DUPLICATE_CODES: &[&str] = &["1555", "2067"];

    let Some(db_error) = sqlx_database_error(error) else {
        return false;
    };

    if db_error.is_unique_violation() {
        return true;
    }

    db_error.code().is_some_and(|code| {
        let code = code.as_ref();
        code == PG_UNIQUE
            || MYSQL_DUPLICATE_CODES.contains(&code)
            || SQLITE_DUPLICATE_CODES.contains(&code)
    })
}

fn is_foreign_key_violation(error: &DbErr) -> bool {
    const PG_FOREIGN_KEY: &str = "23503";
    const SQLITE_FOREIGN_KEY: &str = "787";

    let Some(db_error) = sqlx_database_error(error) else {
        return false;
    };

    if db_error.is_foreign_key_violation() {
        return true;
    }

    db_error
        .code()
        .is_some_and(|code| matches!(code.as_ref(), PG_FOREIGN_KEY | SQLITE_FOREIGN_KEY))
}

/// Failure reported by an upstream HTTP service (token endpoint, admin API)
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpstreamError {
    /// Upstream service identifier (e.g. "token_endpoint")
    pub service: String,
    /// HTTP status code from upstream, when a response was received
    pub status: Option<u16>,
    /// Response body snippet from upstream (truncated)
    pub body_snippet: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );

        if let Some(retry_after) = self.retry_after
            && let Ok(header_value) = HeaderValue::from_str(&retry_after.to_string())
        {
            headers.insert("retry-after", header_value);
        }

        (self.status, headers, axum::Json(self)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        tracing::error!("Internal error: {:?}", error);

        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "An internal error occurred",
        )
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::JsonDataError(err) => format!("Invalid JSON: {}", err),
            JsonRejection::JsonSyntaxError(err) => format!("JSON syntax error: {}", err),
            JsonRejection::MissingJsonContentType(_) => {
                "Missing 'Content-Type: application/json' header".to_string()
            }
            _ => "Invalid request body".to_string(),
        };

        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message)
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        let message = match rejection {
            PathRejection::FailedToDeserializePathParams(err) => {
                format!("Invalid path parameter: {}", err.body_text())
            }
            _ => "Invalid path parameters".to_string(),
        };

        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message)
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_FAILED",
            format!("Invalid query string: {}", rejection.body_text()),
        )
    }
}

impl From<DbErr> for ApiError {
    fn from(error: DbErr) -> Self {
        RepositoryError::database_error(error).into()
    }
}

impl From<RepositoryError> for ApiError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::NotFound(what) => {
                Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", format!("{what} not found"))
            }
            RepositoryError::Conflict(message) => {
                tracing::debug!(%message, "Unique constraint violation detected");
                Self::new(StatusCode::CONFLICT, "CONFLICT", message)
            }
            RepositoryError::ForeignKey(message) => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "FOREIGN_KEY_VIOLATION",
                message,
            ),
            RepositoryError::Validation(message) => {
                Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message)
            }
            RepositoryError::Crypto(err) => {
                tracing::error!(error = %err, "Secret encryption failure");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "Failed to process stored secret",
                )
            }
            RepositoryError::Database(DbErr::Conn(connection_err)) => {
                tracing::error!("Database connection error: {:?}", connection_err);
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Database service unavailable",
                )
            }
            RepositoryError::Database(db_err) => {
                tracing::error!("Database error: {:?}", db_err);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "Database error occurred",
                )
            }
        }
    }
}

/// Create an upstream service error (502 UPSTREAM_ERROR)
pub fn upstream_error(service: &str, status: Option<u16>, body: Option<String>) -> ApiError {
    let upstream = UpstreamError {
        service: service.to_string(),
        status,
        body_snippet: body.map(|b| {
            if b.chars().count() > 200 {
                let truncated: String = b.chars().take(200).collect();
                format!("{}...", truncated)
            } else {
                b
            }
        }),
    };

    let message = match status {
        Some(status) => format!("Upstream {service} returned error status {status}"),
        None => format!("Upstream {service} request failed"),
    };

    ApiError::new(StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", message).with_details(json!(upstream))
}

/// Create an unauthorized error (401)
pub fn unauthorized(message: Option<&str>) -> ApiError {
    let msg = message.unwrap_or("Authentication required");
    ApiError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg)
}

/// Create a validation error with field details
pub fn validation_error(message: &str, field_errors: serde_json::Value) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message).with_details(field_errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use serde_json::json;

    #[test]
    fn test_api_error_basic() {
        let error = ApiError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_FAILED",
            "Test error message",
        );

        assert_eq!(error.code, Box::from("VALIDATION_FAILED"));
        assert_eq!(error.message, Box::from("Test error message"));
        assert_eq!(error.details, None);
        assert_eq!(error.retry_after, None);
    }

    #[test]
    fn test_content_type_and_retry_after_headers() {
        let error = ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", "busy")
            .with_retry_after(30);

        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/problem+json"
        );
        assert_eq!(response.headers().get("retry-after").unwrap(), "30");
    }

    #[test]
    fn test_trace_id_generation() {
        let error = ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "Test error",
        );

        let trace_id = error.trace_id.unwrap();
        assert!(trace_id.starts_with("corr-"));
        assert_eq!(trace_id.len(), 13);
    }

    #[test]
    fn test_repository_error_status_mapping() {
        let cases = [
            (
                RepositoryError::not_found("user"),
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
            ),
            (
                RepositoryError::Conflict("email already registered".into()),
                StatusCode::CONFLICT,
                "CONFLICT",
            ),
            (
                RepositoryError::ForeignKey("customer does not exist".into()),
                StatusCode::UNPROCESSABLE_ENTITY,
                "FOREIGN_KEY_VIOLATION",
            ),
            (
                RepositoryError::validation_error("name must not be empty"),
                StatusCode::BAD_REQUEST,
                "VALIDATION_FAILED",
            ),
            (
                RepositoryError::Database(DbErr::Custom("boom".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_SERVER_ERROR",
            ),
        ];

        for (error, status, code) in cases {
            let api_error: ApiError = error.into();
            assert_eq!(api_error.status, status);
            assert_eq!(api_error.code.as_ref(), code);
        }
    }

    #[test]
    fn test_record_not_found_is_classified() {
        let error = RepositoryError::database_error(DbErr::RecordNotFound("tenant".into()));
        assert!(matches!(error, RepositoryError::NotFound(ref what) if what == "tenant"));

        let api_error: ApiError = DbErr::RecordNotFound("tenant".into()).into();
        assert_eq!(api_error.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_conflict_as_only_rewrites_conflicts() {
        let error = RepositoryError::Conflict("resource already exists".into())
            .conflict_as("customer name already taken");
        assert_eq!(error.to_string(), "customer name already taken");

        let error = RepositoryError::not_found("customer").conflict_as("ignored");
        assert!(matches!(error, RepositoryError::NotFound(_)));
    }

    #[test]
    fn test_upstream_error_truncates_utf8_safely() {
        let body = "déjà vu ✓ ".repeat(40);
        let error = upstream_error("admin_api", Some(503), Some(body));

        assert_eq!(error.status, StatusCode::BAD_GATEWAY);
        assert_eq!(error.code.as_ref(), "UPSTREAM_ERROR");

        let details = error.details.unwrap();
        let snippet = details["body_snippet"].as_str().unwrap();
        assert!(snippet.ends_with("..."));
        assert_eq!(snippet.chars().count(), 203);
        assert_eq!(details["status"], 503);
    }

    #[test]
    fn test_auth_error_helpers() {
        let auth_error = unauthorized(None);
        assert_eq!(auth_error.status, StatusCode::UNAUTHORIZED);
        assert_eq!(auth_error.message, Box::from("Authentication required"));

        let auth_error = unauthorized(Some("Invalid operator token"));
        assert_eq!(auth_error.message, Box::from("Invalid operator token"));
    }

    #[test]
    fn test_validation_error_with_details() {
        let field_errors = json!({ "email": "invalid email address" });
        let error = validation_error("Validation failed", field_errors.clone());

        assert_eq!(error.status, StatusCode::BAD_REQUEST);
        assert_eq!(error.details, Some(Box::new(field_errors)));
    }
}
