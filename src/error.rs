//! Domain-specific error types for lituk

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Main error type for the lituk service
#[derive(Error, Debug)]
pub enum LitukError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Database error: {message}")]
    Database { message: String },

    #[error("Embedding provider error: {message}")]
    Embedding { message: String },

    #[error("LLM provider error: {message}")]
    Llm { message: String },

    #[error("PDF error: {message}")]
    Pdf { message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Timeout error: {operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Feature disabled: {message}")]
    FeatureDisabled { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl LitukError {
    pub fn validation(message: impl Into<String>) -> Self {
        LitukError::Validation {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        LitukError::NotFound {
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        LitukError::Unauthorized {
            message: message.into(),
        }
    }

    /// HTTP status, short label and details for this error
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            LitukError::Config { message } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Configuration error",
                message.clone(),
            ),
            LitukError::Database { message } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Database error",
                message.clone(),
            ),
            LitukError::Embedding { message } => {
                (StatusCode::BAD_GATEWAY, "Embedding error", message.clone())
            }
            LitukError::Llm { message } => (StatusCode::BAD_GATEWAY, "LLM error", message.clone()),
            LitukError::Pdf { message } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "PDF error",
                message.clone(),
            ),
            LitukError::Serialization { message } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Serialization error",
                message.clone(),
            ),
            LitukError::Timeout {
                operation,
                timeout_ms,
            } => (
                StatusCode::GATEWAY_TIMEOUT,
                "Operation timeout",
                format!("{operation} timed out after {timeout_ms}ms"),
            ),
            LitukError::Validation { message } => {
                (StatusCode::BAD_REQUEST, "Validation error", message.clone())
            }
            LitukError::NotFound { message } => {
                (StatusCode::NOT_FOUND, "Not found", message.clone())
            }
            LitukError::Unauthorized { message } => {
                (StatusCode::UNAUTHORIZED, "Unauthorized", message.clone())
            }
            LitukError::Forbidden { message } => {
                (StatusCode::FORBIDDEN, "Forbidden", message.clone())
            }
            LitukError::Conflict { message } => {
                (StatusCode::CONFLICT, "Conflict", message.clone())
            }
            LitukError::FeatureDisabled { message } => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Feature disabled",
                message.clone(),
            ),
            LitukError::Internal { message } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error",
                message.clone(),
            ),
        }
    }
}

impl From<anyhow::Error> for LitukError {
    fn from(err: anyhow::Error) -> Self {
        LitukError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for LitukError {
    fn from(err: serde_json::Error) -> Self {
        LitukError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<rusqlite::Error> for LitukError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => LitukError::NotFound {
                message: "record not found".to_string(),
            },
            rusqlite::Error::SqliteFailure(e, msg)
                if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                LitukError::Conflict {
                    message: msg.unwrap_or_else(|| "record already exists".to_string()),
                }
            }
            other => LitukError::Database {
                message: other.to_string(),
            },
        }
    }
}

impl From<reqwest::Error> for LitukError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return LitukError::Timeout {
                operation: "HTTP request".to_string(),
                timeout_ms: 0,
            };
        }
        LitukError::Internal {
            message: format!("HTTP request failed: {}", err),
        }
    }
}

impl From<chrono::ParseError> for LitukError {
    fn from(err: chrono::ParseError) -> Self {
        LitukError::Validation {
            message: format!("Date parsing error: {}", err),
        }
    }
}

/// Convert LitukError to a JSON HTTP response
impl IntoResponse for LitukError {
    fn into_response(self) -> Response {
        let (status, label, details) = self.parts();
        if status.is_server_error() {
            tracing::error!("{label}: {details}");
        }
        (
            status,
            axum::Json(json!({
                "error": {
                    "code": status.as_u16(),
                    "message": format!("{label}: {details}"),
                }
            })),
        )
            .into_response()
    }
}

/// Result type alias for lituk operations
pub type Result<T> = std::result::Result<T, LitukError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_rows_maps_to_not_found() {
        let err: LitukError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, LitukError::NotFound { .. }));
    }

    #[test]
    fn unique_violation_maps_to_conflict() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (k TEXT UNIQUE); INSERT INTO t VALUES ('a');")
            .unwrap();
        let err: LitukError = conn
            .execute("INSERT INTO t VALUES ('a')", [])
            .unwrap_err()
            .into();
        assert!(matches!(err, LitukError::Conflict { .. }));
    }

    #[test]
    fn statuses_follow_variant() {
        assert_eq!(
            LitukError::validation("bad").into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            LitukError::unauthorized("nope").into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        let conflict = LitukError::Conflict {
            message: "dup".into(),
        };
        assert_eq!(conflict.into_response().status(), StatusCode::CONFLICT);
    }
}
