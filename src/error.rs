//! Error types shared by the storage, tool and HTTP layers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

#[derive(Debug, thiserror::Error)]
pub enum ConciergeError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("LLM error: {0}")]
    Llm(String),
    #[error("Unsafe SQL rejected: {0}")]
    UnsafeSql(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for ConciergeError {
    fn from(err: anyhow::Error) -> Self {
        ConciergeError::Internal(format!("{:#}", err))
    }
}

impl ConciergeError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Validation(_) | Self::UnsafeSql(_) => StatusCode::BAD_REQUEST,
            Self::Llm(_) => StatusCode::BAD_GATEWAY,
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ConciergeError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

pub type ConciergeResult<T> = std::result::Result<T, ConciergeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ConciergeError::Validation("empty".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ConciergeError::NotFound("project".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ConciergeError::Llm("timeout".into()).status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_from_anyhow_keeps_context() {
        let err: ConciergeError = anyhow::anyhow!("inner").context("outer").into();
        assert!(err.to_string().contains("outer"));
        assert!(err.to_string().contains("inner"));
    }
}
