//! Typed errors and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing reference: {kind} '{id}'")]
    MissingReference { kind: &'static str, id: String },
    #[error("model inheritance cycle through '{0}'")]
    InheritanceCycle(String),
    #[error("duplicate public route: {0}")]
    DuplicateRoute(String),
    #[error("unknown validation '{name}' on field '{field}'")]
    UnknownValidation { field: String, name: String },
    #[error("config load: {0}")]
    Load(String),
    #[error("validation: {0}")]
    Validation(String),
}

/// Failures raised by a Data Store implementation.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid id: {0}")]
    InvalidId(String),
    #[error("unsupported query: {0}")]
    Query(String),
    #[error("database: {0}")]
    Backend(#[from] sqlx::Error),
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failures reported by an interceptor during a pipeline run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HookError {
    #[error("{0}")]
    Rejected(String),
    #[error("{0}")]
    Validation(String),
    #[error("hook changed the shape of '{0}'")]
    ShapeMismatch(String),
}

impl HookError {
    pub fn rejected(message: impl Into<String>) -> Self {
        HookError::Rejected(message.into())
    }
}

/// Programming errors around the response envelope. Not converted into HTTP responses.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ResponseError {
    #[error("no response sink bound to envelope")]
    MissingSink,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    MissingParameter(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Hook(HookError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<HookError> for ApiError {
    fn from(err: HookError) -> Self {
        match err {
            HookError::Validation(msg) => ApiError::Validation(msg),
            other => ApiError::Hook(other),
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::MissingParameter(_) | ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            // Validation failures keep the historical 500 mapping.
            ApiError::Validation(_) | ApiError::Hook(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Store(StoreError::InvalidId(_)) => StatusCode::BAD_REQUEST,
            ApiError::Store(_) | ApiError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show to the caller. Store and config internals are not leaked.
    pub fn public_message(&self) -> String {
        match self {
            ApiError::Store(StoreError::InvalidId(_)) => "Invalid ID".into(),
            ApiError::Store(_) | ApiError::Config(_) => "An internal server error occurred".into(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = crate::response::error_body(status.as_u16(), self.public_message());
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_failures_hide_details() {
        let err = ApiError::Store(StoreError::Query("column doc missing".into()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.public_message(), "An internal server error occurred");
    }

    #[test]
    fn hook_validation_becomes_validation_error() {
        let err: ApiError = HookError::Validation("title is required".into()).into();
        assert!(matches!(err, ApiError::Validation(_)));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.public_message(), "title is required");
    }

    #[test]
    fn missing_parameter_is_404() {
        assert_eq!(ApiError::MissingParameter("Missing field".into()).status(), StatusCode::NOT_FOUND);
    }
}
