use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{error, warn};

/// Everything the HTTP endpoints can fail with.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Request body is empty")]
    EmptyBody,

    #[error("Content type must be multipart/form-data")]
    NotMultipart,

    #[error("No boundary found in the request content type")]
    MissingBoundary,

    #[error("Failed to parse the uploaded file data")]
    MalformedMultipart(String),

    #[error("No file was selected for upload")]
    MissingFile,

    #[error("File is too large (maximum {limit_mib} MiB)")]
    PayloadTooLarge { limit_mib: usize },

    #[error("File key is required")]
    MissingKey,

    #[error("File not found")]
    NotFound(String),

    #[error("{message}")]
    Internal {
        message: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    pub fn internal(message: &'static str, source: anyhow::Error) -> Self {
        ApiError::Internal { message, source }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::EmptyBody
            | ApiError::NotMultipart
            | ApiError::MissingBoundary
            | ApiError::MalformedMultipart(_)
            | ApiError::MissingFile
            | ApiError::MissingKey => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn details(&self) -> Option<String> {
        match self {
            ApiError::MalformedMultipart(detail) => Some(detail.clone()),
            ApiError::Internal { source, .. } => Some(format!("{:#}", source)),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            ApiError::Internal { message, source } => error!("{}: {:#}", message, source),
            ApiError::NotFound(key) => warn!(key = %key, "requested blob does not exist"),
            other => warn!(status = %status, "rejected request: {}", other),
        }
        let body = ErrorBody {
            success: false,
            error: self.to_string(),
            details: self.details(),
        };
        (status, Json(body)).into_response()
    }
}
