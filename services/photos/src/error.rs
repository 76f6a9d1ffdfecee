use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

/// Errors that can occur while handling a photo request
#[derive(Error, Debug)]
pub enum PhotoError {
    /// Missing or empty required field, or a malformed query parameter
    #[error("Validation error: {0}")]
    Validation(String),

    /// Body could not be decompressed or parsed, or the image was not base64
    #[error("Decode error: {0}")]
    Decode(String),

    /// Update or delete target does not exist
    #[error("{0} is empty.")]
    NotFound(String),

    /// Document or blob store call failed or timed out
    #[error("Store error: {0}")]
    Store(String),

    /// Stored document or response payload could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, PhotoError>;

impl PhotoError {
    pub fn missing_field(field: &str) -> Self {
        Self::Validation(format!("missing required field `{field}`"))
    }
}

impl From<sqlx::Error> for PhotoError {
    fn from(e: sqlx::Error) -> Self {
        Self::Store(e.to_string())
    }
}

impl From<serde_json::Error> for PhotoError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Every failure is reported as a 500 with the error text as the body.
/// Callers are not told apart a bad request from an internal failure.
impl IntoResponse for PhotoError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        error!(error = %message, "Request failed");

        (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            message,
        )
            .into_response()
    }
}
