use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;

/// Fixed message for requests that fail validation before the pipeline runs.
pub const INVALID_INPUT_MESSAGE: &str = "Invalid input. 'query' must be a non-empty string.";

/// Custom error type for the application.
///
/// Profanity is deliberately not represented here: a moderated query still
/// produces a normal streamed response, not an error.
#[derive(Debug)]
pub enum AppError {
    /// The request body was not a JSON object with a non-empty "query" string.
    InvalidInput,
    /// The structuring model produced output that could not be turned into a
    /// usable catalog query.
    MalformedAiOutput(String),
    /// The book catalog could not be reached or answered with a failure.
    CatalogUnavailable(String),
    /// The text-completion service could not be reached or answered with a
    /// failure.
    CompletionUnavailable(String),
    /// Anything unclassified.
    Internal(String),
}

impl AppError {
    /// Message surfaced to the caller, naming the failed dependency.
    pub fn message(&self) -> String {
        match self {
            AppError::InvalidInput => INVALID_INPUT_MESSAGE.to_string(),
            AppError::MalformedAiOutput(detail) => format!("Query structuring failed: {detail}"),
            AppError::CatalogUnavailable(detail) => format!("Catalog service failed: {detail}"),
            AppError::CompletionUnavailable(detail) => {
                format!("Completion service failed: {detail}")
            }
            AppError::Internal(_) => "An unexpected error occurred.".to_string(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidInput => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message())
    }
}

impl std::error::Error for AppError {}

/// Error response structure
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("request failed: {:?}", self);
        }
        let body = Json(ErrorResponse {
            error: self.message(),
        });
        (status, body).into_response()
    }
}

/// Result type for application handlers
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn invalid_input_maps_to_400_with_literal_body() {
        let response = AppError::InvalidInput.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(
            &bytes[..],
            br#"{"error":"Invalid input. 'query' must be a non-empty string."}"#
        );
    }

    #[tokio::test]
    async fn catalog_failure_names_the_catalog() {
        let err = AppError::CatalogUnavailable("HTTP 503 Service Unavailable".to_string());
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = err.into_response();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(body.contains("Catalog service failed: HTTP 503 Service Unavailable"));
    }

    #[test]
    fn completion_failure_names_the_completion_service() {
        let err = AppError::CompletionUnavailable("connection refused".to_string());
        assert_eq!(err.message(), "Completion service failed: connection refused");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn internal_error_hides_detail() {
        let err = AppError::Internal("stack trace goes here".to_string());
        assert_eq!(err.message(), "An unexpected error occurred.");
    }
}
