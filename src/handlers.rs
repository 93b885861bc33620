use axum::{
    Extension,
    body::Bytes,
    http::header,
    response::{IntoResponse, Json as ResponseJson, Response},
};
use tracing::{debug, info};

use crate::error::{AppError, AppResult};
use crate::models::{HealthResponse, SearchRequest};
use crate::pipeline::SearchPipeline;

/// Health check handler
/// Returns the service status and health information
pub async fn health_check() -> AppResult<ResponseJson<HealthResponse>> {
    debug!("Health check endpoint called");

    let response = HealthResponse::ok();

    info!("Health check successful");
    Ok(ResponseJson(response))
}

/// Book search handler.
///
/// Decides the response mode before any bytes are sent: validation and
/// pre-stream pipeline failures produce a single JSON error; every other
/// outcome (narrative, moderation message, mid-stream truncation note) is a
/// streamed plain-text body.
pub async fn search_books(
    Extension(pipeline): Extension<SearchPipeline>,
    body: Bytes,
) -> Response {
    let request = match parse_search_request(&body) {
        Ok(request) => request,
        Err(err) => return err.into_response(),
    };
    info!("search endpoint called with query: {}", request.query);

    match pipeline.run(request.query.trim()).await {
        Ok(narrative) => (
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            narrative.into_body(),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}

/// The body must be a JSON object with a non-empty string under "query".
/// Anything else is the client's fault, reported with one fixed message.
fn parse_search_request(body: &[u8]) -> Result<SearchRequest, AppError> {
    let request: SearchRequest =
        serde_json::from_slice(body).map_err(|_| AppError::InvalidInput)?;
    if !request.is_valid() {
        return Err(AppError::InvalidInput);
    }
    Ok(request)
}
