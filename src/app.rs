use std::sync::Arc;

use axum::{Extension, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::ollama::OllamaClient;
use crate::pipeline::SearchPipeline;
use crate::pipeline::catalog::OpenLibraryClient;
use crate::routes::create_routes;

/// Initialize tracing and logging for the application
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "rs_books_svc=info,tower_http=debug,axum::rejection=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Create and configure the Axum application with all routes and middleware
pub fn create_app(config: &Config) -> Result<Router, anyhow::Error> {
    info!("Initializing application router");

    let completion = OllamaClient::new(config)?;
    let catalog = OpenLibraryClient::new(config)?;
    let pipeline = SearchPipeline::new(Arc::new(completion), Arc::new(catalog));
    info!(
        "Pipeline wired: model {} at {}, catalog {}",
        config.ollama_model, config.ollama_url, config.openlibrary_url
    );

    Ok(Router::new()
        .merge(create_routes())
        .layer(Extension(pipeline)) // Add pipeline as shared state
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()))
}
