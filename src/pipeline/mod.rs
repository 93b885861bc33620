pub mod catalog;
pub mod refiner;
pub mod structurer;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

use crate::error::AppError;
use crate::models::{BookRecord, StructuredQuery};
use crate::moderation;
use refiner::NarrativeStream;

/// Text-completion collaborator (Ollama in production).
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// One-shot completion constrained to JSON output.
    async fn complete_json(&self, prompt: &str) -> Result<String, AppError>;

    /// Streamed completion. The receiver yields text chunks as the model
    /// produces them; an Err item ends the stream.
    async fn complete_stream(
        &self,
        prompt: &str,
    ) -> Result<mpsc::Receiver<Result<String, AppError>>, AppError>;
}

/// Book catalog collaborator (Open Library in production).
#[async_trait]
pub trait BookCatalog: Send + Sync {
    /// Returns up to `query.limit` records in the catalog's relevance order.
    /// Zero matches is an empty Vec, not an error.
    async fn search(&self, query: &StructuredQuery) -> Result<Vec<BookRecord>, AppError>;
}

/// Sequences the per-request stages: profanity screen, query structuring,
/// catalog lookup, narrative refinement. Each stage runs at most once and the
/// first failure short-circuits the rest.
#[derive(Clone)]
pub struct SearchPipeline {
    completion: Arc<dyn CompletionService>,
    catalog: Arc<dyn BookCatalog>,
}

impl SearchPipeline {
    pub fn new(completion: Arc<dyn CompletionService>, catalog: Arc<dyn BookCatalog>) -> Self {
        Self {
            completion,
            catalog,
        }
    }

    /// Run the full pipeline for one request. `raw_query` must already be
    /// trimmed and non-empty; the handler owns input validation.
    ///
    /// Ok carries the streamed outcome (narrative or moderation message);
    /// Err means nothing has been streamed yet and the caller should send a
    /// structured error response instead.
    pub async fn run(&self, raw_query: &str) -> Result<NarrativeStream, AppError> {
        if moderation::is_profane(raw_query) {
            info!(
                "query rejected by profanity screen: {}",
                moderation::censor(raw_query)
            );
            return Ok(NarrativeStream::once(moderation::MODERATION_MESSAGE));
        }

        let query = structurer::structure(self.completion.as_ref(), raw_query).await?;
        info!("structured query: {:?}", query);

        let records = self.catalog.search(&query).await?;
        info!("catalog returned {} records", records.len());

        refiner::refine(self.completion.as_ref(), raw_query, &records).await
    }
}
