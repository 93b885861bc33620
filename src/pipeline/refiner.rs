use std::convert::Infallible;

use axum::body::{Body, Bytes};
use futures::stream::{self, Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::warn;

use super::CompletionService;
use crate::error::AppError;
use crate::models::BookRecord;

/// Capacity of the narrative chunk channel: small, just enough to decouple
/// generation from transmission.
const NARRATIVE_CHANNEL_CAPACITY: usize = 16;

/// Lazily produced narrative text, drained chunk-by-chunk by the transport
/// layer. Dropping it stops the producer.
#[derive(Debug)]
pub struct NarrativeStream {
    rx: mpsc::Receiver<String>,
}

impl NarrativeStream {
    /// A stream holding a single, already-complete message.
    pub fn once(message: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::channel(1);
        // capacity 1 with tx dropped right after: the send cannot fail
        let _ = tx.try_send(message.into());
        Self { rx }
    }

    pub fn into_stream(self) -> impl Stream<Item = String> {
        stream::unfold(self.rx, |mut rx| async move {
            rx.recv().await.map(|chunk| (chunk, rx))
        })
    }

    /// Response body that forwards chunks to the caller as they arrive.
    pub fn into_body(self) -> Body {
        Body::from_stream(
            self.into_stream()
                .map(|chunk| Ok::<_, Infallible>(Bytes::from(chunk))),
        )
    }

    /// Drain the whole stream into one string.
    pub async fn collect_text(mut self) -> String {
        let mut text = String::new();
        while let Some(chunk) = self.rx.recv().await {
            text.push_str(&chunk);
        }
        text
    }
}

/// Produce the narrative for the user's query and the normalized records.
///
/// A failure to open the completion stream surfaces as an error (nothing has
/// been sent yet); failures after that point are appended to the stream.
pub async fn refine(
    completion: &dyn CompletionService,
    raw_query: &str,
    records: &[BookRecord],
) -> Result<NarrativeStream, AppError> {
    let prompt = build_narrative_prompt(raw_query, records);
    let chunks = completion.complete_stream(&prompt).await?;
    Ok(spawn_forwarder(chunks))
}

/// Move chunks from the completion service into the narrative channel.
///
/// A mid-stream failure cannot change the response status any more, so it is
/// appended as a final readable note instead. A dropped consumer stops the
/// forwarder, which in turn releases the completion connection.
fn spawn_forwarder(mut chunks: mpsc::Receiver<Result<String, AppError>>) -> NarrativeStream {
    let (tx, rx) = mpsc::channel(NARRATIVE_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        while let Some(item) = chunks.recv().await {
            match item {
                Ok(text) => {
                    if tx.send(text).await.is_err() {
                        return;
                    }
                }
                Err(err) => {
                    warn!("narrative stream interrupted: {err}");
                    let _ = tx
                        .send(format!("\n\n[narrative truncated: {}]", err.message()))
                        .await;
                    return;
                }
            }
        }
    });
    NarrativeStream { rx }
}

pub fn build_narrative_prompt(raw_query: &str, records: &[BookRecord]) -> String {
    if records.is_empty() {
        return format!(
            "The user asked: '{raw_query}'. The catalog search found no matching books.\n\
             Write a short, friendly plain-text message saying no matching books were found \
             and suggest rephrasing the search. Do not invent any books."
        );
    }

    let bullets = records
        .iter()
        .map(describe_record)
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "The user asked: '{raw_query}'. Based on the following books:\n{bullets}\n\
         Write an engaging intro, include the book details as bullets, and a happy outro. \
         Use plain text and mention only these books."
    )
}

fn describe_record(record: &BookRecord) -> String {
    let mut line = format!("• '{}'", record.title);
    if let Some(author) = &record.author {
        line.push_str(&format!(" by {author}"));
    }
    if let Some(year) = record.first_publish_year {
        line.push_str(&format!(" ({year})"));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn record(title: &str, author: Option<&str>, year: Option<i32>) -> BookRecord {
        BookRecord {
            title: title.to_string(),
            author: author.map(|a| a.to_string()),
            first_publish_year: year,
            identifiers: BTreeMap::new(),
        }
    }

    #[test]
    fn prompt_lists_each_record_as_a_bullet() {
        let prompt = build_narrative_prompt(
            "books by J.K. Rowling",
            &[
                record(
                    "Harry Potter and the Philosopher's Stone",
                    Some("J.K. Rowling"),
                    Some(1997),
                ),
                record("Quidditch Through the Ages", Some("J.K. Rowling"), None),
            ],
        );

        assert!(prompt.contains("books by J.K. Rowling"));
        assert!(
            prompt.contains("• 'Harry Potter and the Philosopher's Stone' by J.K. Rowling (1997)")
        );
        assert!(prompt.contains("• 'Quidditch Through the Ages' by J.K. Rowling"));
    }

    #[test]
    fn prompt_omits_absent_fields() {
        let prompt = build_narrative_prompt("anonymous works", &[record("Beowulf", None, None)]);
        assert!(prompt.contains("• 'Beowulf'"));
        assert!(!prompt.contains(" by "));
        assert!(!prompt.contains('('));
    }

    #[test]
    fn empty_records_ask_for_a_no_results_message() {
        let prompt = build_narrative_prompt("a book that does not exist", &[]);
        assert!(prompt.contains("no matching books"));
        assert!(prompt.contains("Do not invent any books"));
    }

    #[tokio::test]
    async fn once_yields_a_single_message() {
        let stream = NarrativeStream::once("moderated");
        assert_eq!(stream.collect_text().await, "moderated");
    }

    #[tokio::test]
    async fn forwarder_passes_chunks_through_in_order() {
        let (tx, rx) = mpsc::channel(4);
        let stream = spawn_forwarder(rx);

        tx.send(Ok("Once".to_string())).await.unwrap();
        tx.send(Ok(" upon".to_string())).await.unwrap();
        tx.send(Ok(" a time".to_string())).await.unwrap();
        drop(tx);

        assert_eq!(stream.collect_text().await, "Once upon a time");
    }

    #[tokio::test]
    async fn forwarder_appends_a_truncation_note_on_error() {
        let (tx, rx) = mpsc::channel(4);
        let stream = spawn_forwarder(rx);

        tx.send(Ok("Once upon".to_string())).await.unwrap();
        tx.send(Err(AppError::CompletionUnavailable(
            "connection reset".to_string(),
        )))
        .await
        .unwrap();
        drop(tx);

        assert_eq!(
            stream.collect_text().await,
            "Once upon\n\n[narrative truncated: Completion service failed: connection reset]"
        );
    }

    #[tokio::test]
    async fn forwarder_stops_when_the_consumer_disconnects() {
        let (tx, rx) = mpsc::channel(4);
        let stream = spawn_forwarder(rx);
        drop(stream);

        tx.send(Ok("never read".to_string())).await.unwrap();
        // resolves once the forwarder gives up and drops its receiver
        tx.closed().await;
    }
}
