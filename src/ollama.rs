use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::Config;
use crate::error::AppError;
use crate::pipeline::CompletionService;

/// Capacity of the channel between the response reader task and the consumer.
const CHUNK_CHANNEL_CAPACITY: usize = 16;

/// Client for the Ollama text-completion HTTP API.
#[derive(Clone)]
pub struct OllamaClient {
    http: Client,
    base_url: String,
    model: String,
    request_timeout: Duration,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a str>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

/// One NDJSON line of a streamed /api/generate response.
#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    error: Option<String>,
}

impl OllamaClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: config.ollama_url.clone(),
            model: config.ollama_model.clone(),
            request_timeout: config.request_timeout,
        })
    }

    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }
}

#[async_trait]
impl CompletionService for OllamaClient {
    async fn complete_json(&self, prompt: &str) -> Result<String, AppError> {
        let response = self
            .http
            .post(self.generate_url())
            .timeout(self.request_timeout)
            .json(&GenerateRequest {
                model: &self.model,
                prompt,
                stream: false,
                format: Some("json"),
            })
            .send()
            .await
            .map_err(|e| AppError::CompletionUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(AppError::CompletionUnavailable(format!(
                "HTTP {status}: {}",
                snippet(&detail)
            )));
        }

        let payload: GenerateResponse = response
            .json()
            .await
            .map_err(|e| AppError::CompletionUnavailable(format!("undecodable response: {e}")))?;

        Ok(payload.response)
    }

    async fn complete_stream(
        &self,
        prompt: &str,
    ) -> Result<mpsc::Receiver<Result<String, AppError>>, AppError> {
        // No total timeout here: a long narrative must not be cut off
        // mid-generation. The connect timeout on the client still bounds the
        // time to first byte.
        let response = self
            .http
            .post(self.generate_url())
            .json(&GenerateRequest {
                model: &self.model,
                prompt,
                stream: true,
                format: None,
            })
            .send()
            .await
            .map_err(|e| AppError::CompletionUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(AppError::CompletionUnavailable(format!(
                "HTTP {status}: {}",
                snippet(&detail)
            )));
        }

        let (tx, rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();

            while let Some(next) = stream.next().await {
                let bytes = match next {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx
                            .send(Err(AppError::CompletionUnavailable(e.to_string())))
                            .await;
                        return;
                    }
                };

                buffer.extend_from_slice(&bytes);
                while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line);
                    if !forward_line(line.trim(), &tx).await {
                        return;
                    }
                }
            }

            // a final line without a trailing newline
            if !buffer.is_empty() {
                let line = String::from_utf8_lossy(&buffer).into_owned();
                let _ = forward_line(line.trim(), &tx).await;
            }
        });

        Ok(rx)
    }
}

/// Decode one NDJSON line and forward its text chunk.
/// Returns false once reading should stop: the model is done, the stream
/// reported an error, or the consumer went away.
async fn forward_line(line: &str, tx: &mpsc::Sender<Result<String, AppError>>) -> bool {
    if line.is_empty() {
        return true;
    }

    let chunk: StreamChunk = match serde_json::from_str(line) {
        Ok(chunk) => chunk,
        Err(e) => {
            debug!("skipping undecodable completion chunk: {e}");
            return true;
        }
    };

    if let Some(error) = chunk.error {
        let _ = tx.send(Err(AppError::CompletionUnavailable(error))).await;
        return false;
    }

    if !chunk.response.is_empty() && tx.send(Ok(chunk.response)).await.is_err() {
        return false;
    }

    !chunk.done
}

fn snippet(text: &str) -> String {
    const MAX: usize = 200;
    if text.chars().count() <= MAX {
        text.to_string()
    } else {
        text.chars().take(MAX).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn drain(rx: &mut mpsc::Receiver<Result<String, AppError>>) -> Vec<Result<String, AppError>> {
        let mut out = Vec::new();
        while let Ok(item) = rx.try_recv() {
            out.push(item);
        }
        out
    }

    #[tokio::test]
    async fn forward_line_emits_chunk_text() {
        let (tx, mut rx) = mpsc::channel(4);
        let keep_going = forward_line(r#"{"response":"Once upon","done":false}"#, &tx).await;
        assert!(keep_going);

        let items = drain(&mut rx).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap(), "Once upon");
    }

    #[tokio::test]
    async fn forward_line_stops_on_done() {
        let (tx, mut rx) = mpsc::channel(4);
        let keep_going = forward_line(r#"{"response":"","done":true}"#, &tx).await;
        assert!(!keep_going);
        assert!(drain(&mut rx).await.is_empty());
    }

    #[tokio::test]
    async fn forward_line_reports_stream_errors() {
        let (tx, mut rx) = mpsc::channel(4);
        let keep_going = forward_line(r#"{"error":"model not found"}"#, &tx).await;
        assert!(!keep_going);

        let items = drain(&mut rx).await;
        assert_eq!(items.len(), 1);
        match items[0].as_ref().unwrap_err() {
            AppError::CompletionUnavailable(detail) => assert_eq!(detail, "model not found"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn forward_line_skips_undecodable_lines() {
        let (tx, mut rx) = mpsc::channel(4);
        let keep_going = forward_line("not json at all", &tx).await;
        assert!(keep_going);
        assert!(drain(&mut rx).await.is_empty());
    }

    #[test]
    fn generate_request_omits_format_when_unset() {
        let body = serde_json::to_value(GenerateRequest {
            model: "llama3.2",
            prompt: "hi",
            stream: true,
            format: None,
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({"model": "llama3.2", "prompt": "hi", "stream": true})
        );
    }
}
