use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use super::BookCatalog;
use crate::config::Config;
use crate::error::AppError;
use crate::models::{BookRecord, StructuredQuery};

/// Client for the Open Library search API.
#[derive(Clone)]
pub struct OpenLibraryClient {
    http: Client,
    base_url: String,
    request_timeout: Duration,
}

/// Subset of the Open Library search response this service reads.
#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    docs: Vec<SearchDoc>,
}

#[derive(Debug, Deserialize)]
struct SearchDoc {
    title: Option<String>,
    #[serde(default)]
    author_name: Vec<String>,
    first_publish_year: Option<i32>,
    #[serde(default)]
    isbn: Vec<String>,
    key: Option<String>,
}

impl OpenLibraryClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: config.openlibrary_url.clone(),
            request_timeout: config.request_timeout,
        })
    }
}

#[async_trait]
impl BookCatalog for OpenLibraryClient {
    async fn search(&self, query: &StructuredQuery) -> Result<Vec<BookRecord>, AppError> {
        let url = build_search_url(&self.base_url, query);
        info!("searching catalog: {url}");

        let response = self
            .http
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| AppError::CatalogUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(AppError::CatalogUnavailable(format!(
                "HTTP {status}: {}",
                snippet(&detail)
            )));
        }

        let page: SearchPage = response
            .json()
            .await
            .map_err(|e| AppError::CatalogUnavailable(format!("undecodable response: {e}")))?;

        let records = normalize_page(page.docs, query.limit);
        debug!("normalized {} records", records.len());
        Ok(records)
    }
}

fn build_search_url(base_url: &str, query: &StructuredQuery) -> String {
    format!(
        "{}?{}={}&limit={}",
        base_url,
        query.query_type.as_param(),
        urlencoding::encode(&query.query_value),
        query.limit
    )
}

/// The API is asked for `limit` results already; the client-side cap covers
/// catalogs that ignore it.
fn normalize_page(docs: Vec<SearchDoc>, limit: u32) -> Vec<BookRecord> {
    docs.into_iter()
        .filter_map(normalize)
        .take(limit as usize)
        .collect()
}

/// Absent optional fields stay absent; a doc with no title at all is
/// unusable downstream and is skipped.
fn normalize(doc: SearchDoc) -> Option<BookRecord> {
    let title = doc.title?;

    let author = if doc.author_name.is_empty() {
        None
    } else {
        Some(doc.author_name.join(", "))
    };

    let mut identifiers = BTreeMap::new();
    if !doc.isbn.is_empty() {
        identifiers.insert("isbn".to_string(), doc.isbn);
    }
    if let Some(key) = doc.key {
        identifiers.insert("olid".to_string(), vec![key]);
    }

    Some(BookRecord {
        title,
        author,
        first_publish_year: doc.first_publish_year,
        identifiers,
    })
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
    use crate::models::QueryType;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> SearchDoc {
        serde_json::from_value(value).unwrap()
    }

    fn query(query_type: QueryType, value: &str, limit: u32) -> StructuredQuery {
        StructuredQuery {
            query_type,
            query_value: value.to_string(),
            limit,
        }
    }

    #[test]
    fn url_uses_the_query_type_parameter() {
        let url = build_search_url(
            "https://openlibrary.org/search.json",
            &query(QueryType::Author, "J.K. Rowling", 3),
        );
        assert_eq!(
            url,
            "https://openlibrary.org/search.json?author=J.K.%20Rowling&limit=3"
        );
    }

    #[test]
    fn url_uses_q_for_keyword_queries() {
        let url = build_search_url(
            "https://openlibrary.org/search.json",
            &query(QueryType::Keyword, "space travel", 5),
        );
        assert_eq!(
            url,
            "https://openlibrary.org/search.json?q=space%20travel&limit=5"
        );
    }

    #[test]
    fn maps_catalog_fields() {
        let record = normalize(doc(json!({
            "title": "Harry Potter and the Philosopher's Stone",
            "author_name": ["J. K. Rowling"],
            "first_publish_year": 1997,
            "isbn": ["9780747532743"],
            "key": "/works/OL82563W"
        })))
        .unwrap();

        assert_eq!(record.title, "Harry Potter and the Philosopher's Stone");
        assert_eq!(record.author.as_deref(), Some("J. K. Rowling"));
        assert_eq!(record.first_publish_year, Some(1997));
        assert_eq!(
            record.identifiers.get("isbn"),
            Some(&vec!["9780747532743".to_string()])
        );
        assert_eq!(
            record.identifiers.get("olid"),
            Some(&vec!["/works/OL82563W".to_string()])
        );
    }

    #[test]
    fn joins_multiple_authors() {
        let record = normalize(doc(json!({
            "title": "Good Omens",
            "author_name": ["Terry Pratchett", "Neil Gaiman"]
        })))
        .unwrap();
        assert_eq!(
            record.author.as_deref(),
            Some("Terry Pratchett, Neil Gaiman")
        );
    }

    #[test]
    fn absent_optional_fields_stay_absent() {
        let record = normalize(doc(json!({"title": "Anonymous Work"}))).unwrap();
        assert_eq!(record.author, None);
        assert_eq!(record.first_publish_year, None);
        assert!(record.identifiers.is_empty());
    }

    #[test]
    fn docs_without_title_are_skipped() {
        assert!(normalize(doc(json!({"author_name": ["Somebody"]}))).is_none());
    }

    #[test]
    fn page_is_truncated_to_the_limit() {
        let docs = vec![
            doc(json!({"title": "One"})),
            doc(json!({"title": "Two"})),
            doc(json!({"title": "Three"})),
            doc(json!({"title": "Four"})),
        ];
        let records = normalize_page(docs, 2);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].title, "One");
        assert_eq!(records[1].title, "Two");
    }

    #[test]
    fn empty_page_is_not_an_error() {
        let page: SearchPage = serde_json::from_value(json!({"numFound": 0})).unwrap();
        assert!(normalize_page(page.docs, 3).is_empty());
    }
}
