use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Largest result count a structured query may carry.
pub const MAX_LIMIT: u32 = 20;

/// Result count used when the structuring model omits or mangles the limit.
pub const FALLBACK_LIMIT: u32 = 3;

/// Request payload for the book search endpoint
#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
}

impl SearchRequest {
    /// Validates if the query is not empty or just whitespace
    pub fn is_valid(&self) -> bool {
        !self.query.trim().is_empty()
    }
}

/// Search dimension recognized by the catalog lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Keyword,
    Author,
    Title,
    Subject,
    Isbn,
}

impl QueryType {
    /// Accepts the spellings the structuring model is allowed to emit.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "q" | "keyword" => Some(Self::Keyword),
            "author" => Some(Self::Author),
            "title" => Some(Self::Title),
            "subject" => Some(Self::Subject),
            "isbn" => Some(Self::Isbn),
            _ => None,
        }
    }

    /// Open Library search parameter name for this dimension.
    pub fn as_param(self) -> &'static str {
        match self {
            Self::Keyword => "q",
            Self::Author => "author",
            Self::Title => "title",
            Self::Subject => "subject",
            Self::Isbn => "isbn",
        }
    }
}

/// Typed (type, value, limit) triple derived from the user's free text.
/// Invariants: `query_value` is non-empty, `1 <= limit <= MAX_LIMIT`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StructuredQuery {
    pub query_type: QueryType,
    pub query_value: String,
    pub limit: u32,
}

/// One normalized catalog result. Optional fields stay absent when the
/// catalog did not provide them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookRecord {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_publish_year: Option<i32>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub identifiers: BTreeMap<String, Vec<String>>,
}

/// Response payload for the health check endpoint
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
}

impl HealthResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            message: "Service is healthy".to_string(),
        }
    }
}
