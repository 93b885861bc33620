use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::CompletionService;
use crate::error::AppError;
use crate::models::{FALLBACK_LIMIT, MAX_LIMIT, QueryType, StructuredQuery};

const STRUCTURE_PROMPT: &str = r#"Based on the user's query, construct a JSON object describing an Open Library search.
Extract up to 6 essential keywords for the query value.
"limit" defaults to 3 unless the user asks for a different amount of results.
"query_type" must be one of: "q", "author", "title", "subject", "isbn".
Respond with exactly this JSON object and nothing else:
{
  "query_type": "q",
  "query_value": "keywords",
  "limit": 3
}
"#;

/// Shape the structuring model is asked to emit. Every field is optional so
/// that validation, not deserialization, decides what is recoverable.
#[derive(Debug, Deserialize)]
struct RawQueryPlan {
    query_type: Option<String>,
    query_value: Option<String>,
    limit: Option<Value>,
}

/// Turn free text into a StructuredQuery via the completion service.
pub async fn structure(
    completion: &dyn CompletionService,
    raw_query: &str,
) -> Result<StructuredQuery, AppError> {
    let prompt = format!("{STRUCTURE_PROMPT}\nUser query:\n{raw_query}");
    let output = completion.complete_json(&prompt).await?;
    debug!("structuring model output: {output}");
    parse_query_plan(&output)
}

/// Parse and validate the model's output. `query_type` and `query_value`
/// drive the catalog lookup and fail hard; `limit` is non-critical and falls
/// back instead.
pub fn parse_query_plan(output: &str) -> Result<StructuredQuery, AppError> {
    let plan = decode_plan(output)?;

    let query_type = plan
        .query_type
        .as_deref()
        .and_then(QueryType::parse)
        .ok_or_else(|| {
            AppError::MalformedAiOutput(format!("unrecognized query_type {:?}", plan.query_type))
        })?;

    let query_value = plan.query_value.as_deref().map(str::trim).unwrap_or_default();
    if query_value.is_empty() {
        return Err(AppError::MalformedAiOutput("empty query_value".to_string()));
    }

    Ok(StructuredQuery {
        query_type,
        query_value: query_value.to_string(),
        limit: coerce_limit(plan.limit.as_ref()),
    })
}

fn decode_plan(output: &str) -> Result<RawQueryPlan, AppError> {
    if let Ok(plan) = serde_json::from_str::<RawQueryPlan>(output) {
        return Ok(plan);
    }

    // One best-effort pass: the model sometimes wraps the object in prose.
    extract_json_object(output)
        .and_then(|fragment| serde_json::from_str::<RawQueryPlan>(fragment).ok())
        .ok_or_else(|| {
            AppError::MalformedAiOutput(format!(
                "output is not a JSON object: {}",
                snippet(output)
            ))
        })
}

/// Locate the first balanced `{...}` fragment in free text.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Limit is non-critical: anything missing or unusable becomes the fallback,
/// oversized values are clamped. The model occasionally emits the number as
/// a string, so both JSON numbers and numeric strings are accepted.
fn coerce_limit(raw: Option<&Value>) -> u32 {
    let parsed = match raw {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    };

    match parsed {
        Some(n) if n >= 1 => (n as u64).min(MAX_LIMIT as u64) as u32,
        Some(n) => {
            warn!("ignoring non-positive limit {n}");
            FALLBACK_LIMIT
        }
        None => FALLBACK_LIMIT,
    }
}

fn snippet(text: &str) -> String {
    const MAX: usize = 200;
    if text.chars().count() <= MAX {
        text.to_string()
    } else {
        text.chars().take(MAX).collect()
    }
}
