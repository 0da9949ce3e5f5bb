//! Web-search grounding for prompts.
//!
//! Search never fails the request: any provider error, or a query that
//! sanitizes to nothing, degrades to a single synthetic result.

use aegis_common::{BackendError, SearchProvider, SearchResult};
use async_trait::async_trait;
use tracing::{info, warn};

/// Longest query forwarded to the search provider, in characters.
pub const MAX_QUERY_CHARS: usize = 400;

/// Strip markup-ish characters, collapse whitespace and cap the length.
pub fn sanitize_query(query: &str) -> String {
    let stripped: String = query
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | '"' | '\''))
        .collect();
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(MAX_QUERY_CHARS).collect()
}

/// Search for `prompt`, substituting the synthetic "unavailable" hit on failure.
pub async fn grounded_search(
    provider: &dyn SearchProvider,
    prompt: &str,
    max_results: usize,
) -> Vec<SearchResult> {
    match search_sanitized(provider, prompt, max_results).await {
        Ok(results) => {
            info!("Search returned {} result(s)", results.len());
            results
        }
        Err(err) => {
            warn!("Search failed, continuing without context: {}", err);
            vec![SearchResult::unavailable()]
        }
    }
}

async fn search_sanitized(
    provider: &dyn SearchProvider,
    prompt: &str,
    max_results: usize,
) -> Result<Vec<SearchResult>, BackendError> {
    let query = sanitize_query(prompt);
    if query.is_empty() {
        return Err(BackendError::Transport("search query is empty".to_string()));
    }
    let mut results = provider.search(&query, max_results).await?;
    results.truncate(max_results);
    Ok(results)
}

/// Stand-in provider when search is disabled or lacks credentials.
pub struct UnavailableSearch {
    reason: String,
}

impl UnavailableSearch {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl SearchProvider for UnavailableSearch {
    async fn search(&self, _query: &str, _max_results: usize) -> Result<Vec<SearchResult>, BackendError> {
        Err(BackendError::Configuration(self.reason.clone()))
    }
}

/// Numbered `{title}: {snippet}` context followed by the question.
pub fn contextual_prompt(prompt: &str, results: &[SearchResult]) -> String {
    if results.is_empty() {
        return prompt.to_string();
    }

    let mut out = String::from("Context from web search:\n");
    for (i, result) in results.iter().enumerate() {
        out.push_str(&format!("{}. {}: {}\n", i + 1, result.title, result.snippet));
    }
    out.push_str(&format!("\nQuestion: {}", prompt));
    out
}
