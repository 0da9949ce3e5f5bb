//! Tavily web search transport.

use std::time::Duration;

use aegis_common::{BackendError, SearchConfig, SearchProvider, SearchResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::http::classify_failure;

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyHit>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TavilyHit {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub published_date: Option<String>,
}

impl TavilyHit {
    /// Heuristic relevance in [0.5, 1.0]: longer content, a title and a date score higher.
    pub fn relevance(&self) -> f64 {
        let length = self.content.chars().count();
        let mut score: f64 = 0.5;
        if length > 100 {
            score += 0.2;
        }
        if length > 500 {
            score += 0.2;
        }
        if !self.title.is_empty() {
            score += 0.1;
        }
        if self.published_date.is_some() {
            score += 0.1;
        }
        score.min(1.0)
    }
}

/// Most relevant hits first; ties keep provider order.
pub fn rank_hits(mut hits: Vec<TavilyHit>) -> Vec<SearchResult> {
    hits.sort_by(|a, b| b.relevance().total_cmp(&a.relevance()));
    hits.into_iter()
        .map(|hit| {
            let title = if hit.title.is_empty() {
                "Untitled".to_string()
            } else {
                hit.title
            };
            SearchResult::new(title, hit.url, hit.content)
        })
        .collect()
}

pub struct TavilySearch {
    base_url: String,
    api_key: String,
    timeout_secs: u64,
    client: reqwest::Client,
}

impl TavilySearch {
    pub fn new(config: &SearchConfig) -> Result<Self, BackendError> {
        let api_key = config.api_key()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BackendError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            timeout_secs: config.timeout_secs,
            client,
        })
    }
}

#[async_trait]
impl SearchProvider for TavilySearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>, BackendError> {
        let url = format!("{}/search", self.base_url);
        let body = json!({
            "api_key": self.api_key,
            "query": query,
            "max_results": max_results,
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BackendError::Timeout(self.timeout_secs)
                } else {
                    BackendError::Transport(format!("Search request failed: {}", e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, &text));
        }

        let parsed: TavilyResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Transport(format!("Failed to parse search response: {}", e)))?;

        let mut results = rank_hits(parsed.results);
        results.truncate(max_results);
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn hit(title: &str, content_len: usize, dated: bool) -> TavilyHit {
        TavilyHit {
            title: title.to_string(),
            url: format!("https://example.com/{}", title),
            content: "x".repeat(content_len),
            published_date: dated.then(|| "2024-01-01".to_string()),
        }
    }

    #[test]
    fn test_relevance_bounds() {
        assert_eq!(hit("", 0, false).relevance(), 0.5);
        assert_eq!(hit("t", 600, true).relevance(), 1.0);
    }

    #[test]
    fn test_relevance_partial_credit() {
        assert_relative_eq!(hit("t", 200, false).relevance(), 0.8);
        assert_relative_eq!(hit("", 50, true).relevance(), 0.6);
    }

    #[test]
    fn test_rank_orders_by_relevance_and_fills_titles() {
        let ranked = rank_hits(vec![hit("", 10, false), hit("long", 600, false), hit("mid", 200, false)]);
        let titles: Vec<_> = ranked.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["long", "mid", "Untitled"]);
    }

    #[test]
    fn test_parse_response_shape() {
        let raw = r#"{"results":[{"title":"Paris","url":"https://p","content":"Capital of France","score":0.9}],"answer":"Paris"}"#;
        let parsed: TavilyResponse = serde_json::from_str(raw).unwrap();
        let results = rank_hits(parsed.results);
        assert_eq!(results, vec![SearchResult::new("Paris", "https://p", "Capital of France")]);
    }

    #[test]
    fn test_missing_key_fails_construction() {
        let config = SearchConfig {
            api_key_env: "AEGIS_TAVILY_TEST_KEY_NEVER_SET".to_string(),
            ..SearchConfig::default()
        };
        assert!(matches!(
            TavilySearch::new(&config),
            Err(BackendError::Configuration(_))
        ));
    }
}
