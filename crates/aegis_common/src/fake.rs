//! Scripted backends for tests and offline runs.
//!
//! Responses are scripted per model name. A script with several entries is
//! consumed in order; the last entry keeps being returned once reached.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;

use crate::backend::{Completion, CompletionRequest, FragmentStream, ModelBackend, SearchProvider};
use crate::error::BackendError;
use crate::types::{SearchResult, TokenUsage};

type Responder = Box<dyn Fn(&CompletionRequest) -> Result<String, BackendError> + Send + Sync>;

/// Fake model backend keyed by model name.
#[derive(Default)]
pub struct FakeModelBackend {
    scripts: Mutex<HashMap<String, Vec<Result<String, BackendError>>>>,
    streams: HashMap<String, Vec<Result<String, BackendError>>>,
    responders: HashMap<String, Responder>,
    requests: Mutex<Vec<CompletionRequest>>,
    delay: Option<Duration>,
}

impl FakeModelBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answer `model` with `text`.
    pub fn with_response(self, model: &str, text: &str) -> Self {
        self.with_responses(model, vec![Ok(text.to_string())])
    }

    /// Always fail calls to `model`.
    pub fn with_error(self, model: &str, error: BackendError) -> Self {
        self.with_responses(model, vec![Err(error)])
    }

    /// Answer `model` with the given results in order.
    pub fn with_responses(self, model: &str, responses: Vec<Result<String, BackendError>>) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.insert(model.to_string(), responses);
        }
        self
    }

    /// Compute the answer for `model` from the request.
    pub fn with_responder<F>(mut self, model: &str, responder: F) -> Self
    where
        F: Fn(&CompletionRequest) -> Result<String, BackendError> + Send + Sync + 'static,
    {
        self.responders.insert(model.to_string(), Box::new(responder));
        self
    }

    /// Fragments streamed for `model`; an `Err` item breaks the stream there.
    pub fn with_stream(mut self, model: &str, fragments: Vec<Result<String, BackendError>>) -> Self {
        self.streams.insert(model.to_string(), fragments);
        self
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of calls (batch and streaming) made for `model`.
    pub fn call_count(&self, model: &str) -> usize {
        self.requests().iter().filter(|r| r.model == model).count()
    }

    pub fn total_calls(&self) -> usize {
        self.requests().len()
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn record(&self, request: &CompletionRequest) {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
    }

    fn next_response(&self, request: &CompletionRequest) -> Result<String, BackendError> {
        if let Some(responder) = self.responders.get(&request.model) {
            return responder(request);
        }

        let mut scripts = self
            .scripts
            .lock()
            .map_err(|_| BackendError::Transport("fake backend poisoned".to_string()))?;
        match scripts.get_mut(&request.model) {
            Some(script) if script.len() > 1 => script.remove(0),
            Some(script) if script.len() == 1 => script[0].clone(),
            _ => Err(BackendError::Transport(format!(
                "no scripted response for model {}",
                request.model
            ))),
        }
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl ModelBackend for FakeModelBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, BackendError> {
        self.record(request);
        self.pause().await;
        let text = self.next_response(request)?;
        let completion_tokens = text.split_whitespace().count() as u32;
        Ok(Completion {
            text,
            usage: TokenUsage {
                prompt_tokens: 0,
                completion_tokens,
                total_tokens: completion_tokens,
            },
        })
    }

    async fn complete_stream(&self, request: &CompletionRequest) -> Result<FragmentStream, BackendError> {
        self.record(request);
        self.pause().await;

        let fragments = match self.streams.get(&request.model) {
            Some(fragments) => fragments.clone(),
            None => {
                // Word-by-word replay of the batch answer.
                let text = self.next_response(request)?;
                text.split_inclusive(' ').map(|w| Ok(w.to_string())).collect()
            }
        };
        Ok(Box::pin(stream::iter(fragments)))
    }
}

/// Fake search provider.
pub struct FakeSearchProvider {
    result: Result<Vec<SearchResult>, BackendError>,
    queries: Mutex<Vec<String>>,
}

impl FakeSearchProvider {
    pub fn with_results(results: Vec<SearchResult>) -> Self {
        Self {
            result: Ok(results),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: BackendError) -> Self {
        Self {
            result: Err(error),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.queries().len()
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().map(|q| q.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SearchProvider for FakeSearchProvider {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>, BackendError> {
        if let Ok(mut queries) = self.queries.lock() {
            queries.push(query.to_string());
        }
        self.result
            .clone()
            .map(|results| results.into_iter().take(max_results).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatMessage;
    use futures::StreamExt;

    fn request(model: &str) -> CompletionRequest {
        CompletionRequest {
            messages: vec![ChatMessage::user("hi")],
            model: model.to_string(),
            temperature: 0.7,
            max_tokens: 100,
        }
    }

    #[tokio::test]
    async fn test_scripted_responses_in_order_then_repeat_last() {
        let fake = FakeModelBackend::new().with_responses(
            "m",
            vec![
                Err(BackendError::RateLimited("429".into())),
                Ok("one".into()),
                Ok("two".into()),
            ],
        );
        assert!(fake.complete(&request("m")).await.is_err());
        assert_eq!(fake.complete(&request("m")).await.unwrap().text, "one");
        assert_eq!(fake.complete(&request("m")).await.unwrap().text, "two");
        assert_eq!(fake.complete(&request("m")).await.unwrap().text, "two");
        assert_eq!(fake.call_count("m"), 4);
    }

    #[tokio::test]
    async fn test_unscripted_model_is_transport_error() {
        let fake = FakeModelBackend::new();
        let err = fake.complete(&request("ghost")).await.unwrap_err();
        assert!(matches!(err, BackendError::Transport(_)));
        assert_eq!(fake.call_count("ghost"), 1);
    }

    #[tokio::test]
    async fn test_stream_replays_batch_answer_word_by_word() {
        let fake = FakeModelBackend::new().with_response("m", "a b c");
        let fragments: Vec<_> = fake
            .complete_stream(&request("m"))
            .await
            .unwrap()
            .collect()
            .await;
        let text: String = fragments.into_iter().map(|f| f.unwrap()).collect();
        assert_eq!(text, "a b c");
    }

    #[tokio::test]
    async fn test_search_truncates_to_max_results() {
        let results = (0..8)
            .map(|i| SearchResult::new(format!("t{}", i), "u", "s"))
            .collect();
        let search = FakeSearchProvider::with_results(results);
        assert_eq!(search.search("q", 5).await.unwrap().len(), 5);
        assert_eq!(search.queries(), vec!["q"]);
    }
}
