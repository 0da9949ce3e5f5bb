//! Single query with one fallback hop.
//!
//! Each primary backend owns a two-element chain `[primary, fallback]`.
//! The chain is walked by index: the fallback is tried only when the
//! primary failed, so a query costs at most two backend calls.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use aegis_common::{
    BackendConfig, BackendError, ChatMessage, CompletionRequest, CompoundFailure, ModelBackend,
    ModelResponse,
};
use tracing::{debug, warn};

/// Runs queries against named backends, routing each one to the transport
/// serving its endpoint.
pub struct FallbackQueryExecutor {
    default_transport: Arc<dyn ModelBackend>,
    routes: HashMap<String, Arc<dyn ModelBackend>>,
    query_timeout_secs: u64,
}

impl FallbackQueryExecutor {
    /// Executor sending every backend through one transport.
    pub fn new(transport: Arc<dyn ModelBackend>, query_timeout_secs: u64) -> Self {
        Self {
            default_transport: transport,
            routes: HashMap::new(),
            query_timeout_secs,
        }
    }

    /// Serve backends configured on `endpoint` through `transport`.
    pub fn with_route(mut self, endpoint: impl Into<String>, transport: Arc<dyn ModelBackend>) -> Self {
        self.routes.insert(endpoint.into(), transport);
        self
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub(crate) fn transport_for(&self, backend: &BackendConfig) -> &Arc<dyn ModelBackend> {
        self.routes
            .get(&backend.endpoint)
            .unwrap_or(&self.default_transport)
    }

    pub(crate) fn request_for(backend: &BackendConfig, messages: Vec<ChatMessage>) -> CompletionRequest {
        CompletionRequest {
            messages,
            model: backend.name.clone(),
            temperature: backend.temperature,
            max_tokens: backend.max_tokens,
        }
    }

    /// One completion call, bounded by the per-query deadline.
    pub async fn query(
        &self,
        backend: &BackendConfig,
        messages: Vec<ChatMessage>,
    ) -> Result<ModelResponse, BackendError> {
        let request = Self::request_for(backend, messages);
        let transport = self.transport_for(backend);

        let completion = tokio::time::timeout(self.query_timeout(), transport.complete(&request))
            .await
            .map_err(|_| BackendError::Timeout(self.query_timeout_secs))??;

        debug!(
            "Backend {} answered ({} tokens)",
            backend.name, completion.usage.total_tokens
        );
        Ok(ModelResponse::new(completion.text, &backend.name).with_usage(completion.usage))
    }

    /// Query `primary`; on any failure query `fallback` exactly once.
    ///
    /// The returned response is labelled with whichever backend answered.
    pub async fn query_with_fallback(
        &self,
        primary: &BackendConfig,
        fallback: &BackendConfig,
        prompt: &str,
    ) -> Result<ModelResponse, CompoundFailure> {
        let chain = [primary, fallback];
        let mut errors: [Option<BackendError>; 2] = [None, None];

        for (index, backend) in chain.iter().enumerate() {
            match self.query(backend, vec![ChatMessage::user(prompt)]).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    if index == 0 {
                        warn!(
                            "Backend {} failed ({}), falling back to {}",
                            backend.name, err, fallback.name
                        );
                    } else {
                        warn!("Fallback {} for {} failed: {}", backend.name, primary.name, err);
                    }
                    errors[index] = Some(err);
                }
            }
        }

        let [primary_error, fallback_error] = errors
            .map(|err| err.unwrap_or_else(|| BackendError::Transport("not attempted".to_string())));
        Err(CompoundFailure {
            primary: primary.name.clone(),
            fallback: fallback.name.clone(),
            primary_error,
            fallback_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_common::fake::FakeModelBackend;

    fn backends() -> (BackendConfig, BackendConfig) {
        (
            BackendConfig::new("primary", 0.7, 100),
            BackendConfig::new("fallback", 0.7, 100),
        )
    }

    #[tokio::test]
    async fn test_primary_success_skips_fallback() {
        let fake = Arc::new(
            FakeModelBackend::new()
                .with_response("primary", "from primary")
                .with_response("fallback", "from fallback"),
        );
        let executor = FallbackQueryExecutor::new(fake.clone(), 5);
        let (primary, fallback) = backends();

        let response = executor.query_with_fallback(&primary, &fallback, "q").await.unwrap();
        assert_eq!(response.content, "from primary");
        assert_eq!(response.backend_name, "primary");
        assert_eq!(fake.call_count("primary"), 1);
        assert_eq!(fake.call_count("fallback"), 0);
    }

    #[tokio::test]
    async fn test_rate_limited_primary_uses_fallback() {
        let fake = Arc::new(
            FakeModelBackend::new()
                .with_error("primary", BackendError::RateLimited("429".into()))
                .with_response("fallback", "from fallback"),
        );
        let executor = FallbackQueryExecutor::new(fake.clone(), 5);
        let (primary, fallback) = backends();

        let response = executor.query_with_fallback(&primary, &fallback, "q").await.unwrap();
        assert_eq!(response.content, "from fallback");
        assert_eq!(response.backend_name, "fallback");
        assert_eq!(fake.call_count("primary"), 1);
        assert_eq!(fake.call_count("fallback"), 1);
    }

    #[tokio::test]
    async fn test_both_failing_reports_compound_failure() {
        let fake = Arc::new(
            FakeModelBackend::new()
                .with_error("primary", BackendError::Transport("down".into()))
                .with_error("fallback", BackendError::RateLimited("429".into())),
        );
        let executor = FallbackQueryExecutor::new(fake.clone(), 5);
        let (primary, fallback) = backends();

        let failure = executor
            .query_with_fallback(&primary, &fallback, "q")
            .await
            .unwrap_err();
        assert_eq!(failure.primary, "primary");
        assert_eq!(failure.fallback, "fallback");
        assert_eq!(failure.primary_error, BackendError::Transport("down".into()));
        assert_eq!(failure.fallback_error, BackendError::RateLimited("429".into()));
        assert_eq!(fake.total_calls(), 2);
    }

    #[tokio::test]
    async fn test_deadline_counts_as_failure() {
        let slow = Arc::new(
            FakeModelBackend::new()
                .with_response("primary", "late")
                .with_delay(Duration::from_secs(3)),
        );
        let executor = FallbackQueryExecutor::new(slow, 1);
        let (primary, _) = backends();

        let err = executor
            .query(&primary, vec![ChatMessage::user("q")])
            .await
            .unwrap_err();
        assert_eq!(err, BackendError::Timeout(1));
    }

    #[tokio::test]
    async fn test_routes_by_endpoint() {
        let default = Arc::new(FakeModelBackend::new().with_response("primary", "default"));
        let local = Arc::new(FakeModelBackend::new().with_response("primary", "local"));
        let executor = FallbackQueryExecutor::new(default, 5).with_route("local", local.clone());

        let routed = BackendConfig::new("primary", 0.2, 50).on_endpoint("local");
        let response = executor
            .query(&routed, vec![ChatMessage::user("q")])
            .await
            .unwrap();
        assert_eq!(response.content, "local");

        let request = &local.requests()[0];
        assert_eq!(request.temperature, 0.2);
        assert_eq!(request.max_tokens, 50);
    }
}
