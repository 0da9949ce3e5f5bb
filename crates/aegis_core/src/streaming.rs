//! Incremental answers from the first primary backend.
//!
//! The producer task pushes events through a bounded channel of capacity one,
//! so it suspends once per fragment until the consumer pulls. Web search runs
//! alongside the stream and its results ride on the terminal `Done` event.
//!
//! If the stream breaks, partial text is void: `Reset` is sent (only when
//! fragments were already delivered) and the batch consensus answer follows
//! as the sole authoritative `Done`.

use std::sync::Arc;

use aegis_common::{
    BackendConfig, BackendError, ChatMessage, GenerationError, ModelResponse, SearchResult,
};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use crate::consensus::ConsensusEngine;
use crate::fallback::FallbackQueryExecutor;
use crate::search::grounded_search;

/// Events in flight between the producer and the consumer
const FRAGMENT_BUFFER: usize = 1;

/// One event of a streamed answer. `Done` or `Failed` is always last.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Next text fragment.
    Token(String),
    /// Discard every fragment received so far.
    Reset,
    /// The authoritative answer.
    Done(ModelResponse),
    /// Batch fallback failed too.
    Failed(GenerationError),
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done(_) | StreamEvent::Failed(_))
    }
}

struct StreamFailure {
    error: BackendError,
    delivered: bool,
}

enum StreamOutcome {
    Finished(String),
    ConsumerGone,
}

/// Streams answers and degrades to the batch consensus path.
pub struct StreamingResponseAggregator {
    engine: Arc<ConsensusEngine>,
}

impl StreamingResponseAggregator {
    pub fn new(engine: Arc<ConsensusEngine>) -> Self {
        Self { engine }
    }

    /// Start streaming an answer to `prompt`.
    ///
    /// Dropping the returned stream stops delivery; the in-flight request
    /// may still run to completion in the background.
    pub fn stream(&self, prompt: &str) -> ReceiverStream<StreamEvent> {
        let (tx, rx) = mpsc::channel(FRAGMENT_BUFFER);
        let engine = self.engine.clone();
        let prompt = prompt.to_string();
        tokio::spawn(produce(engine, prompt, tx));
        ReceiverStream::new(rx)
    }
}

async fn produce(engine: Arc<ConsensusEngine>, prompt: String, tx: mpsc::Sender<StreamEvent>) {
    let search = {
        let engine = engine.clone();
        let prompt = prompt.clone();
        tokio::spawn(async move {
            grounded_search(engine.search_provider().as_ref(), &prompt, engine.max_results()).await
        })
    };

    let streamed = match engine.config().primaries.first() {
        Some(primary) => stream_primary(engine.executor(), primary, &prompt, &tx)
            .await
            .map(|outcome| (primary, outcome)),
        None => Err(StreamFailure {
            error: BackendError::Configuration("no primary backend".to_string()),
            delivered: false,
        }),
    };

    match streamed {
        Ok((primary, StreamOutcome::Finished(text))) => {
            let sources = search
                .await
                .unwrap_or_else(|_| vec![SearchResult::unavailable()]);
            info!("Stream from {} complete", primary.name);
            let response = ModelResponse::new(text, primary.name.clone()).with_sources(sources);
            let _ = tx.send(StreamEvent::Done(response)).await;
        }
        Ok((_, StreamOutcome::ConsumerGone)) => {
            search.abort();
        }
        Err(failure) => {
            search.abort();
            warn!(
                "Stream failed ({}), falling back to batch consensus",
                failure.error
            );
            if failure.delivered && tx.send(StreamEvent::Reset).await.is_err() {
                return;
            }
            let event = match engine.generate(&prompt).await {
                Ok(response) => StreamEvent::Done(response),
                Err(err) => StreamEvent::Failed(err),
            };
            let _ = tx.send(event).await;
        }
    }
}

async fn stream_primary(
    executor: &FallbackQueryExecutor,
    primary: &BackendConfig,
    prompt: &str,
    tx: &mpsc::Sender<StreamEvent>,
) -> Result<StreamOutcome, StreamFailure> {
    let deadline = executor.query_timeout();
    let timed_out = |delivered| StreamFailure {
        error: BackendError::Timeout(deadline.as_secs()),
        delivered,
    };

    let request = FallbackQueryExecutor::request_for(primary, vec![ChatMessage::user(prompt)]);
    let mut fragments =
        tokio::time::timeout(deadline, executor.transport_for(primary).complete_stream(&request))
            .await
            .map_err(|_| timed_out(false))?
            .map_err(|error| StreamFailure {
                error,
                delivered: false,
            })?;

    let mut text = String::new();
    let mut delivered = false;
    loop {
        let next = tokio::time::timeout(deadline, fragments.next())
            .await
            .map_err(|_| timed_out(delivered))?;

        match next {
            None => return Ok(StreamOutcome::Finished(text)),
            Some(Ok(fragment)) if fragment.is_empty() => continue,
            Some(Ok(fragment)) => {
                text.push_str(&fragment);
                if tx.send(StreamEvent::Token(fragment)).await.is_err() {
                    return Ok(StreamOutcome::ConsumerGone);
                }
                delivered = true;
            }
            Some(Err(error)) => return Err(StreamFailure { error, delivered }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_common::fake::{FakeModelBackend, FakeSearchProvider};
    use aegis_common::{BackendConfig, ConsensusConfig};

    fn aggregator(fake: Arc<FakeModelBackend>, search: FakeSearchProvider) -> StreamingResponseAggregator {
        let config = ConsensusConfig::new(
            vec![BackendConfig::new("a", 0.7, 100), BackendConfig::new("b", 0.7, 100)],
            BackendConfig::new("fb", 0.7, 100),
            0.5,
        );
        let executor = Arc::new(FallbackQueryExecutor::new(fake, 5));
        let engine = ConsensusEngine::new(executor, Arc::new(search), config, 5).unwrap();
        StreamingResponseAggregator::new(Arc::new(engine))
    }

    #[tokio::test]
    async fn test_stream_tokens_then_done_with_sources() {
        let fake = Arc::new(
            FakeModelBackend::new().with_stream("a", vec![Ok("Hel".into()), Ok("lo".into())]),
        );
        let search = FakeSearchProvider::with_results(vec![SearchResult::new("t", "u", "s")]);
        let events: Vec<_> = aggregator(fake.clone(), search).stream("hi").collect().await;

        assert_eq!(events[0], StreamEvent::Token("Hel".into()));
        assert_eq!(events[1], StreamEvent::Token("lo".into()));
        match &events[2] {
            StreamEvent::Done(response) => {
                assert_eq!(response.content, "Hello");
                assert_eq!(response.backend_name, "a");
                assert_eq!(response.sources.len(), 1);
            }
            other => panic!("expected Done, got {:?}", other),
        }
        assert_eq!(events.len(), 3);
        assert_eq!(fake.call_count("b"), 0);
    }

    #[tokio::test]
    async fn test_open_failure_goes_straight_to_batch() {
        let fake = Arc::new(
            FakeModelBackend::new()
                .with_error("a", BackendError::Transport("refused".into()))
                .with_response("b", "4.")
                .with_response("fb", "4."),
        );
        let events: Vec<_> = aggregator(fake, FakeSearchProvider::with_results(Vec::new()))
            .stream("What is 2+2?")
            .collect()
            .await;

        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], StreamEvent::Done(r) if r.content == "4."));
    }

    #[tokio::test]
    async fn test_batch_failure_after_stream_failure_is_failed_event() {
        let fake = Arc::new(FakeModelBackend::new());
        let events: Vec<_> = aggregator(fake, FakeSearchProvider::with_results(Vec::new()))
            .stream("q")
            .collect()
            .await;

        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], StreamEvent::Failed(_)));
        assert!(events[0].is_terminal());
    }
}
