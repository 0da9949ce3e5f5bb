//! Backend contracts: text completion and web search.
//!
//! Transports implement these traits; the engine only ever talks to
//! `Arc<dyn ModelBackend>` / `Arc<dyn SearchProvider>` handles.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::BackendError;
use crate::types::{ChatMessage, SearchResult, TokenUsage};

/// Parameters of one completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl CompletionRequest {
    /// The last user message, if any.
    pub fn user_prompt(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == crate::types::ChatRole::User)
            .map(|m| m.content.as_str())
    }

    /// The system message, if any.
    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == crate::types::ChatRole::System)
            .map(|m| m.content.as_str())
    }
}

/// A completed (non-streaming) text block.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
}

/// Ordered text fragments; the stream ends at the end-of-stream marker.
pub type FragmentStream = BoxStream<'static, Result<String, BackendError>>;

/// Model-serving endpoint.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Send a completion request and wait for the whole answer.
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, BackendError>;

    /// Send a completion request and stream the answer fragment by fragment.
    ///
    /// Errors before the first fragment are returned directly; errors after
    /// that arrive as an `Err` item in the stream.
    async fn complete_stream(&self, request: &CompletionRequest) -> Result<FragmentStream, BackendError>;
}

/// Web search endpoint.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>, BackendError>;
}
