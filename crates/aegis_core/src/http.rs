//! OpenAI-compatible chat completions transport.
//!
//! Batch calls read `choices[0].message.content` and the usage counters.
//! Streaming calls read Server-Sent Events (`data: {json}` lines carrying
//! `choices[0].delta.content`) until `data: [DONE]`.

use std::time::Duration;

use aegis_common::{
    BackendError, ChatRole, Completion, CompletionRequest, EndpointConfig, FragmentStream,
    ModelBackend, TokenUsage,
};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

/// One parsed SSE line.
#[derive(Debug, Clone, PartialEq)]
pub enum SseLine {
    Fragment(String),
    Done,
    /// Blank line, comment, or a chunk without text.
    Skip,
}

/// Parse a single line of an SSE chat stream.
pub fn parse_sse_line(line: &str) -> Result<SseLine, BackendError> {
    let line = line.trim();
    let Some(payload) = line.strip_prefix("data:") else {
        return Ok(SseLine::Skip);
    };
    let payload = payload.trim();
    if payload == "[DONE]" {
        return Ok(SseLine::Done);
    }

    let chunk: Value = serde_json::from_str(payload)
        .map_err(|e| BackendError::Transport(format!("Failed to parse chunk: {}", e)))?;
    match chunk["choices"][0]["delta"]["content"].as_str() {
        Some(content) if !content.is_empty() => Ok(SseLine::Fragment(content.to_string())),
        _ => Ok(SseLine::Skip),
    }
}

/// Map a non-success response onto the error taxonomy.
pub fn classify_failure(status: StatusCode, body: &str) -> BackendError {
    let lowered = body.to_lowercase();
    if status == StatusCode::TOO_MANY_REQUESTS
        || lowered.contains("too many requests")
        || lowered.contains("rate limit")
    {
        return BackendError::RateLimited(format!("HTTP {}: {}", status, body));
    }
    BackendError::Transport(format!("HTTP {}: {}", status, body))
}

fn role_name(role: ChatRole) -> &'static str {
    match role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
    }
}

/// HTTP transport for one endpoint.
pub struct HttpChatBackend {
    base_url: String,
    api_key: Option<String>,
    timeout_secs: u64,
    client: reqwest::Client,
}

impl HttpChatBackend {
    /// Build the transport, reading the API key from the environment.
    pub fn new(endpoint: &EndpointConfig) -> Result<Self, BackendError> {
        let api_key = endpoint.api_key()?;
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(endpoint.timeout_secs))
            .build()
            .map_err(|e| BackendError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: endpoint.base_url.trim_end_matches('/').to_string(),
            api_key,
            timeout_secs: endpoint.timeout_secs,
            client,
        })
    }

    fn body(&self, request: &CompletionRequest, stream: bool) -> Value {
        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|m| json!({ "role": role_name(m.role), "content": m.content }))
            .collect();
        json!({
            "model": request.model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "stream": stream,
        })
    }

    fn map_request_error(&self, err: reqwest::Error) -> BackendError {
        if err.is_timeout() {
            BackendError::Timeout(self.timeout_secs)
        } else {
            BackendError::Transport(format!("Request failed: {}", err))
        }
    }

    async fn send(&self, body: &Value, whole_request_timeout: bool) -> Result<reqwest::Response, BackendError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut req = self.client.post(&url).json(body);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }
        if whole_request_timeout {
            req = req.timeout(Duration::from_secs(self.timeout_secs));
        }

        let response = req.send().await.map_err(|e| self.map_request_error(e))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, &body));
        }
        Ok(response)
    }
}

#[async_trait]
impl ModelBackend for HttpChatBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, BackendError> {
        let response = self.send(&self.body(request, false), true).await?;
        let json: Value = response
            .json()
            .await
            .map_err(|e| BackendError::Transport(format!("Failed to parse response: {}", e)))?;

        let text = json["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let count = |key: &str| json["usage"][key].as_u64().unwrap_or(0) as u32;
        let usage = TokenUsage {
            prompt_tokens: count("prompt_tokens"),
            completion_tokens: count("completion_tokens"),
            total_tokens: count("total_tokens"),
        };
        debug!("{} answered with {} chars", request.model, text.len());
        Ok(Completion { text, usage })
    }

    async fn complete_stream(&self, request: &CompletionRequest) -> Result<FragmentStream, BackendError> {
        let response = self.send(&self.body(request, true), false).await?;
        let (tx, rx) = mpsc::channel(1);

        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut pending: Vec<u8> = Vec::new();

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx
                            .send(Err(BackendError::Transport(format!("Failed to read stream: {}", e))))
                            .await;
                        return;
                    }
                };
                pending.extend_from_slice(&chunk);

                // A chunk may end mid-character, so lines are split on raw bytes.
                while let Some(newline) = pending.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = pending.drain(..=newline).collect();
                    match parse_sse_line(&String::from_utf8_lossy(&line)) {
                        Ok(SseLine::Fragment(text)) => {
                            if tx.send(Ok(text)).await.is_err() {
                                return;
                            }
                        }
                        Ok(SseLine::Done) => return,
                        Ok(SseLine::Skip) => {}
                        Err(err) => {
                            let _ = tx.send(Err(err)).await;
                            return;
                        }
                    }
                }
            }

            // Final line without a trailing newline.
            if let Ok(SseLine::Done) = parse_sse_line(&String::from_utf8_lossy(&pending)) {
                return;
            }
            let _ = tx
                .send(Err(BackendError::Transport("stream ended before [DONE]".to_string())))
                .await;
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sse_fragment() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#;
        assert_eq!(parse_sse_line(line).unwrap(), SseLine::Fragment("Hel".to_string()));
    }

    #[test]
    fn test_parse_sse_done_and_skips() {
        assert_eq!(parse_sse_line("data: [DONE]\n").unwrap(), SseLine::Done);
        assert_eq!(parse_sse_line("").unwrap(), SseLine::Skip);
        assert_eq!(parse_sse_line(": keep-alive").unwrap(), SseLine::Skip);
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap(),
            SseLine::Skip
        );
    }

    #[test]
    fn test_parse_sse_bad_json() {
        assert!(matches!(parse_sse_line("data: {oops"), Err(BackendError::Transport(_))));
    }

    #[test]
    fn test_classify_rate_limits() {
        assert!(matches!(
            classify_failure(StatusCode::TOO_MANY_REQUESTS, ""),
            BackendError::RateLimited(_)
        ));
        assert!(matches!(
            classify_failure(StatusCode::SERVICE_UNAVAILABLE, "Too Many Requests, slow down"),
            BackendError::RateLimited(_)
        ));
        assert!(matches!(
            classify_failure(StatusCode::BAD_REQUEST, "{\"error\":\"Rate limit reached\"}"),
            BackendError::RateLimited(_)
        ));
        assert!(matches!(
            classify_failure(StatusCode::INTERNAL_SERVER_ERROR, "boom"),
            BackendError::Transport(_)
        ));
    }

    #[test]
    fn test_missing_key_fails_construction() {
        let endpoint = EndpointConfig {
            base_url: "https://api.example.invalid/v1/".to_string(),
            api_key_env: Some("AEGIS_HTTP_TEST_KEY_NEVER_SET".to_string()),
            timeout_secs: 5,
        };
        assert!(matches!(
            HttpChatBackend::new(&endpoint),
            Err(BackendError::Configuration(_))
        ));
    }

    #[test]
    fn test_body_shape() {
        let endpoint = EndpointConfig {
            base_url: "http://localhost:8080/v1/".to_string(),
            api_key_env: None,
            timeout_secs: 5,
        };
        let backend = HttpChatBackend::new(&endpoint).unwrap();
        assert_eq!(backend.base_url, "http://localhost:8080/v1");

        let request = CompletionRequest {
            messages: vec![aegis_common::ChatMessage::system("s"), aegis_common::ChatMessage::user("u")],
            model: "m".to_string(),
            temperature: 0.0,
            max_tokens: 10,
        };
        let body = backend.body(&request, true);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "u");
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_tokens"], 10);
    }
}
