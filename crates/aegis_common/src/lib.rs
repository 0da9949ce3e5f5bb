//! Shared types and contracts for Aegis components.
//!
//! Data model, error taxonomy, configuration, backend traits, lexical
//! similarity and scripted fakes used by the engine and its tests.

pub mod backend;
pub mod config;
pub mod error;
pub mod fake;
pub mod progress;
pub mod report;
pub mod similarity;
pub mod types;

pub use backend::{Completion, CompletionRequest, FragmentStream, ModelBackend, SearchProvider};
pub use config::{AuditConfig, BackendConfig, Config, ConsensusConfig, EndpointConfig, SearchConfig};
pub use error::{BackendError, CompoundFailure, ConfigError, GenerationError, ParseError};
pub use progress::{AuditProgress, CallbackSink, MetricState, NoProgress, ProgressLog, ProgressSink};
pub use report::{AuditItem, AuditMode, Metric, RiskAuditReport, RiskMetrics, Severity, StatusGlyph};
pub use similarity::similarity;
pub use types::{
    ChatMessage, ChatRole, ConversationMessage, ModelResponse, Role, SearchResult, TokenUsage,
};
