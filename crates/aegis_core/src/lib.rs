//! Aegis engine - consensus answers and risk audits.
//!
//! Flow:
//! 1. Web search grounds the prompt (degrades to a synthetic result)
//! 2. 2-3 backends answer concurrently, each with one fallback hop
//! 3. Answers are reduced by word overlap into one published answer
//! 4. A judge backend scores the answer on five risk metrics
//!
//! Invariants:
//! - At most two backend calls per primary per answer
//! - Generation fails only when a whole fallback chain is exhausted
//! - Audits never fail; unreachable judges yield placeholder reports

pub mod audit;
pub mod consensus;
pub mod fallback;
pub mod http;
pub mod orchestrator;
pub mod search;
pub mod streaming;
pub mod tavily;

pub use audit::RiskAuditPipeline;
pub use consensus::{select_three_way, ConsensusEngine, ThreeWayOutcome};
pub use fallback::FallbackQueryExecutor;
pub use http::HttpChatBackend;
pub use orchestrator::{Orchestrator, DEMO_LABEL, SYSTEM_ERROR_LABEL};
pub use search::{contextual_prompt, grounded_search, sanitize_query, UnavailableSearch};
pub use streaming::{StreamEvent, StreamingResponseAggregator};
pub use tavily::TavilySearch;
