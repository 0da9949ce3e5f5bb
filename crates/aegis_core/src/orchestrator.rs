//! Composition root.
//!
//! Builds transports, the consensus engine, the streaming aggregator and the
//! audit pipeline from configuration. Missing credentials never surface as
//! errors here: the answer side falls back to a demo answer and the audit
//! side to placeholder reports.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use aegis_common::{
    BackendError, Config, ConfigError, ConversationMessage, GenerationError, ModelBackend,
    ModelResponse, ProgressSink, RiskAuditReport, SearchProvider,
};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use tracing::{info, warn};

use crate::audit::RiskAuditPipeline;
use crate::consensus::ConsensusEngine;
use crate::fallback::FallbackQueryExecutor;
use crate::http::HttpChatBackend;
use crate::search::UnavailableSearch;
use crate::streaming::{StreamEvent, StreamingResponseAggregator};
use crate::tavily::TavilySearch;

/// Backend label of demo answers
pub const DEMO_LABEL: &str = "demo";

/// Backend label of the apology published when generation fails
pub const SYSTEM_ERROR_LABEL: &str = "system-error";

/// Answer published when no live model backend is configured.
pub fn demo_response(reason: &str) -> ModelResponse {
    ModelResponse::new(
        format!(
            "Demo mode: live model backends are not configured ({}). \
             Set the API key environment variable named in your endpoint configuration to get real consensus answers.",
            reason
        ),
        DEMO_LABEL,
    )
}

/// Apology published in place of a failed generation.
pub fn system_error_response(err: &GenerationError) -> ModelResponse {
    ModelResponse::new(
        format!(
            "I'm sorry, I couldn't produce an answer right now. \
             Every fallback failed for: {}. Please try again in a moment.",
            err.backend_names().join(", ")
        ),
        SYSTEM_ERROR_LABEL,
    )
}

enum AnswerSide {
    Live {
        engine: Arc<ConsensusEngine>,
        aggregator: StreamingResponseAggregator,
    },
    Demo {
        reason: String,
    },
}

/// Entry point for consumers: answers prompts and audits answers.
pub struct Orchestrator {
    answers: AnswerSide,
    pipeline: RiskAuditPipeline,
}

impl Orchestrator {
    /// Orchestrator around an already built engine and pipeline.
    pub fn new(engine: Arc<ConsensusEngine>, pipeline: RiskAuditPipeline) -> Self {
        let aggregator = StreamingResponseAggregator::new(engine.clone());
        Self {
            answers: AnswerSide::Live { engine, aggregator },
            pipeline,
        }
    }

    /// Orchestrator answering every prompt with the demo answer.
    pub fn demo(reason: impl Into<String>, pipeline: RiskAuditPipeline) -> Self {
        Self {
            answers: AnswerSide::Demo {
                reason: reason.into(),
            },
            pipeline,
        }
    }

    /// Wire everything from configuration. Only invalid configuration fails.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut transports: HashMap<String, Result<Arc<dyn ModelBackend>, BackendError>> = HashMap::new();
        for (name, endpoint) in &config.endpoints {
            let transport = HttpChatBackend::new(endpoint).map(|t| Arc::new(t) as Arc<dyn ModelBackend>);
            if let Err(ref err) = transport {
                warn!("Endpoint {} unavailable: {}", name, err);
            }
            transports.insert(name.clone(), transport);
        }

        let pipeline = Self::build_pipeline(config, &transports);

        let consensus_endpoints: BTreeSet<&str> = config
            .consensus
            .backends()
            .map(|b| b.endpoint.as_str())
            .collect();
        let mut routes: Vec<(String, Arc<dyn ModelBackend>)> = Vec::new();
        for endpoint in consensus_endpoints {
            match transports.get(endpoint) {
                Some(Ok(transport)) => routes.push((endpoint.to_string(), transport.clone())),
                Some(Err(err)) => {
                    warn!("Running answers in demo mode: {}", err);
                    return Ok(Self::demo(err.to_string(), pipeline));
                }
                None => {
                    return Err(ConfigError::UnknownEndpoint {
                        backend: "consensus".to_string(),
                        endpoint: endpoint.to_string(),
                    })
                }
            }
        }

        let Some((_, default_transport)) = routes.first().cloned() else {
            return Err(ConfigError::PrimaryCount(0));
        };
        let executor = routes.into_iter().fold(
            FallbackQueryExecutor::new(default_transport, config.consensus.query_timeout_secs),
            |executor, (endpoint, transport)| executor.with_route(endpoint, transport),
        );

        let search = Self::build_search(config);
        let engine = ConsensusEngine::new(
            Arc::new(executor),
            search,
            config.consensus.clone(),
            config.search.max_results,
        )?;

        info!(
            "Live answers from {} backend(s), fallback {}",
            config.consensus.primaries.len(),
            config.consensus.fallback.name
        );
        Ok(Self::new(Arc::new(engine), pipeline))
    }

    fn build_pipeline(
        config: &Config,
        transports: &HashMap<String, Result<Arc<dyn ModelBackend>, BackendError>>,
    ) -> RiskAuditPipeline {
        let judge = config.audit.judge.clone();
        let pipeline = match transports.get(&judge.endpoint) {
            Some(Ok(transport)) => RiskAuditPipeline::new(transport.clone(), judge),
            Some(Err(err)) => RiskAuditPipeline::unconfigured(judge, err.to_string()),
            None => RiskAuditPipeline::unconfigured(judge, "judge endpoint not configured"),
        };
        pipeline
            .with_pacing(Duration::from_millis(config.audit.pacing_ms))
            .with_query_timeout(config.consensus.query_timeout_secs)
    }

    fn build_search(config: &Config) -> Arc<dyn SearchProvider> {
        if !config.search.enabled {
            return Arc::new(UnavailableSearch::new("search disabled"));
        }
        match TavilySearch::new(&config.search) {
            Ok(search) => Arc::new(search),
            Err(err) => {
                warn!("Web search unavailable: {}", err);
                Arc::new(UnavailableSearch::new(err.to_string()))
            }
        }
    }

    pub fn is_demo(&self) -> bool {
        matches!(self.answers, AnswerSide::Demo { .. })
    }

    pub fn audit_is_live(&self) -> bool {
        self.pipeline.is_live()
    }

    /// Answer `prompt` with the full consensus. Never fails.
    pub async fn answer(&self, prompt: &str) -> ConversationMessage {
        let response = match &self.answers {
            AnswerSide::Demo { reason } => demo_response(reason),
            AnswerSide::Live { engine, .. } => match engine.generate(prompt).await {
                Ok(response) => response,
                Err(err) => system_error_response(&err),
            },
        };
        ConversationMessage::from_response(response)
    }

    /// Stream an answer to `prompt`. A failed generation arrives as the apology in `Done`.
    pub fn answer_streaming(&self, prompt: &str) -> BoxStream<'static, StreamEvent> {
        match &self.answers {
            AnswerSide::Demo { reason } => {
                stream::once(futures::future::ready(StreamEvent::Done(demo_response(reason)))).boxed()
            }
            AnswerSide::Live { aggregator, .. } => aggregator
                .stream(prompt)
                .map(|event| match event {
                    StreamEvent::Failed(err) => StreamEvent::Done(system_error_response(&err)),
                    other => other,
                })
                .boxed(),
        }
    }

    /// Audit an answer. Never fails.
    pub async fn audit(
        &self,
        text: &str,
        history: Option<&[ConversationMessage]>,
        progress: &dyn ProgressSink,
    ) -> RiskAuditReport {
        self.pipeline.analyze_risk(text, history, progress).await
    }
}
