//! Risk audit pipeline.
//!
//! Scores a published answer on five metrics, one judge call each, in a
//! fixed order: clarity, hallucination, bias, toxicity, intent alignment.
//!
//! Invariants:
//! - `analyze_risk` never fails; it always returns a well-formed report
//! - every metric ends in the `complete` state, even on early exit
//! - a judge reply that breaks the grammar costs only that metric (default score)
//! - a judge that cannot be reached turns the whole run into a placeholder report

pub mod grammar;
pub mod prompts;

use std::sync::Arc;
use std::time::Duration;

use aegis_common::{
    AuditItem, AuditProgress, BackendConfig, BackendError, ChatMessage, CompletionRequest,
    ConversationMessage, Metric, ModelBackend, ProgressSink, RiskAuditReport, RiskMetrics,
};
use tracing::{info, warn};

use grammar::{parse_clarity, parse_content, parse_intent};

/// Explanation used when the intent reply could not be parsed.
const UNPARSED_EXPLANATION: &str = "Intent alignment reply could not be parsed; default score used.";

/// Outcome of one metric analysis.
struct MetricOutcome {
    score: f64,
    items: Vec<AuditItem>,
    explanation: Option<String>,
}

impl MetricOutcome {
    fn score(score: f64) -> Self {
        Self {
            score,
            items: Vec::new(),
            explanation: None,
        }
    }
}

/// Runs the five judge analyses and aggregates them into a report.
pub struct RiskAuditPipeline {
    judge: BackendConfig,
    transport: Option<Arc<dyn ModelBackend>>,
    unconfigured_reason: String,
    pacing: Duration,
    query_timeout_secs: u64,
}

impl RiskAuditPipeline {
    /// Pipeline backed by a live judge.
    pub fn new(transport: Arc<dyn ModelBackend>, judge: BackendConfig) -> Self {
        Self {
            judge,
            transport: Some(transport),
            unconfigured_reason: String::new(),
            pacing: Duration::ZERO,
            query_timeout_secs: 60,
        }
    }

    /// Pipeline without a judge; every audit returns a placeholder report.
    pub fn unconfigured(judge: BackendConfig, reason: impl Into<String>) -> Self {
        Self {
            judge,
            transport: None,
            unconfigured_reason: reason.into(),
            pacing: Duration::ZERO,
            query_timeout_secs: 60,
        }
    }

    /// Delay between a metric's `analyzing` and `complete` events.
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_query_timeout(mut self, secs: u64) -> Self {
        self.query_timeout_secs = secs;
        self
    }

    pub fn is_live(&self) -> bool {
        self.transport.is_some()
    }

    /// Audit `text`. `history` defaults to a single synthetic exchange.
    pub async fn analyze_risk(
        &self,
        text: &str,
        history: Option<&[ConversationMessage]>,
        progress: &dyn ProgressSink,
    ) -> RiskAuditReport {
        for metric in Metric::ORDER {
            progress.emit(AuditProgress::pending(metric));
        }

        let Some(transport) = self.transport.as_deref() else {
            warn!("Judge not configured, placeholder audit: {}", self.unconfigured_reason);
            complete_all(progress, &Metric::ORDER);
            return RiskAuditReport::placeholder(&self.unconfigured_reason);
        };

        let history = match history {
            Some(history) if !history.is_empty() => history.to_vec(),
            _ => vec![
                ConversationMessage::user("User query"),
                ConversationMessage::assistant(text),
            ],
        };

        let mut scores = [0.0; 5];
        let mut items = Vec::new();
        let mut explanation = String::new();

        for (index, metric) in Metric::ORDER.into_iter().enumerate() {
            progress.emit(AuditProgress::analyzing(metric));

            let outcome = match self.analyze_metric(transport, metric, text, &history).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    warn!("Judge unreachable during {} analysis: {}", metric, err);
                    complete_all(progress, &Metric::ORDER[index..]);
                    return RiskAuditReport::placeholder(&format!("judge backend unreachable ({})", err));
                }
            };

            scores[index] = outcome.score;
            items.extend(outcome.items);
            if let Some(found) = outcome.explanation {
                explanation = found;
            }

            if !self.pacing.is_zero() {
                tokio::time::sleep(self.pacing).await;
            }
            progress.emit(AuditProgress::complete(metric));
        }

        let [clarity, hallucination, bias, toxicity, intent] = scores;
        let metrics = RiskMetrics::new(clarity, bias, toxicity, hallucination, intent);
        let report = RiskAuditReport::live(metrics, items, explanation);
        info!("Audit complete: {} (compliant: {})", report.reasoning, report.is_compliant);
        report
    }

    async fn analyze_metric(
        &self,
        transport: &dyn ModelBackend,
        metric: Metric,
        text: &str,
        history: &[ConversationMessage],
    ) -> Result<MetricOutcome, BackendError> {
        let outcome = match metric {
            Metric::Clarity => {
                let reply = self
                    .ask(transport, prompts::clarity_prompt(), text.to_string(), prompts::CLARITY_MAX_TOKENS)
                    .await?;
                let score = parse_clarity(&reply).unwrap_or_else(|err| {
                    warn!("Unparseable {} reply ({}), using default", metric, err);
                    metric.default_score()
                });
                MetricOutcome::score(score)
            }
            Metric::Hallucination | Metric::Bias | Metric::Toxicity => {
                let reply = self
                    .ask(
                        transport,
                        prompts::content_prompt(metric),
                        prompts::content_input(text),
                        prompts::CONTENT_MAX_TOKENS,
                    )
                    .await?;
                match parse_content(metric, &reply) {
                    Ok(analysis) => MetricOutcome {
                        score: analysis.score,
                        items: analysis
                            .issues
                            .iter()
                            .map(|issue| AuditItem::new(metric, analysis.score, issue))
                            .collect(),
                        explanation: None,
                    },
                    Err(err) => {
                        warn!("Unparseable {} reply ({}), using default", metric, err);
                        MetricOutcome::score(metric.default_score())
                    }
                }
            }
            Metric::IntentAlignment => {
                let reply = self
                    .ask(
                        transport,
                        prompts::intent_prompt(),
                        prompts::format_history(history),
                        prompts::INTENT_MAX_TOKENS,
                    )
                    .await?;
                match parse_intent(&reply) {
                    Ok(analysis) => MetricOutcome {
                        score: analysis.score,
                        items: Vec::new(),
                        explanation: Some(analysis.explanation),
                    },
                    Err(err) => {
                        warn!("Unparseable {} reply ({}), using default", metric, err);
                        MetricOutcome {
                            explanation: Some(UNPARSED_EXPLANATION.to_string()),
                            ..MetricOutcome::score(metric.default_score())
                        }
                    }
                }
            }
        };
        Ok(outcome)
    }

    async fn ask(
        &self,
        transport: &dyn ModelBackend,
        system: String,
        user: String,
        max_tokens: u32,
    ) -> Result<String, BackendError> {
        let request = CompletionRequest {
            messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
            model: self.judge.name.clone(),
            temperature: self.judge.temperature,
            max_tokens,
        };
        let deadline = Duration::from_secs(self.query_timeout_secs);
        let completion = tokio::time::timeout(deadline, transport.complete(&request))
            .await
            .map_err(|_| BackendError::Timeout(self.query_timeout_secs))??;
        Ok(completion.text)
    }
}

fn complete_all(progress: &dyn ProgressSink, metrics: &[Metric]) {
    for metric in metrics {
        progress.emit(AuditProgress::complete(*metric));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_common::fake::FakeModelBackend;
    use aegis_common::{AuditMode, MetricState, ProgressLog, Severity, StatusGlyph};

    fn judge() -> BackendConfig {
        BackendConfig::new("judge", 0.0, 200)
    }

    /// Judge replying per metric, keyed on the system prompt
    fn scripted_judge(clarity: &'static str, content: fn(&str) -> String, intent: &'static str) -> FakeModelBackend {
        FakeModelBackend::new().with_responder("judge", move |request| {
            let system = request.system_prompt().unwrap_or_default();
            if system.contains("clarity analyzer") {
                Ok(clarity.to_string())
            } else if system.contains("alignment analyzer") {
                Ok(intent.to_string())
            } else if system.contains("Bias Score") {
                Ok(content("Bias"))
            } else if system.contains("Toxicity Score") {
                Ok(content("Toxicity"))
            } else {
                Ok(content("Hallucination"))
            }
        })
    }

    fn clean(label: &str) -> String {
        format!("{} Score: 0.1", label)
    }

    #[tokio::test]
    async fn test_clean_audit_is_compliant() {
        let fake = Arc::new(scripted_judge(
            "0.9",
            clean,
            "Intent Alignment: 0.95\nAlignment Explanation: Answers the question directly.",
        ));
        let pipeline = RiskAuditPipeline::new(fake.clone(), judge());
        let log = ProgressLog::new();

        let report = pipeline.analyze_risk("4.", None, &log).await;
        assert!(report.is_compliant);
        assert!(report.items.is_empty());
        assert_eq!(report.mode, AuditMode::Live);
        assert_eq!(report.summary, vec![StatusGlyph::Good; 4]);
        assert_eq!(report.metrics.clarity, 0.9);
        assert_eq!(report.explanation, "Answers the question directly.");
        assert_eq!(fake.call_count("judge"), 5);
    }

    #[tokio::test]
    async fn test_progress_sequence() {
        let fake = Arc::new(scripted_judge("0.9", clean, "Intent Alignment: 0.9\nAlignment Explanation: ok"));
        let pipeline = RiskAuditPipeline::new(fake, judge());
        let log = ProgressLog::new();
        pipeline.analyze_risk("text", None, &log).await;

        let events = log.events();
        assert_eq!(events.len(), 15);
        assert!(events[..5].iter().all(|e| e.state == MetricState::Pending));
        assert_eq!(events[5], AuditProgress::analyzing(Metric::Clarity));
        assert_eq!(events[6], AuditProgress::complete(Metric::Clarity));
        assert_eq!(events[7], AuditProgress::analyzing(Metric::Hallucination));
        assert_eq!(events[14], AuditProgress::complete(Metric::IntentAlignment));
    }

    #[tokio::test]
    async fn test_issues_become_items_with_score_severity() {
        let fake = Arc::new(scripted_judge(
            "0.8",
            |label| {
                if label == "Toxicity" {
                    "Toxicity Score: 0.85\nIssue: \"you fool\"".to_string()
                } else {
                    format!("{} Score: 0.4\nIssue: \"vague claim\"", label)
                }
            },
            "Intent Alignment: 0.5\nAlignment Explanation: partial",
        ));
        let pipeline = RiskAuditPipeline::new(fake, judge());
        let report = pipeline.analyze_risk("text", None, &ProgressLog::new()).await;

        assert!(!report.is_compliant);
        assert_eq!(report.items.len(), 3);
        assert_eq!(report.items[0].message, "hallucination: vague claim");
        assert_eq!(report.items[0].severity, Severity::Warning);
        assert_eq!(report.items[2].message, "toxicity: you fool");
        assert_eq!(report.items[2].severity, Severity::Error);
    }

    #[tokio::test]
    async fn test_unparseable_reply_uses_default_score() {
        let fake = Arc::new(scripted_judge(
            "crystal clear",
            |label| format!("{} Score: 0.1\nI found nothing", label),
            "whatever",
        ));
        let pipeline = RiskAuditPipeline::new(fake, judge());
        let report = pipeline.analyze_risk("text", None, &ProgressLog::new()).await;

        assert!(report.is_live());
        assert_eq!(report.metrics, RiskMetrics::placeholder());
        assert_eq!(report.explanation, UNPARSED_EXPLANATION);
    }

    #[tokio::test]
    async fn test_unconfigured_judge_gives_placeholder() {
        let pipeline = RiskAuditPipeline::unconfigured(judge(), "no API key");
        let log = ProgressLog::new();
        let report = pipeline.analyze_risk("text", None, &log).await;

        assert_eq!(report.mode, AuditMode::Placeholder);
        assert_eq!(report.summary, vec![StatusGlyph::Placeholder; 4]);
        assert!(report.explanation.contains("no API key"));
        for metric in Metric::ORDER {
            assert_eq!(log.state_of(metric), Some(MetricState::Complete));
        }
    }

    #[tokio::test]
    async fn test_transport_failure_aborts_into_placeholder() {
        let fake = Arc::new(FakeModelBackend::new().with_responses(
            "judge",
            vec![
                Ok("0.9".to_string()),
                Ok("Hallucination Score: 0.1".to_string()),
                Err(BackendError::Transport("connection reset".into())),
            ],
        ));
        let pipeline = RiskAuditPipeline::new(fake.clone(), judge());
        let log = ProgressLog::new();
        let report = pipeline.analyze_risk("text", None, &log).await;

        assert!(!report.is_live());
        assert!(report.explanation.contains("connection reset"));
        assert_eq!(fake.call_count("judge"), 3);
        for metric in Metric::ORDER {
            assert_eq!(log.state_of(metric), Some(MetricState::Complete));
        }
    }

    #[tokio::test]
    async fn test_default_history_is_synthesized() {
        let fake = Arc::new(scripted_judge("0.9", clean, "Intent Alignment: 0.9\nAlignment Explanation: ok"));
        let pipeline = RiskAuditPipeline::new(fake.clone(), judge());
        pipeline.analyze_risk("Paris.", None, &ProgressLog::new()).await;

        let intent_request = fake.requests().pop().unwrap();
        assert_eq!(
            intent_request.user_prompt(),
            Some("User: \"User query\"\nAssistant: \"Paris.\"")
        );
        assert_eq!(intent_request.max_tokens, prompts::INTENT_MAX_TOKENS);
    }
}
