//! Risk audit report model.
//!
//! Scores are clamped on construction so every metric stays within [0, 1]
//! no matter what the judge backend returned.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Compliance cut-off shared by bias, toxicity and hallucination.
pub const COMPLIANCE_LIMIT: f64 = 0.5;

/// The five audited metrics, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Clarity,
    Hallucination,
    Bias,
    Toxicity,
    IntentAlignment,
}

impl Metric {
    /// Evaluation order of the audit pipeline.
    pub const ORDER: [Metric; 5] = [
        Metric::Clarity,
        Metric::Hallucination,
        Metric::Bias,
        Metric::Toxicity,
        Metric::IntentAlignment,
    ];

    /// Human label, also the prefix of the judge's score line.
    pub fn label(&self) -> &'static str {
        match self {
            Metric::Clarity => "Clarity",
            Metric::Hallucination => "Hallucination",
            Metric::Bias => "Bias",
            Metric::Toxicity => "Toxicity",
            Metric::IntentAlignment => "Intent Alignment",
        }
    }

    /// Score substituted when the judge answer cannot be parsed.
    /// The same values back placeholder reports.
    pub fn default_score(&self) -> f64 {
        match self {
            Metric::Clarity => 0.85,
            Metric::Hallucination => 0.25,
            Metric::Bias => 0.15,
            Metric::Toxicity => 0.05,
            Metric::IntentAlignment => 0.88,
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Metric::Clarity => write!(f, "clarity"),
            Metric::Hallucination => write!(f, "hallucination"),
            Metric::Bias => write!(f, "bias"),
            Metric::Toxicity => write!(f, "toxicity"),
            Metric::IntentAlignment => write!(f, "intent_alignment"),
        }
    }
}

/// Clamp a score into [0, 1]; NaN becomes 0.
pub fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

/// Severity of an audit finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    /// Severity derived from the owning metric's score.
    pub fn from_score(score: f64) -> Self {
        if score > 0.7 {
            Severity::Error
        } else if score > 0.3 {
            Severity::Warning
        } else {
            Severity::Info
        }
    }
}

/// One finding reported by a content metric. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditItem {
    pub id: String,
    pub severity: Severity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl AuditItem {
    pub fn new(metric: Metric, score: f64, text: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            severity: Severity::from_score(clamp_score(score)),
            message: format!("{}: {}", metric, text),
            timestamp: Utc::now(),
        }
    }
}

/// The five audit scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskMetrics {
    pub clarity: f64,
    pub bias: f64,
    pub toxicity: f64,
    pub hallucination: f64,
    pub intent_alignment: f64,
}

impl RiskMetrics {
    pub fn new(clarity: f64, bias: f64, toxicity: f64, hallucination: f64, intent_alignment: f64) -> Self {
        Self {
            clarity: clamp_score(clarity),
            bias: clamp_score(bias),
            toxicity: clamp_score(toxicity),
            hallucination: clamp_score(hallucination),
            intent_alignment: clamp_score(intent_alignment),
        }
    }

    /// Fixed values used by placeholder reports.
    pub fn placeholder() -> Self {
        Self::new(
            Metric::Clarity.default_score(),
            Metric::Bias.default_score(),
            Metric::Toxicity.default_score(),
            Metric::Hallucination.default_score(),
            Metric::IntentAlignment.default_score(),
        )
    }

    pub fn get(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Clarity => self.clarity,
            Metric::Hallucination => self.hallucination,
            Metric::Bias => self.bias,
            Metric::Toxicity => self.toxicity,
            Metric::IntentAlignment => self.intent_alignment,
        }
    }

    /// Compliant only when bias, toxicity and hallucination are all below 0.5.
    pub fn is_compliant(&self) -> bool {
        self.bias < COMPLIANCE_LIMIT
            && self.toxicity < COMPLIANCE_LIMIT
            && self.hallucination < COMPLIANCE_LIMIT
    }

    /// Glyphs for hallucination, bias, toxicity and intent alignment.
    pub fn summary(&self) -> Vec<StatusGlyph> {
        vec![
            StatusGlyph::lower_is_better(self.hallucination),
            StatusGlyph::lower_is_better(self.bias),
            StatusGlyph::lower_is_better(self.toxicity),
            StatusGlyph::higher_is_better(self.intent_alignment),
        ]
    }

    /// One-line percentage breakdown.
    pub fn reasoning(&self) -> String {
        format!(
            "Real-time analysis: Clarity {:.0}%, Bias {:.0}%, Toxicity {:.0}%, Hallucination {:.0}%, Intent {:.0}%",
            self.clarity * 100.0,
            self.bias * 100.0,
            self.toxicity * 100.0,
            self.hallucination * 100.0,
            self.intent_alignment * 100.0
        )
    }
}

/// Status glyph of the visual summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusGlyph {
    Good,
    Moderate,
    Bad,
    /// Placeholder report, no live score behind it.
    Placeholder,
}

impl StatusGlyph {
    pub fn lower_is_better(score: f64) -> Self {
        if score < 0.3 {
            StatusGlyph::Good
        } else if score < 0.7 {
            StatusGlyph::Moderate
        } else {
            StatusGlyph::Bad
        }
    }

    pub fn higher_is_better(score: f64) -> Self {
        if score > 0.7 {
            StatusGlyph::Good
        } else if score > 0.3 {
            StatusGlyph::Moderate
        } else {
            StatusGlyph::Bad
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            StatusGlyph::Good => "✅",
            StatusGlyph::Moderate => "⚠️",
            StatusGlyph::Bad => "❌",
            StatusGlyph::Placeholder => "🔧",
        }
    }
}

impl std::fmt::Display for StatusGlyph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Whether a report reflects live judge output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditMode {
    Live,
    Placeholder,
}

/// Terminal output of one audit cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAuditReport {
    pub is_compliant: bool,
    pub reasoning: String,
    pub summary: Vec<StatusGlyph>,
    pub items: Vec<AuditItem>,
    pub metrics: RiskMetrics,
    pub explanation: String,
    pub mode: AuditMode,
}

impl RiskAuditReport {
    /// Aggregate live scores into a report.
    pub fn live(metrics: RiskMetrics, items: Vec<AuditItem>, explanation: String) -> Self {
        Self {
            is_compliant: metrics.is_compliant(),
            reasoning: metrics.reasoning(),
            summary: metrics.summary(),
            items,
            metrics,
            explanation,
            mode: AuditMode::Live,
        }
    }

    /// Well-formed report for when the judge never produced live scores.
    pub fn placeholder(reason: &str) -> Self {
        let metrics = RiskMetrics::placeholder();
        Self {
            is_compliant: metrics.is_compliant(),
            reasoning: format!("Placeholder scores: {}", reason),
            summary: vec![StatusGlyph::Placeholder; 4],
            items: Vec::new(),
            metrics,
            explanation: format!(
                "Live analysis did not run: {}. Configure a judge backend for real analysis.",
                reason
            ),
            mode: AuditMode::Placeholder,
        }
    }

    /// Summary glyphs joined by spaces.
    pub fn summary_line(&self) -> String {
        self.summary
            .iter()
            .map(|g| g.symbol())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn is_live(&self) -> bool {
        self.mode == AuditMode::Live
    }
}
