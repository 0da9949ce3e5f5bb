//! Per-metric progress events for audit visibility.
//!
//! Consumers receive events through a [`ProgressSink`]: an in-process
//! callback ([`CallbackSink`]), an unbounded tokio channel, or a
//! [`ProgressLog`] that keeps the full event history.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tracing::info;

use crate::report::Metric;

/// State of one metric within an audit cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricState {
    Pending,
    Analyzing,
    Complete,
}

impl std::fmt::Display for MetricState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Analyzing => write!(f, "analyzing"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

/// Progress event emitted by the audit pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditProgress {
    pub metric: Metric,
    pub state: MetricState,
}

impl AuditProgress {
    pub fn pending(metric: Metric) -> Self {
        Self {
            metric,
            state: MetricState::Pending,
        }
    }

    pub fn analyzing(metric: Metric) -> Self {
        Self {
            metric,
            state: MetricState::Analyzing,
        }
    }

    pub fn complete(metric: Metric) -> Self {
        Self {
            metric,
            state: MetricState::Complete,
        }
    }

    /// Format for debug display
    pub fn format_debug(&self) -> String {
        format!("[audit->{}] {}", self.metric, self.state)
    }
}

/// Receiver of audit progress events.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: AuditProgress);
}

/// Sink that drops every event.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn emit(&self, _event: AuditProgress) {}
}

impl ProgressSink for UnboundedSender<AuditProgress> {
    fn emit(&self, event: AuditProgress) {
        // A closed receiver means nobody is watching anymore.
        let _ = self.send(event);
    }
}

/// Sink backed by an in-process callback.
pub struct CallbackSink<F>(pub F);

impl<F> ProgressSink for CallbackSink<F>
where
    F: Fn(AuditProgress) + Send + Sync,
{
    fn emit(&self, event: AuditProgress) {
        (self.0)(event)
    }
}

/// Sink that logs each event and keeps the history.
#[derive(Default)]
pub struct ProgressLog {
    events: Mutex<Vec<AuditProgress>>,
}

impl ProgressLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditProgress> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Latest state of a metric, if any event was seen for it.
    pub fn state_of(&self, metric: Metric) -> Option<MetricState> {
        self.events()
            .iter()
            .rev()
            .find(|e| e.metric == metric)
            .map(|e| e.state)
    }
}

impl ProgressSink for ProgressLog {
    fn emit(&self, event: AuditProgress) {
        info!("{}", event.format_debug());
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
