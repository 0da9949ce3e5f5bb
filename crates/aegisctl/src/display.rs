//! Terminal rendering for answers, audit progress and reports.

use std::io::{self, Write};

use aegis_common::{
    AuditProgress, ConversationMessage, Metric, MetricState, RiskAuditReport, Severity,
};
use owo_colors::OwoColorize;

const SEPARATOR: &str = "────────────────────────────────────────";

/// Width of the metric name column
const KEY_WIDTH: usize = 18;

pub fn answer(message: &ConversationMessage) {
    println!();
    println!("{}", message.content);
    answer_footer(message);
}

/// Backend label and sources under an answer.
pub fn answer_footer(message: &ConversationMessage) {
    println!();
    if let Some(backend) = &message.backend_name {
        println!("{} {}", "[ANSWERED BY]".dimmed(), backend.cyan());
    }
    if !message.sources.is_empty() {
        println!("[SOURCES]");
        for source in &message.sources {
            if source.url.is_empty() {
                println!("  * {}", source.title);
            } else {
                println!("  * {} ({})", source.title, source.url.cyan());
            }
        }
    }
}

/// Progress line per metric transition. Pending events are not shown.
pub fn progress(event: AuditProgress) {
    let state = match event.state {
        MetricState::Pending => return,
        MetricState::Analyzing => event.state.to_string().yellow().to_string(),
        MetricState::Complete => event.state.to_string().green().to_string(),
    };
    eprintln!(
        "  {} {:width$} {}",
        "[audit]".bright_cyan(),
        event.metric.label(),
        state,
        width = KEY_WIDTH
    );
}

pub fn report(report: &RiskAuditReport) {
    println!();
    println!("{}", SEPARATOR.dimmed());
    let verdict = if report.is_compliant {
        "[COMPLIANT]".bright_green().to_string()
    } else {
        "[NON-COMPLIANT]".bright_red().to_string()
    };
    println!("{}  {}", verdict, report.summary_line());
    if !report.is_live() {
        println!("{}", "[PLACEHOLDER] scores are not from a live analysis".yellow());
    }
    println!("{}", report.reasoning.dimmed());
    println!();

    for metric in Metric::ORDER {
        let score = report.metrics.get(metric);
        println!("{:width$} {:.2}", metric.label(), score, width = KEY_WIDTH);
    }

    if !report.items.is_empty() {
        println!();
        println!("[FINDINGS]");
        for item in &report.items {
            let severity = match item.severity {
                Severity::Error => "error".bright_red().to_string(),
                Severity::Warning => "warning".yellow().to_string(),
                Severity::Info => "info".dimmed().to_string(),
            };
            println!("  * {:7} {}", severity, item.message);
        }
    }

    println!();
    println!("[INTENT] {}", report.explanation);
    println!("{}", SEPARATOR.dimmed());
}

pub fn warning(message: &str) {
    eprintln!("[WARNING] {}", message.yellow());
}

pub fn info(message: &str) {
    println!("[INFO] {}", message);
}

pub fn chat_banner() {
    println!("{}", "Aegis Veritas chat".bold());
    println!("{}", "Type /clear to reset the conversation, /exit to leave.".dimmed());
}

pub fn chat_prompt() -> io::Result<()> {
    print!("\n{} ", "you>".bright_cyan());
    io::stdout().flush()
}
