//! Line grammar of judge replies.
//!
//! Clarity:   `<float>`
//! Content:   `<Metric> Score: <float>` then zero or more issue lines,
//!            `[Line N] Issue[ (<metric>)]: "<text>"`
//! Intent:    `Intent Alignment: <float>` then `Alignment Explanation: <text>`
//!
//! Blank lines are ignored everywhere. Anything else is a `ParseError`.

use std::sync::LazyLock;

use aegis_common::report::clamp_score;
use aegis_common::{Metric, ParseError};
use regex::Regex;

static ISSUE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)^(?:line\s+\d+\s*[:\-]?\s*)?issue(?:\s*\([^)]*\))?\s*:\s*"?(?P<text>.*?)"?\s*$"#)
        .expect("issue line pattern")
});

const EXPLANATION_LABEL: &str = "Alignment Explanation";

/// Parsed reply for hallucination, bias or toxicity.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentAnalysis {
    pub score: f64,
    pub issues: Vec<String>,
}

/// Parsed reply for intent alignment.
#[derive(Debug, Clone, PartialEq)]
pub struct IntentAnalysis {
    pub score: f64,
    pub explanation: String,
}

fn parse_score(raw: &str) -> Result<f64, ParseError> {
    let value = raw.trim();
    match value.parse::<f64>() {
        Ok(score) if score.is_finite() => Ok(clamp_score(score)),
        _ => Err(ParseError::InvalidScore(value.to_string())),
    }
}

fn content_lines(raw: &str) -> impl Iterator<Item = &str> {
    raw.lines().map(str::trim).filter(|line| !line.is_empty())
}

/// Split `label: value`, checking the label case-insensitively.
fn labelled<'a>(line: &'a str, expected: &str) -> Result<&'a str, ParseError> {
    let (label, value) = line
        .split_once(':')
        .ok_or_else(|| ParseError::MalformedLine(line.to_string()))?;
    if !label.trim().eq_ignore_ascii_case(expected) {
        return Err(ParseError::UnexpectedLabel {
            expected: expected.to_string(),
            found: label.trim().to_string(),
        });
    }
    Ok(value)
}

/// A bare clarity score.
pub fn parse_clarity(raw: &str) -> Result<f64, ParseError> {
    if raw.trim().is_empty() {
        return Err(ParseError::Empty);
    }
    parse_score(raw)
}

/// Score line plus issue lines for a content metric.
pub fn parse_content(metric: Metric, raw: &str) -> Result<ContentAnalysis, ParseError> {
    let mut lines = content_lines(raw);
    let first = lines.next().ok_or(ParseError::Empty)?;
    let score = parse_score(labelled(first, &format!("{} Score", metric.label()))?)?;

    let mut issues = Vec::new();
    for line in lines {
        let captures = ISSUE_LINE
            .captures(line)
            .ok_or_else(|| ParseError::MalformedLine(line.to_string()))?;
        let text = captures.name("text").map(|m| m.as_str().trim()).unwrap_or("");
        if !text.is_empty() {
            issues.push(text.to_string());
        }
    }

    Ok(ContentAnalysis { score, issues })
}

/// Score line plus explanation for intent alignment.
///
/// Lines after the explanation line continue the explanation.
pub fn parse_intent(raw: &str) -> Result<IntentAnalysis, ParseError> {
    let mut lines = content_lines(raw);
    let first = lines.next().ok_or(ParseError::Empty)?;
    let score = parse_score(labelled(first, Metric::IntentAlignment.label())?)?;

    let second = lines
        .next()
        .ok_or_else(|| ParseError::MissingLine(EXPLANATION_LABEL.to_string()))?;
    let mut explanation = labelled(second, EXPLANATION_LABEL)?.trim().to_string();
    for rest in lines {
        explanation.push('\n');
        explanation.push_str(rest);
    }

    Ok(IntentAnalysis { score, explanation })
}
