//! Command handlers for aegisctl.

use std::io::{self, Write};
use std::path::Path;

use aegis_common::{
    CallbackSink, Config, ConversationMessage, NoProgress, ProgressSink, RiskAuditReport,
};
use aegis_core::{Orchestrator, StreamEvent};
use anyhow::{bail, Context, Result};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::StreamExt;

use crate::display;

/// JSON shape of `ask --json`
#[derive(Serialize)]
struct AskOutput<'a> {
    answer: &'a ConversationMessage,
    #[serde(skip_serializing_if = "Option::is_none")]
    audit: Option<&'a RiskAuditReport>,
}

/// Explicit `--config` must load; otherwise fall back through the usual lookup.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from_path(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Config::load(),
    }
}

fn build(config: &Config) -> Result<Orchestrator> {
    let orchestrator = Orchestrator::from_config(config).context("invalid configuration")?;
    if orchestrator.is_demo() {
        display::warning("Model backends are not configured, answering in demo mode");
    }
    if !orchestrator.audit_is_live() {
        display::warning("Judge backend is not configured, audits use placeholder scores");
    }
    Ok(orchestrator)
}

pub async fn ask(config: &Config, prompt: &str, stream: bool, audit: bool, json: bool) -> Result<()> {
    let orchestrator = build(config)?;
    let question = ConversationMessage::user(prompt);

    let answer = if stream && !json {
        stream_answer(&orchestrator, prompt).await?
    } else {
        let answer = orchestrator.answer(prompt).await;
        if !json {
            display::answer(&answer);
        }
        answer
    };

    let report = if audit {
        let history = [question, answer.clone()];
        let progress: Box<dyn ProgressSink> = if json {
            Box::new(NoProgress)
        } else {
            Box::new(CallbackSink(display::progress))
        };
        Some(orchestrator.audit(&answer.content, Some(&history), progress.as_ref()).await)
    } else {
        None
    };

    if json {
        let output = AskOutput {
            answer: &answer,
            audit: report.as_ref(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else if let Some(report) = &report {
        display::report(report);
    }
    Ok(())
}

pub async fn chat(config: &Config, audit: bool) -> Result<()> {
    let orchestrator = build(config)?;
    let mut history: Vec<ConversationMessage> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    display::chat_banner();
    loop {
        display::chat_prompt()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        match line {
            "" => continue,
            "/exit" | "/quit" => break,
            "/clear" => {
                history.clear();
                display::info("Conversation cleared");
                continue;
            }
            _ => {}
        }

        history.push(ConversationMessage::user(line));
        let answer = stream_answer(&orchestrator, line).await?;
        history.push(answer.clone());

        if audit {
            let report = orchestrator
                .audit(&answer.content, Some(&history), &CallbackSink(display::progress))
                .await;
            display::report(&report);
        }
    }
    Ok(())
}

pub async fn audit(config: &Config, text: &str, json: bool) -> Result<()> {
    let orchestrator = build(config)?;
    let report = if json {
        orchestrator.audit(text, None, &NoProgress).await
    } else {
        orchestrator
            .audit(text, None, &CallbackSink(display::progress))
            .await
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        display::report(&report);
    }
    Ok(())
}

pub fn show_config(config: &Config) -> Result<()> {
    print!("{}", config.to_toml()?);
    Ok(())
}

/// Print fragments as they arrive; a reset clears the partial answer.
async fn stream_answer(orchestrator: &Orchestrator, prompt: &str) -> Result<ConversationMessage> {
    let mut events = orchestrator.answer_streaming(prompt);
    let mut stdout = io::stdout();
    let mut partial = false;

    while let Some(event) = events.next().await {
        match event {
            StreamEvent::Token(fragment) => {
                if !partial {
                    println!();
                }
                print!("{}", fragment);
                stdout.flush()?;
                partial = true;
            }
            StreamEvent::Reset => {
                println!();
                display::warning("Stream interrupted, using the consensus answer instead");
                partial = false;
            }
            StreamEvent::Done(response) => {
                let message = ConversationMessage::from_response(response);
                if partial {
                    println!();
                    display::answer_footer(&message);
                } else {
                    display::answer(&message);
                }
                return Ok(message);
            }
            StreamEvent::Failed(err) => bail!("generation failed: {}", err),
        }
    }
    bail!("answer stream ended without a result")
}
