//! Aegis Control - CLI for consensus answers and risk audits
//!
//! Answers come from several model backends reduced into one; every answer
//! can be scored by a judge backend on five risk metrics.

mod commands;
mod display;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "aegisctl")]
#[command(about = "Aegis Veritas - consensus answers with risk audits", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (overrides $AEGIS_CONFIG and the default location)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask one question and audit the answer
    Ask {
        /// The question
        prompt: String,

        /// Print the answer as it arrives
        #[arg(long)]
        stream: bool,

        /// Skip the risk audit
        #[arg(long)]
        no_audit: bool,

        /// Emit JSON instead of formatted text
        #[arg(long)]
        json: bool,
    },

    /// Interactive multi-turn session, auditing each answer against the whole conversation
    Chat {
        /// Skip the risk audit
        #[arg(long)]
        no_audit: bool,
    },

    /// Audit a piece of text on its own
    Audit {
        /// Text to audit
        text: String,

        /// Emit JSON instead of formatted text
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so answers and JSON stay clean on stdout
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Ask {
            prompt,
            stream,
            no_audit,
            json,
        } => commands::ask(&config, &prompt, stream, !no_audit, json).await,
        Commands::Chat { no_audit } => commands::chat(&config, !no_audit).await,
        Commands::Audit { text, json } => commands::audit(&config, &text, json).await,
        Commands::Config => commands::show_config(&config),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ask_flags() {
        let cli = Cli::try_parse_from(["aegisctl", "ask", "What is 2+2?", "--stream", "--no-audit"]).unwrap();
        match cli.command {
            Commands::Ask {
                prompt,
                stream,
                no_audit,
                json,
            } => {
                assert_eq!(prompt, "What is 2+2?");
                assert!(stream);
                assert!(no_audit);
                assert!(!json);
            }
            _ => panic!("expected ask"),
        }
    }

    #[test]
    fn test_global_config_flag_after_subcommand() {
        let cli = Cli::try_parse_from(["aegisctl", "audit", "some text", "--config", "/tmp/aegis.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/aegis.toml")));
        assert!(matches!(cli.command, Commands::Audit { json: false, .. }));
    }

    #[test]
    fn test_ask_requires_prompt() {
        assert!(Cli::try_parse_from(["aegisctl", "ask"]).is_err());
    }
}
