//! Command-line entry point: ask natural-language questions against the
//! configured invoices database.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ia_domain::config::{Config, ConfigSeverity};
use ia_engine::{Assistant, ChatGateway, RateLimiter};
use ia_providers::OpenAiCompatProvider;
use ia_sandbox::{tool_definitions, SqliteSandbox};

#[derive(Parser)]
#[command(
    name = "ia",
    about = "Ask natural-language questions against the invoices database",
    version
)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Answer a single question.
    Ask {
        question: String,
        /// Override the database path from config.
        #[arg(long)]
        db: Option<PathBuf>,
        /// Print the executed plan and per-step digests to stderr.
        #[arg(long)]
        verbose: bool,
    },
    /// Print the tool catalog exposed to the planner.
    Tools,
    /// Validate the config file and exit non-zero on errors.
    ConfigValidate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_file_or_default(&cli.config).context("loading config")?;

    match cli.command {
        Command::Ask { question, db, verbose } => {
            if let Some(db) = db {
                config.sandbox.db_path = db;
            }
            fail_on_config_errors(&config)?;

            let provider = Arc::new(
                OpenAiCompatProvider::from_config(&config.llm)
                    .context("initializing model backend")?,
            );
            let limiter = Arc::new(RateLimiter::new(config.quota));
            let gateway = ChatGateway::new(provider, limiter, config.llm.max_attempts);
            let sandbox = Arc::new(SqliteSandbox::new(config.sandbox.clone()));
            let assistant =
                Assistant::new(sandbox, gateway, &config).context("initializing assistant")?;

            let result = assistant.answer(&question, &[]).await;
            println!("{}", result.answer);

            if verbose {
                eprintln!(
                    "\n--- plan ({} attempt(s), fallback: {}, cached: {}) ---",
                    result.plan_attempts, result.used_fallback, result.cached
                );
                eprintln!("{}", serde_json::to_string_pretty(&result.plan)?);
                for run in &result.tool_runs {
                    eprintln!("\n--- {} ({}) ---", run.step_id, run.tool);
                    eprintln!("{}", serde_json::to_string_pretty(&run.summary)?);
                }
            }
            Ok(())
        }
        Command::Tools => {
            for tool in tool_definitions() {
                println!("{}\n    {}", tool.name, tool.description);
            }
            Ok(())
        }
        Command::ConfigValidate => {
            let issues = config.validate();
            for issue in &issues {
                eprintln!("{issue}");
            }
            if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
                std::process::exit(1);
            }
            println!("config OK");
            Ok(())
        }
    }
}

fn fail_on_config_errors(config: &Config) -> anyhow::Result<()> {
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!("config validation failed");
    }
    Ok(())
}
