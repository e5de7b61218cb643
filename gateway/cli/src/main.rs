//! llm-gateway - command-line driver for the gateway core
//!
//! Loads the gateway configuration, builds the vendor registry and runs one
//! command against it.
//!
//! # Usage
//!
//! ```bash
//! # Probe every configured model
//! llm-gateway health
//!
//! # List models that are currently usable
//! llm-gateway models
//!
//! # Ask the default candidates, with failover
//! llm-gateway chat "What is a monad?"
//!
//! # Explicit candidates, streamed as SSE
//! llm-gateway chat --candidate openai/gpt-3.5-turbo --candidate deepseek/deepseek-chat \
//!     --stream "Hello"
//!
//! # Verbose logging
//! RUST_LOG=debug llm-gateway models
//! ```
//!
//! # Environment Variables
//!
//! - `GATEWAY_CONFIG`: configuration file path
//! - `GATEWAY_ENABLED_VENDORS`, `GATEWAY_DEFAULT_CANDIDATES`, `GATEWAY_TOKEN`:
//!   override the file
//! - `RUST_LOG`: log filter
//!
//! # Signals
//!
//! - `SIGINT`: cancels an in-progress chat; clients are still closed cleanly

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use gateway_core::{
    into_sse, load_config, load_config_from_path, Aggregator, Candidate, ChatCompletionRequest,
    GatewayConfig, Manager, Message, VendorTable,
};

/// llm-gateway - route chat completions across LLM vendors
#[derive(Parser, Debug)]
#[command(name = "llm-gateway")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "GATEWAY_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Debug-level logging for the gateway crates
    #[arg(short = 'v', long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Probe every configured model and print the report as JSON
    Health,
    /// Print the usable models of every vendor as JSON
    Models,
    /// Send one message through the candidate list
    Chat(ChatArgs),
}

#[derive(ClapArgs, Debug)]
struct ChatArgs {
    /// Candidate to try, in order (`vendor/model`); defaults to the config list
    #[arg(long = "candidate", value_name = "VENDOR/MODEL")]
    candidates: Vec<Candidate>,

    /// System prompt placed before the message
    #[arg(long, value_name = "TEXT")]
    system: Option<String>,

    /// Print the answer as a server-sent event stream
    #[arg(long)]
    stream: bool,

    /// User message
    message: String,
}

fn init_tracing(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("llm_gateway={level}").parse()?)
                .add_directive(format!("gateway_core={level}").parse()?),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn load(path: Option<PathBuf>) -> Result<GatewayConfig> {
    let config = match path {
        Some(path) => load_config_from_path(Some(path.clone()))
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => load_config().context("Failed to load configuration")?,
    };
    if config.vendors.is_empty() {
        anyhow::bail!(
            "No vendors configured. Create {} or pass --config.",
            gateway_core::default_config_path()
                .map_or_else(|| "gateway.toml".to_string(), |p| p.display().to_string())
        );
    }
    Ok(config)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}

/// Cancel `token` on Ctrl-C
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling request");
            token.cancel();
        }
    });
}

async fn warm_up(manager: &Manager) {
    for (vendor, report) in manager.initialize_all().await {
        for (model, err) in report.failed() {
            warn!(vendor = %vendor, model = %model, error = %err, "Model unavailable");
        }
    }
}

async fn chat(aggregator: &Aggregator, args: ChatArgs) -> Result<()> {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = args.system {
        messages.push(Message::system(system));
    }
    messages.push(Message::user(args.message));
    let request = ChatCompletionRequest::any_model(messages).with_stream(args.stream);

    let candidates = if args.candidates.is_empty() {
        aggregator.default_candidates().to_vec()
    } else {
        args.candidates
    };
    if candidates.is_empty() {
        anyhow::bail!("No candidates: pass --candidate or set default_candidates");
    }

    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());

    if args.stream {
        let mut frames = Box::pin(into_sse(aggregator.generate_stream(
            request,
            candidates,
            cancel,
        )));
        let mut stdout = std::io::stdout();
        while let Some(frame) = frames.next().await {
            stdout.write_all(frame.as_bytes())?;
            stdout.flush()?;
        }
        return Ok(());
    }

    let response = tokio::select! {
        () = cancel.cancelled() => anyhow::bail!("Cancelled"),
        response = aggregator.generate(&request, &candidates) => response?,
    };
    info!(model = %response.model, tokens = response.usage.total_tokens, "Completed");
    println!("{}", response.content().unwrap_or_default());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose)?;

    let config = load(args.config)?;
    info!(source = ?config.source, vendors = config.vendors.len(), "Configuration loaded");

    let manager = Arc::new(
        Manager::from_config(&config, &VendorTable::builtin())
            .context("Failed to build vendor registry")?,
    );

    let outcome = match args.command {
        Command::Health => {
            let report = manager.health_check().await;
            print_json(&report)
        }
        Command::Models => {
            warm_up(&manager).await;
            print_json(&manager.all_models())
        }
        Command::Chat(chat_args) => {
            warm_up(&manager).await;
            match Aggregator::from_config(Arc::clone(&manager), &config) {
                Ok(aggregator) => chat(&aggregator, chat_args).await,
                Err(e) => Err(e.into()),
            }
        }
    };

    let report = manager.close_all().await;
    for failure in &report.failures {
        warn!(
            vendor = %failure.vendor,
            model = %failure.model,
            error = %failure.error,
            "Client did not close cleanly"
        );
    }

    outcome
}
