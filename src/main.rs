#![allow(dead_code)]

mod app_config;
mod error;
mod processing;
mod prompt;
mod rate_limiters;
mod table;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use app_config::cfg;
use error::{AppError, AppResult};
use processing::{save_current_results, CheckpointStore, ProcessorOptions, TicketProcessor};
use prompt::OpenAiClassifier;
use rate_limiters::RateLimiters;

pub type HttpClient = reqwest::Client;

/// Grace period for in-flight classification tasks to unwind after an
/// operator interrupt.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "ticketclerk", about = "Support ticket categorization tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Classify tickets from the input table, resuming from the latest
    /// checkpoint unless --force is passed
    Process {
        /// Force start from the beginning, ignoring checkpoints
        #[arg(long)]
        force: bool,
        /// Override the wave width (rows dispatched per wave)
        #[arg(long)]
        batch_size: Option<usize>,
        /// Override the number of concurrent classification requests
        #[arg(long)]
        parallel_requests: Option<usize>,
    },
    /// Delete all saved checkpoints
    Cleanup,
    /// Write the latest checkpoint (or the raw input if none) to a
    /// timestamped results file without classifying anything
    Save,
    /// Print the tool version
    Version,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.log_level)),
        )
        .with(tracing_subscriber::fmt::Layer::default().with_ansi(false))
        .init();

    let result = match cli.command {
        Command::Process {
            force,
            batch_size,
            parallel_requests,
        } => run_process(force, batch_size, parallel_requests).await,
        Command::Cleanup => run_cleanup(),
        Command::Save => run_save(),
        Command::Version => {
            println!("ticketclerk v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    };

    if let Err(e) = result {
        tracing::error!("Critical error: {}", e);
        std::process::exit(1);
    }
}

async fn run_process(
    force: bool,
    batch_size: Option<usize>,
    parallel_requests: Option<usize>,
) -> AppResult<()> {
    ensure_directories()?;
    check_prerequisites()?;

    let mut options = ProcessorOptions::from_env();
    if let Some(wave_size) = batch_size {
        options.wave_size = wave_size;
        tracing::info!("Wave size overridden to: {}", wave_size);
    }
    if let Some(parallel) = parallel_requests {
        options.parallel_requests = parallel;
        tracing::info!("Parallel requests overridden to: {}", parallel);
    }
    tracing::info!(
        "Parallel processing configured for {} concurrent tickets in waves of {}",
        options.parallel_requests,
        options.wave_size,
    );

    let http_client = reqwest::ClientBuilder::new()
        .use_rustls_tls()
        .timeout(Duration::from_secs(cfg.request_timeout_secs))
        .build()
        .context("could not build HTTP client")?;
    let rate_limiters = RateLimiters::from_env();
    let classifier = Arc::new(OpenAiClassifier::new(http_client, rate_limiters));
    let processor = TicketProcessor::new(classifier, options);

    let shutdown = CancellationToken::new();
    let mut run_handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { processor.run(!force, shutdown).await }
    });

    tokio::select! {
        result = &mut run_handle => {
            result.context("processing task panicked")??;
            tracing::info!("Processing completed successfully");
            Ok(())
        }
        _ = shutdown_signal() => {
            tracing::warn!("Interrupt received - initiating shutdown...");
            shutdown.cancel();
            match tokio::time::timeout(SHUTDOWN_GRACE, run_handle).await {
                Ok(_) => {
                    tracing::warn!(
                        "Process interrupted. Progress has been saved in the latest checkpoint."
                    );
                }
                Err(_) => {
                    tracing::error!("In-flight tasks did not terminate cleanly, forcing exit");
                    std::process::exit(1);
                }
            }
            Err(AppError::Interrupted)
        }
    }
}

fn run_cleanup() -> AppResult<()> {
    let store = CheckpointStore::new(cfg.checkpoint_dir.clone(), processing::DEFAULT_KEEP_LAST);
    let removed = store.purge()?;
    tracing::info!(
        "Removed {} checkpoints from {}",
        removed,
        cfg.checkpoint_dir.display()
    );
    Ok(())
}

fn run_save() -> AppResult<()> {
    ensure_directories()?;
    let path = save_current_results(&ProcessorOptions::from_env())?;
    tracing::info!("Results file generated: {}", path.display());
    Ok(())
}

fn ensure_directories() -> AppResult<()> {
    for dir in [&cfg.output_dir, &cfg.checkpoint_dir] {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("could not create {}", dir.display()))?;
    }
    Ok(())
}

fn check_prerequisites() -> AppResult<()> {
    if !cfg.input_file.exists() {
        return Err(AppError::Setup(format!(
            "input file not found: {}",
            cfg.input_file.display()
        )));
    }
    if cfg.api_key.is_empty() {
        return Err(AppError::Setup(
            "OpenAI API key not found in environment variables".to_string(),
        ));
    }
    if cfg.catalog.categories.is_empty() {
        return Err(AppError::Setup(
            "service catalog has no categories".to_string(),
        ));
    }
    tracing::info!("All prerequisites checked successfully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_all_commands() {
        assert!(matches!(
            Cli::try_parse_from(["ticketclerk", "process", "--force"])
                .unwrap()
                .command,
            Command::Process { force: true, .. }
        ));
        assert!(matches!(
            Cli::try_parse_from(["ticketclerk", "cleanup"]).unwrap().command,
            Command::Cleanup
        ));
        assert!(matches!(
            Cli::try_parse_from(["ticketclerk", "save"]).unwrap().command,
            Command::Save
        ));
        assert!(matches!(
            Cli::try_parse_from(["ticketclerk", "version"]).unwrap().command,
            Command::Version
        ));
    }
}
