//! # Queue Listener CLI
//!
//! Command-line interface for the queue listener.
//!
//! This module provides CLI commands for:
//! - Listening on one or more queues with a logging handler
//! - Posting JSON payloads to a queue
//! - Printing the resolved configuration
//! - Generating shell completions

use clap::{CommandFactory, Parser, Subcommand};
use queue_listener_core::{
    HandlerError, ListenerConfig, ListenerError, QueueListener, Registration,
};
use queue_listener_runtime::{ConfigurationError, ProviderConfig, ProviderType};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

/// Prefix for environment variable overrides, e.g.
/// `QUEUE_LISTENER__RECEIVE__WAIT_TIME_SECONDS=5`
pub const ENV_PREFIX: &str = "QUEUE_LISTENER";

const SYSTEM_CONFIG: &str = "/etc/queue-listener/listener";
const LOCAL_CONFIG: &str = "config/listener";

// ============================================================================
// CLI Structure
// ============================================================================

/// Queue Listener CLI - JSON message handlers for SQS queues
#[derive(Parser)]
#[command(name = "queue-listener")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Poll SQS queues and dispatch JSON messages to handlers")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "QUEUE_LISTENER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Logging level
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Listen on queues, logging and acknowledging every valid message
    Listen {
        /// Queue to listen on; repeat for several queues
        #[arg(short, long = "queue", required = true)]
        queues: Vec<String>,

        /// Handler scheduling model
        #[arg(short, long, default_value = "sync")]
        mode: HandlerMode,

        /// Seconds between poll cycles, overriding the configuration
        #[arg(short, long)]
        interval: Option<u64>,

        /// Run a single poll cycle, print its summary and exit
        #[arg(long)]
        once: bool,
    },

    /// Post a JSON payload to a queue
    Post {
        /// Target queue
        #[arg(short, long)]
        queue: String,

        /// JSON payload
        #[arg(short, long)]
        payload: String,
    },

    /// Print the resolved configuration
    Config {
        /// Output format for configuration
        #[arg(short = 'f', long, default_value = "toml")]
        format: ConfigFormat,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Handler scheduling models
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum HandlerMode {
    /// One message at a time, in order
    Sync,
    /// Whole batches concurrently
    Async,
}

/// Configuration format options
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum ConfigFormat {
    Toml,
    Json,
    Yaml,
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Listener error: {0}")]
    Listener(#[from] ListenerError),

    #[error("Command failed: {message}")]
    CommandFailed { message: String },

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 1,
            Self::Listener(_) => 2,
            Self::CommandFailed { .. } => 3,
            Self::InvalidArgument { .. } => 4,
            Self::Io(_) => 5,
        }
    }
}

/// Configuration-related errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Could not load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ConfigurationError),

    #[error("Could not render configuration: {message}")]
    Render { message: String },
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Main CLI entry point
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();
    initialize_logging(&cli)?;
    run(cli).await
}

/// Execute a parsed command line
pub async fn run(cli: Cli) -> Result<(), CliError> {
    let config = load_configuration(cli.config.as_deref())?;

    match cli.command {
        Commands::Listen {
            queues,
            mode,
            interval,
            once,
        } => execute_listen_command(queues, mode, interval, once, config).await,
        Commands::Post { queue, payload } => execute_post_command(&queue, &payload, config).await,
        Commands::Config { format } => execute_config_command(format, &config),
        Commands::Completions { shell } => execute_completions_command(shell),
    }
}

// ============================================================================
// Logging and Configuration
// ============================================================================

/// Initialize logging based on CLI arguments
///
/// `RUST_LOG` takes precedence over `--log-level`. Logs go to stderr so that
/// command output on stdout stays machine-readable.
pub fn initialize_logging(cli: &Cli) -> Result<(), CliError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_log_directives(&cli.log_level)));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if cli.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    result.map_err(|e| CliError::CommandFailed {
        message: format!("Could not initialize logging: {}", e),
    })
}

/// Filter directives applying `level` to the listener crates
pub fn default_log_directives(level: &str) -> String {
    ["queue_listener_cli", "queue_listener_core", "queue_listener_runtime"]
        .iter()
        .map(|target| format!("{}={}", target, level))
        .collect::<Vec<_>>()
        .join(",")
}

/// Load configuration from files and the environment
///
/// Sources, later ones overriding earlier ones:
///  1. `/etc/queue-listener/listener.{toml,json,yaml}` if present
///  2. `./config/listener.{toml,json,yaml}` if present
///  3. `explicit_path`, which must exist
///  4. Environment variables prefixed `QUEUE_LISTENER__` with `__` between
///     keys, e.g. `QUEUE_LISTENER__PROVIDER__TYPE=aws_sqs`
///
/// For the SQS provider, a region, credentials or endpoint left unset by
/// these sources is taken from `AWS_REGION`, `AWS_ACCESS_KEY_ID`,
/// `AWS_SECRET_ACCESS_KEY` and `SQS_ENDPOINT_URL`.
///
/// Every field has a default, so no sources at all yields the default
/// in-memory configuration.
pub fn load_configuration(explicit_path: Option<&Path>) -> Result<ListenerConfig, ConfigError> {
    let mut builder = config::Config::builder()
        .add_source(config::File::with_name(SYSTEM_CONFIG).required(false))
        .add_source(config::File::with_name(LOCAL_CONFIG).required(false));

    if let Some(path) = explicit_path {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        info!(path = %path.display(), "Loading configuration from explicit path");
        builder = builder.add_source(config::File::from(path).required(true));
    }

    let settings = builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;
    let region_configured = settings.get_string("provider.region").is_ok();
    let mut config: ListenerConfig = settings.try_deserialize()?;

    if let ProviderConfig::AwsSqs(aws) = &mut config.provider {
        aws.fill_from_env(region_configured);
    }

    config.validate()?;
    Ok(config)
}

/// Render configuration with credentials redacted
pub fn render_configuration(
    config: &ListenerConfig,
    format: ConfigFormat,
) -> Result<String, ConfigError> {
    let mut redacted = config.clone();
    if let ProviderConfig::AwsSqs(aws) = &mut redacted.provider {
        if aws.secret_access_key.is_some() {
            aws.secret_access_key = Some("<redacted>".to_string());
        }
    }

    let render_error = |e: &dyn std::fmt::Display| ConfigError::Render {
        message: e.to_string(),
    };
    match format {
        ConfigFormat::Toml => toml::to_string_pretty(&redacted).map_err(|e| render_error(&e)),
        ConfigFormat::Json => serde_json::to_string_pretty(&redacted).map_err(|e| render_error(&e)),
        ConfigFormat::Yaml => serde_yaml::to_string(&redacted).map_err(|e| render_error(&e)),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// Execute listen command
async fn execute_listen_command(
    queues: Vec<String>,
    mode: HandlerMode,
    interval: Option<u64>,
    once: bool,
    mut config: ListenerConfig,
) -> Result<(), CliError> {
    if let Some(seconds) = interval {
        config.poll_interval_seconds = seconds;
    }

    let mut listener = QueueListener::from_config(config)?;
    for queue in &queues {
        let name = queue.clone();
        match mode {
            HandlerMode::Sync => {
                listener.register_sync(queue, Registration::new(), move |body| {
                    log_message(&name, &body);
                    Ok(true)
                })?;
            }
            HandlerMode::Async => {
                listener.register_async(queue, Registration::new(), move |body| {
                    log_message(&name, &body);
                    async { Ok::<_, HandlerError>(true) }
                })?;
            }
        }
    }

    info!(queues = ?queues, mode = ?mode, once = once, "Starting queue listener");

    if once {
        for report in listener.scheduler().run_cycle().await {
            println!(
                "{}: {} succeeded, {} failed, {} invalid, {} errors",
                report.queue,
                report.successes(),
                report.failures(),
                report.invalid(),
                report.errors()
            );
        }
        return Ok(());
    }

    listener.run_until(shutdown_signal()).await;
    info!("Queue listener stopped");
    Ok(())
}

fn log_message(queue: &str, body: &Value) {
    info!(queue = %queue, body = %body, "Received message");
}

/// Execute post command
async fn execute_post_command(
    queue: &str,
    payload: &str,
    config: ListenerConfig,
) -> Result<(), CliError> {
    let payload: Value = serde_json::from_str(payload).map_err(|e| CliError::InvalidArgument {
        arg: "payload".to_string(),
        message: format!("not valid JSON: {}", e),
    })?;

    if config.provider.provider_type() == ProviderType::InMemory {
        warn!("Using the in-memory provider; the message is lost when this process exits");
    }

    let listener = QueueListener::from_config(config)?;
    let message_id = listener.post(queue, &payload).await?;
    println!("{}", message_id);
    Ok(())
}

/// Execute config command
fn execute_config_command(format: ConfigFormat, config: &ListenerConfig) -> Result<(), CliError> {
    let rendered = render_configuration(config, format)?;
    println!("{}", rendered.trim_end());
    Ok(())
}

/// Execute completions command
fn execute_completions_command(shell: clap_complete::Shell) -> Result<(), CliError> {
    let mut command = Cli::command();
    let name = command.get_name().to_string();
    clap_complete::generate(shell, &mut command, name, &mut std::io::stdout());
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Could not install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Could not install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C), finishing the current cycle"),
        _ = terminate => info!("Received SIGTERM, finishing the current cycle"),
    }
}
