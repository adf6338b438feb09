//! lmsft CLI - SFT data and model preparation
//!
//! Provides the `lmsft` command: configuration queries, hub fetches, the
//! dataset normalize/aggregate pipeline and extended-model preparation.

mod commands;
mod context;
mod report;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use commands::types::{ConfigCommand, FetchArgs};
use context::CliContext;

/// Prepare conversational datasets and a base model for supervised fine-tuning.
#[derive(Parser, Debug)]
#[command(
    name = "lmsft",
    author,
    version,
    about = "SFT data and model preparation",
    long_about = "Normalizes heterogeneous multi-turn datasets into one schema, splits them reproducibly into \
                  train/test parquet files, and injects a chat template into a base model's tokenizer."
)]
struct Args {
    /// Configuration directory (every *.yaml file is mounted under its stem)
    #[arg(long, env = "LMSFT_CONFIG_DIR", default_value = "configs", global = true)]
    config_dir: PathBuf,

    /// Extra YAML file deep-merged over the configuration (repeatable)
    #[arg(long = "config-override", global = true)]
    config_overrides: Vec<PathBuf>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG wins when set
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Print machine-readable JSON summaries
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Query the resolved configuration
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Download one dataset or model from the hub
    Fetch(FetchArgs),

    /// Fetch (when enabled) and normalize every configured dataset
    Normalize,

    /// Aggregate normalized datasets and write the train/test split
    Aggregate,

    /// Normalize, then aggregate
    Prepare,

    /// Build the extended model with the configured chat template
    ExtendModel,

    /// Run `prepare` and `extend-model` concurrently
    All,
}

fn init_tracing(log_level: &str) -> anyhow::Result<()> {
    let level = match log_level {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // stdout is reserved for command output (`config get` is used from shell scripts)
    if std::env::var_os("RUST_LOG").is_some() {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .without_time()
            .with_target(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .without_time()
            .with_target(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level)?;

    let ctx = CliContext::new(args.config_dir, args.config_overrides, args.json);

    match args.command {
        Command::Config(command) => commands::config::execute(&ctx, command),
        Command::Fetch(fetch) => commands::fetch::execute(&ctx, fetch).await,
        Command::Normalize => commands::prepare::normalize(&ctx).await,
        Command::Aggregate => commands::prepare::aggregate(&ctx).await,
        Command::Prepare => commands::prepare::prepare(&ctx).await,
        Command::ExtendModel => commands::model::execute(&ctx).await,
        Command::All => commands::prepare::all(&ctx).await,
    }
}
