//! txbridge CLI
//!
//! Command-line demos of the transaction bridge against the in-memory
//! engine.
//!
//! # Commands
//!
//! - `counter` - Increment a shared counter from several threads with retries
//! - `scan` - Seed keys and page through them with continuations
//! - `watch` - Register a watch and commit writes against it
//! - `errors` - List the engine error registry

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use txbridge_core::StreamingMode;
use txbridge_engine::EngineConfig;

/// txbridge command-line tools.
#[derive(Parser)]
#[command(name = "txbridge")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    /// Initial retry backoff in milliseconds
    #[arg(global = true, long, default_value = "10")]
    backoff_ms: u64,

    /// Output format
    #[arg(global = true, short, long, value_enum, default_value = "text")]
    format: Format,

    #[command(subcommand)]
    command: Commands,
}

/// Output format of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// Streaming mode argument.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    WantAll,
    Iterator,
    Exact,
    Small,
    Medium,
    Large,
    Serial,
}

impl From<ModeArg> for StreamingMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::WantAll => StreamingMode::WantAll,
            ModeArg::Iterator => StreamingMode::Iterator,
            ModeArg::Exact => StreamingMode::Exact,
            ModeArg::Small => StreamingMode::Small,
            ModeArg::Medium => StreamingMode::Medium,
            ModeArg::Large => StreamingMode::Large,
            ModeArg::Serial => StreamingMode::Serial,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Increment a shared counter from several threads
    Counter {
        /// Number of worker threads
        #[arg(short, long, default_value = "4")]
        workers: usize,

        /// Increments per worker
        #[arg(short, long, default_value = "100")]
        increments: usize,
    },

    /// Seed keys and page through them
    Scan {
        /// Number of keys to seed
        #[arg(short, long, default_value = "25")]
        keys: usize,

        /// Rows per page (0 = unlimited)
        #[arg(short, long, default_value = "10")]
        limit: i32,

        /// Streaming mode
        #[arg(short, long, value_enum, default_value = "iterator")]
        mode: ModeArg,

        /// Scan in reverse order
        #[arg(short, long)]
        reverse: bool,
    },

    /// Register a watch and commit writes against it
    Watch {
        /// Key to watch
        #[arg(short, long, default_value = "watched")]
        key: String,

        /// Cancel the watch instead of writing
        #[arg(short, long)]
        cancel: bool,
    },

    /// List the engine error registry
    Errors {
        /// Show a single code
        #[arg(short, long)]
        code: Option<i32>,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let backoff = Duration::from_millis(cli.backoff_ms);
    let engine_config = EngineConfig::new().retry_backoff(backoff, backoff * 100);

    match cli.command {
        Commands::Counter {
            workers,
            increments,
        } => {
            commands::counter::run(engine_config, workers, increments, cli.format)?;
        }
        Commands::Scan {
            keys,
            limit,
            mode,
            reverse,
        } => {
            commands::scan::run(engine_config, keys, limit, mode.into(), reverse, cli.format)?;
        }
        Commands::Watch { key, cancel } => {
            commands::watch::run(engine_config, &key, cancel, cli.format)?;
        }
        Commands::Errors { code } => {
            commands::errors::run(code, cli.format)?;
        }
        Commands::Version => {
            println!("txbridge CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
