//! # SurgiSense CLI (`surgisense`)
//!
//! ## Usage
//!
//! ```bash
//! surgisense --config ./config/surgisense.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `surgisense serve` | Start the HTTP API |
//! | `surgisense chunk <file>` | Show how a document is chunked (offline) |
//! | `surgisense ask <file> "<question>"` | Ingest a document and answer one question |
//! | `surgisense digitize <file>` | Extract discharge-summary fields as JSON |
//! | `surgisense check-config` | Validate the configuration file |
//!
//! API keys are read from the environment (or a `.env` file in the working
//! directory). Log verbosity follows `RUST_LOG`, default `info`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use surgisense::{commands, config, server};

/// SurgiSense: medical-document intelligence backend.
#[derive(Parser)]
#[command(
    name = "surgisense",
    about = "SurgiSense: record digitization, grounded document Q&A, voice notes and wound assessment",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/surgisense.toml`. Built-in defaults are used
    /// when the file does not exist.
    #[arg(long, global = true, default_value = "./config/surgisense.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Extract and chunk a document, printing chunk ranges.
    ///
    /// Runs entirely offline; no embedding or chat provider is contacted.
    Chunk {
        /// PDF or UTF-8 text file.
        file: PathBuf,
        /// Override `[chunking].size`.
        #[arg(long)]
        size: Option<usize>,
        /// Override `[chunking].overlap`.
        #[arg(long)]
        overlap: Option<usize>,
    },

    /// Ingest a document and answer one question from it.
    Ask {
        file: PathBuf,
        question: String,
    },

    /// Digitize a discharge summary and print the extracted JSON.
    Digitize { file: PathBuf },

    /// Load and validate the configuration file.
    CheckConfig,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    // check-config requires the file to exist
    if let Commands::CheckConfig = cli.command {
        let cfg = config::load_config(&cli.config)?;
        commands::run_check_config(&cfg);
        return Ok(());
    }

    let cfg = config::load_config_or_default(&cli.config)?;

    match cli.command {
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Chunk {
            file,
            size,
            overlap,
        } => {
            commands::run_chunk(&cfg, &file, size, overlap)?;
        }
        Commands::Ask { file, question } => {
            commands::run_ask(&cfg, &file, &question).await?;
        }
        Commands::Digitize { file } => {
            commands::run_digitize(&cfg, &file).await?;
        }
        Commands::CheckConfig => {}
    }

    Ok(())
}
