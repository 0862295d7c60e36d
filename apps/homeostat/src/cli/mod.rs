//! # Homeostat CLI Module
//!
//! ## Available Commands
//!
//! - `run` - Start the scheduler and the HTTP server
//! - `status` - Show monitor status from the last snapshot
//! - `ingest` - Ingest node states from a JSON file
//! - `evaluate` - Gate an artifact from a JSON file and negotiate consent
//! - `audit` - Show the tail of the audit log
//! - `consolidate` - Run one memory consolidation sweep
//! - `init` - Initialize a data directory

mod commands;

use clap::{Parser, Subcommand};
use homeostat_core::HomeostatError;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Homeostat - self-monitoring and self-regulation daemon
///
/// Watches two cooperating nodes, keeps their composite health in band and
/// gates the artifacts they produce.
#[derive(Parser, Debug)]
#[command(name = "homeostat")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Data directory (overrides persistence.data_dir)
    #[arg(short = 'D', long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the scheduler and HTTP server until Ctrl-C
    Run {
        /// Host to bind to (overrides server.host)
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port to bind to (overrides server.port)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show monitor status from the last snapshot
    Status,

    /// Ingest node states from a JSON file (one object or an array)
    Ingest {
        /// Path to the input file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Gate an artifact and negotiate consent
    Evaluate {
        /// Path to the artifact JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Restrict to these filters (comma-separated)
        #[arg(long)]
        filters: Option<String>,
    },

    /// Show the tail of the audit log
    Audit {
        /// Number of records to show
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,

        /// Only records of this kind (tuning, decision, consent, consolidation, drift, alert)
        #[arg(short, long)]
        kind: Option<String>,
    },

    /// Run one memory consolidation sweep against the snapshot
    Consolidate,

    /// Initialize a data directory with an empty snapshot
    Init {
        /// Replace an existing snapshot
        #[arg(short, long)]
        force: bool,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), HomeostatError> {
    let config = crate::config::AppConfig::load(cli.config.as_deref(), cli.data_dir.as_deref())?;
    let json_mode = cli.json_mode;

    match cli.command {
        Some(Commands::Run { host, port }) => cmd_run(config, host, port).await,
        Some(Commands::Status) => cmd_status(&config, json_mode),
        Some(Commands::Ingest { file }) => cmd_ingest(&config, json_mode, &file),
        Some(Commands::Evaluate { file, filters }) => {
            cmd_evaluate(&config, json_mode, &file, filters.as_deref())
        }
        Some(Commands::Audit { limit, kind }) => {
            cmd_audit(&config, json_mode, limit, kind.as_deref())
        }
        Some(Commands::Consolidate) => cmd_consolidate(&config, json_mode),
        Some(Commands::Init { force }) => cmd_init(&config, force),
        None => cmd_status(&config, json_mode),
    }
}
