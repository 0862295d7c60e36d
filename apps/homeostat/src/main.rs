//! # Homeostat - Self-Regulation Daemon
//!
//! The main binary for the Homeostat monitor.
//!
//! This application provides:
//! - Timer-driven control loop (sampling, aggregation, tuning, drift,
//!   consolidation, snapshots)
//! - HTTP API server (axum-based)
//! - CLI interface for offline inspection
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    apps/homeostat (THE BINARY)                  │
//! │                                                                 │
//! │  ┌─────────────┐    ┌─────────────┐    ┌──────────────────┐   │
//! │  │   CLI       │    │   HTTP API  │    │    Scheduler     │   │
//! │  │  (clap)     │    │   (axum)    │    │  (tokio timers)  │   │
//! │  └──────┬──────┘    └──────┬──────┘    └────────┬─────────┘   │
//! │         │                  │                    │              │
//! │         └──────────────────┼────────────────────┘              │
//! │                            ▼                                   │
//! │                   ┌────────────────┐      ┌──────────────┐     │
//! │                   │ homeostat-core │ ───► │ audit writer │     │
//! │                   │  (THE LOGIC)   │      │ (JSONL file) │     │
//! │                   └────────────────┘      └──────────────┘     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Prepare a data directory, then run
//! homeostat init -D ./data
//! homeostat run -D ./data --port 8080
//!
//! # Offline operations against the last snapshot
//! homeostat status -D ./data
//! homeostat ingest -D ./data -f states.json
//! homeostat evaluate -D ./data -f artifact.json
//! homeostat audit -D ./data -n 50 --kind decision
//! ```

use clap::Parser;
use homeostat::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    // HOMEOSTAT_LOG_FORMAT=json switches to machine-parseable output
    let log_format = std::env::var("HOMEOSTAT_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "homeostat=info,homeostat_core=info,tower_http=debug".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the startup banner.
fn print_banner() {
    println!(
        r#"
  ╻ ╻┏━┓┏┳┓┏━╸┏━┓┏━┓╺┳╸┏━┓╺┳╸
  ┣━┫┃ ┃┃┃┃┣╸ ┃ ┃┗━┓ ┃ ┣━┫ ┃
  ╹ ╹┗━┛╹ ╹┗━╸┗━┛┗━┛ ╹ ╹ ╹ ╹

  Self-Regulation Daemon v{}

  Measure and Regulate
"#,
        env!("CARGO_PKG_VERSION")
    );
}
