//! # Agora - Federated Query Agent
//!
//! The main binary for the Agora federation layer.
//!
//! This application provides:
//! - HTTP query surface (axum-based)
//! - CLI interface for serving, validation and one-shot queries
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                   apps/agora (THE BINARY)                  │
//! │                                                            │
//! │  ┌───────────┐   ┌─────────────┐   ┌───────────────────┐  │
//! │  │   CLI     │   │  HTTP API   │   │ reqwest transport │  │
//! │  │  (clap)   │   │   (axum)    │   │ (ServiceBackend)  │  │
//! │  └─────┬─────┘   └──────┬──────┘   └─────────┬─────────┘  │
//! │        │                │                    │            │
//! │        └────────────────┼────────────────────┘            │
//! │                         ▼                                 │
//! │                 ┌───────────────┐                         │
//! │                 │  agora-core   │                         │
//! │                 │ (THE LOGIC)   │                         │
//! │                 └───────────────┘                         │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Start the query agent
//! agora server --host 0.0.0.0 --port 8080 --config agora.toml
//!
//! # Validate a configuration document
//! agora validate --config agora.toml
//!
//! # One-shot query with bindings
//! agora query -Q 'SELECT @vin WHERE { ... }' --bind vin=V123
//! ```

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agora::cli;

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    // Initialize tracing — AGORA_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("AGORA_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "agora=info,tower_http=debug".into());

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

    // Parse CLI arguments
    let cli = cli::Cli::parse();

    // Display startup banner
    if !cli.quiet {
        print_banner();
    }

    // Execute command
    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the Agora startup banner.
fn print_banner() {
    println!(
        r#"
   █████╗  ██████╗  ██████╗ ██████╗  █████╗
  ██╔══██╗██╔════╝ ██╔═══██╗██╔══██╗██╔══██╗
  ███████║██║  ███╗██║   ██║██████╔╝███████║
  ██╔══██║██║   ██║██║   ██║██╔══██╗██╔══██║
  ██║  ██║╚██████╔╝╚██████╔╝██║  ██║██║  ██║
  ╚═╝  ╚═╝ ╚═════╝  ╚═════╝ ╚═╝  ╚═╝╚═╝  ╚═╝

  Federated Query Agent v{}

  Skill-enabled • Partial-tolerant • Dataspace-ready
"#,
        env!("CARGO_PKG_VERSION")
    );
}
