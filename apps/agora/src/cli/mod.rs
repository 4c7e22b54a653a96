//! # Agora CLI Module
//!
//! ## Available Commands
//!
//! - `server` - Start the HTTP query agent
//! - `validate` - Validate a configuration document
//! - `query` - Execute one query locally and print the result

mod commands;

use agora_core::AgoraError;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Agora - federated knowledge-graph query agent
///
/// Resolves parameterized skills, fans sub-queries out across dataspace
/// participants and merges partial results without failing on individual
/// participants.
#[derive(Parser, Debug)]
#[command(name = "agora")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the configuration document
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP query agent
    Server {
        /// Host to bind to
        #[arg(short = 'H', long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind to
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },

    /// Validate the configuration document and exit
    Validate,

    /// Execute one query locally and print the SPARQL-JSON result
    Query {
        /// Inline query text (or a skill reference via --asset)
        #[arg(short = 'Q', long)]
        query: Option<String>,

        /// Asset reference: a graph name or a skill key
        #[arg(short, long)]
        asset: Option<String>,

        /// Input bindings as name=value pairs (repeatable)
        #[arg(short, long)]
        bind: Vec<String>,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), AgoraError> {
    let config = cli.config.as_deref();
    match cli.command {
        Some(Commands::Server { host, port }) => cmd_server(config, &host, port).await,
        Some(Commands::Validate) | None => cmd_validate(config),
        Some(Commands::Query { query, asset, bind }) => {
            cmd_query(config, query, asset, &bind).await
        }
    }
}
