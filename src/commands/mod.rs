//! Command modules for the dirapp CLI
//!
//! ## Architecture
//!
//! Each command module implements a single top-level command:
//! - `serve` - Run the notification server until SIGTERM/SIGINT
//! - `client` - Read line commands from stdin and print server events
//!
//! All command handlers take their respective `Args` struct from `cli.rs`
//! and a shared `CommandContext` for output format and verbosity.

pub mod client;
pub mod serve;

pub use client::run_client;
pub use serve::run_serve;

use crate::cli::OutputFormat;

/// Shared context passed to all command handlers
#[derive(Debug, Clone)]
pub struct CommandContext {
    /// Output format (text or json)
    pub format: OutputFormat,
    /// Show verbose output
    pub verbose: bool,
}

impl Default for CommandContext {
    fn default() -> Self {
        Self {
            format: OutputFormat::Text,
            verbose: false,
        }
    }
}

impl CommandContext {
    /// Create a new CommandContext from CLI args
    pub fn from_cli(format: OutputFormat, verbose: bool) -> Self {
        Self { format, verbose }
    }
}

/// Build the multi-threaded runtime the async commands run on
pub(crate) fn runtime() -> crate::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            crate::DirappError::Config(format!("Failed to create tokio runtime: {}", e))
        })
}
