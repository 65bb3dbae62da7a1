//! CLI argument definitions using clap with subcommand architecture
//!
//! `dirapp serve` runs the notification server, `dirapp client` reads line
//! commands from stdin and prints what its servers report.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::error::{DirappError, Result};

/// Directory change notification server and client
#[derive(Parser, Debug)]
#[command(name = "dirapp")]
#[command(about = "Watch a directory and push its changes to subscribed clients")]
#[command(version)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format for client events
    #[arg(short, long, default_value = "text", value_enum, global = true)]
    pub format: OutputFormat,

    /// Show verbose output (debug logging)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

// ============================================
// Main Commands Enum
// ============================================

/// Available subcommands for dirapp
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve change notifications for a directory
    #[command(visible_alias = "s")]
    Serve(ServeArgs),

    /// Subscribe to one or more servers
    #[command(visible_alias = "c")]
    Client(ClientArgs),
}

// ============================================
// Serve Command
// ============================================

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Port to listen on
    #[arg(env = "DIRAPP_PORT", value_parser = clap::value_parser!(u16).range(1024..))]
    pub port: u16,

    /// Directory to watch
    #[arg(env = "DIRAPP_DIR")]
    pub dir: PathBuf,

    /// Refresh period in seconds
    #[arg(env = "DIRAPP_PERIOD", value_parser = clap::value_parser!(u8).range(1..=255))]
    pub period: u8,

    /// Address to bind to
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Most subscribers connected at once
    #[arg(long, env = "DIRAPP_MAX_CLIENTS", default_value = "10")]
    pub max_clients: usize,

    /// Entry nodes preallocated for directory snapshots
    #[arg(long, default_value = "512")]
    pub arena_capacity: usize,
}

// ============================================
// Client Command
// ============================================

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Most servers connected at once
    #[arg(long, default_value = "5")]
    pub max_servers: usize,

    /// Milliseconds to wait for the overflow byte after a full batch
    #[arg(long, default_value = "100")]
    pub overflow_grace_ms: u64,
}

/// One line typed at the client prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Add { host: String, port: u16 },
    Remove { host: String, port: u16 },
    List,
    Quit,
}

impl ClientCommand {
    /// Parse `add <host> <port>`, `remove <host> <port>`, `list` or `quit`
    pub fn parse(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let command = words.next().unwrap_or_default();

        let parsed = match command {
            "add" | "remove" => {
                let (host, port) = match (words.next(), words.next()) {
                    (Some(host), Some(port)) => (host, port),
                    _ => return Err(usage()),
                };
                let port: u16 = port
                    .parse()
                    .map_err(|_| DirappError::InvalidAddress(format!("{}:{}", host, port)))?;
                let host = host.to_string();
                if command == "add" {
                    Self::Add { host, port }
                } else {
                    Self::Remove { host, port }
                }
            }
            "list" => Self::List,
            "quit" => Self::Quit,
            _ => return Err(usage()),
        };

        if words.next().is_some() {
            return Err(usage());
        }
        Ok(parsed)
    }
}

fn usage() -> DirappError {
    DirappError::Config(
        "expected one of: add <host> <port>, remove <host> <port>, list, quit".to_string(),
    )
}

/// Output format options
#[derive(Clone, Copy, Debug, Default, PartialEq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// One JSON object per line
    Json,
}
