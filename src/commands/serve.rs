//! Serve command handler
//!
//! Runs the notification server on a fresh tokio runtime until it receives
//! SIGTERM or SIGINT, then reports what it did.

use crate::cli::{OutputFormat, ServeArgs};
use crate::commands::{runtime, CommandContext};
use crate::config::ServerConfig;
use crate::error::{DirappError, Result};
use crate::monitor::ServerStatus;
use crate::socket_server::Server;

/// Run the server
///
/// Blocks until the server stops. Returns a summary of the run in the
/// requested format.
pub fn run_serve(args: &ServeArgs, ctx: &CommandContext) -> Result<String> {
    let config = ServerConfig {
        host: args.host.clone(),
        port: args.port,
        directory: args.dir.clone(),
        period: args.period,
        max_clients: args.max_clients,
        arena_capacity: args.arena_capacity,
        ..ServerConfig::default()
    };

    let runtime = runtime()?;
    let status = runtime.block_on(async move {
        let server = Server::bind(config).await?;
        let handle = server.handle();
        server.run().await?;
        Ok::<_, DirappError>(handle.status())
    })?;

    format_summary(&status, ctx.format)
}

fn format_summary(status: &ServerStatus, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(status).map_err(|e| {
                DirappError::Config(format!("JSON serialization failed: {}", e))
            })?;
            Ok(format!("{}\n", json))
        }
        OutputFormat::Text => Ok(format!(
            "directory: {}\nuptime_secs: {}\ncycles: {}\naccepted: {}\nrejected: {}\n",
            status.directory.display(),
            status.uptime.as_secs(),
            status.cycles,
            status.total_accepted,
            status.total_rejected,
        )),
    }
}
