//! Client command handler
//!
//! Reads `add`, `remove`, `list` and `quit` lines from stdin. Server events
//! are printed by a separate task as they arrive, so updates keep flowing
//! while the prompt waits for input.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::cli::{ClientArgs, ClientCommand, OutputFormat};
use crate::client::{Client, EventPrinter, ServerInfo};
use crate::commands::{runtime, CommandContext};
use crate::config::ClientConfig;
use crate::error::{DirappError, Result};

/// Run the interactive client until `quit` or end of input
pub fn run_client(args: &ClientArgs, ctx: &CommandContext) -> Result<String> {
    if args.max_servers == 0 {
        return Err(DirappError::Config(
            "at least one server must be allowed".to_string(),
        ));
    }
    let config = ClientConfig {
        max_servers: args.max_servers,
        overflow_grace: Duration::from_millis(args.overflow_grace_ms),
    };

    let runtime = runtime()?;
    runtime.block_on(run_client_async(config, ctx.format))?;
    Ok(String::new())
}

async fn run_client_async(config: ClientConfig, format: OutputFormat) -> Result<()> {
    let (mut client, mut events) = Client::new(config);
    let printer = EventPrinter::new(format);
    let printer_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            printer.print(&event);
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let command = match ClientCommand::parse(&line) {
            Ok(command) => command,
            Err(e) => {
                eprintln!("Error: {}", e);
                continue;
            }
        };
        if command == ClientCommand::Quit {
            break;
        }
        if let Err(e) = execute(&mut client, command, format).await {
            eprintln!("Error: {}", e);
        }
    }

    client.quit().await?;
    // Every session's sender is gone now; the printer drains and exits
    drop(client);
    let _ = printer_task.await;
    Ok(())
}

async fn execute(client: &mut Client, command: ClientCommand, format: OutputFormat) -> Result<()> {
    match command {
        ClientCommand::Add { host, port } => {
            client.connect(&host, port).await?;
        }
        ClientCommand::Remove { host, port } => {
            client.disconnect(&host, port).await?;
        }
        ClientCommand::List => println!("{}", format_servers(&client.list(), format)?),
        ClientCommand::Quit => {}
    }
    Ok(())
}

fn format_servers(servers: &[ServerInfo], format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => serde_json::to_string(servers)
            .map_err(|e| DirappError::Config(format!("JSON serialization failed: {}", e))),
        OutputFormat::Text if servers.is_empty() => Ok("no servers".to_string()),
        OutputFormat::Text => Ok(servers
            .iter()
            .map(|s| format!("{} {} every {}s", s.key(), s.path, s.period))
            .collect::<Vec<_>>()
            .join("\n")),
    }
}
