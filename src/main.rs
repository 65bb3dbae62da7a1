//! dirapp CLI entry point

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use dirapp::cli::{Cli, Commands};
use dirapp::commands::{run_client, run_serve, CommandContext};
use dirapp::DirappError;

fn main() -> ExitCode {
    match run() {
        Ok(output) => {
            print!("{}", output);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            e.downcast_ref::<DirappError>()
                .map_or(ExitCode::FAILURE, DirappError::exit_code)
        }
    }
}

fn run() -> anyhow::Result<String> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let ctx = CommandContext::from_cli(cli.format, cli.verbose);
    let output = match &cli.command {
        Commands::Serve(args) => run_serve(args, &ctx)
            .with_context(|| format!("serving {}", args.dir.display()))?,
        Commands::Client(args) => run_client(args, &ctx)?,
    };
    Ok(output)
}

/// Logs go to stderr; stdout carries client events and command output
fn init_tracing(verbose: bool) -> anyhow::Result<()> {
    let level = if verbose { "dirapp=debug" } else { "dirapp=info" };
    let filter = EnvFilter::from_default_env().add_directive(level.parse()?);

    // Note: This may fail if already initialized, which is fine
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
    Ok(())
}
