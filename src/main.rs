// src/main.rs

use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

use cli::{Cli, Commands};

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Recompress {
            input,
            output,
            compressor,
            signing_command,
            workspace,
        } => commands::cmd_recompress(
            &input,
            &output,
            &compressor,
            signing_command.as_deref(),
            &workspace,
        ),
        Commands::Sign {
            input,
            output,
            signing_command,
            workspace,
        } => commands::cmd_sign(&input, &output, &signing_command, &workspace),
    }
}
