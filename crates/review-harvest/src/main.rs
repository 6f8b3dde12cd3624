// Copyright 2026 Review Harvest Contributors
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

mod cli;

use cli::logging::LogFormat;

#[derive(Parser)]
#[command(
    name = "review-harvest",
    about = "Harvest structured reviews from a rendered review listing",
    version,
    after_help = "Run 'review-harvest <command> --help' for details on each command."
)]
struct Cli {
    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Log line format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Harvest every review on a listing page
    Harvest {
        /// Listing URL (e.g. "https://www.imdb.com/title/tt2948356/reviews/")
        url: String,
        /// Numeric identifier attached to every record
        #[arg(long)]
        id: u64,
        /// Write the batch here instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
        /// Replay a saved HTML page instead of launching Chromium
        #[arg(long)]
        snapshot: Option<PathBuf>,
        /// TOML configuration file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Rule book replacing the embedded selectors
        #[arg(long)]
        rules: Option<PathBuf>,
        /// Whole-run budget in seconds (0 disables it)
        #[arg(long)]
        timeout: Option<u64>,
        /// Stream progress events to stderr as JSON lines
        #[arg(long)]
        events: bool,
        /// Show the browser window
        #[arg(long)]
        headed: bool,
    },
    /// Check environment and diagnose issues
    Doctor {
        /// TOML configuration file to validate
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish)
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    cli::logging::init(&cli.log_level, cli.log_format);

    let result = match cli.command {
        Commands::Harvest {
            url,
            id,
            output,
            snapshot,
            config,
            rules,
            timeout,
            events,
            headed,
        } => {
            cli::harvest_cmd::run(cli::harvest_cmd::HarvestArgs {
                url,
                id,
                output,
                snapshot,
                config,
                rules,
                timeout,
                events,
                headed,
            })
            .await
        }
        Commands::Doctor { config } => cli::doctor::run(config.as_deref()).await,
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "review-harvest", &mut std::io::stdout());
            Ok(())
        }
    };

    // 0 = success, 130 = interrupted, 1 = any other error
    if let Err(e) = &result {
        eprintln!("Error: {e:#}");
        let interrupted = e
            .downcast_ref::<review_harvest::HarvestError>()
            .is_some_and(|h| h.is_interrupted());
        std::process::exit(if interrupted { 130 } else { 1 });
    }

    result
}
