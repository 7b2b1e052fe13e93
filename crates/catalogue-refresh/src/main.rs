// Copyright 2026 Catalogue Refresh Contributors
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use catalogue_refresh::cli;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "catalogue",
    about = "Weekly retailer catalogue discovery and publishing",
    version,
    after_help = "Run 'catalogue <command> --help' for details on each command."
)]
struct Cli {
    /// JSON config file (defaults to $CATALOGUE_CONFIG when set)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output results as JSON (machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Suppress non-essential output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Enable verbose/debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Refresh retailers now
    Run {
        /// Retailer id to refresh (repeatable; default: all configured)
        #[arg(long = "retailer")]
        retailers: Vec<String>,
        /// Run up to N retailers at once
        #[arg(long)]
        parallel: Option<usize>,
    },
    /// Refresh all retailers every week until interrupted
    Schedule {
        /// Day of the week (e.g. "wed")
        #[arg(long)]
        day: Option<String>,
        /// Local time of day, HH:MM
        #[arg(long)]
        at: Option<String>,
        /// Run once immediately before waiting for the schedule
        #[arg(long)]
        run_now: bool,
    },
    /// Show what is published for each retailer
    Status,
    /// Check environment and diagnose issues
    Doctor,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

fn init_tracing(verbose: bool, json: bool) {
    let level = if verbose { "debug" } else { "info" };
    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = format!("catalogue_refresh={level}").parse() {
        filter = filter.add_directive(directive);
    }
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set global flags via environment variables so all modules can check them
    if cli.json {
        std::env::set_var("CATALOGUE_JSON", "1");
    }
    if cli.quiet {
        std::env::set_var("CATALOGUE_QUIET", "1");
    }
    if cli.no_color {
        std::env::set_var("CATALOGUE_NO_COLOR", "1");
    }

    if !matches!(cli.command, Commands::Completions { .. }) {
        init_tracing(cli.verbose, cli.json);
    }

    let config = cli.config.as_deref();
    let result = match cli.command {
        Commands::Run {
            retailers,
            parallel,
        } => cli::run_cmd::run(config, &retailers, parallel).await,
        Commands::Schedule { day, at, run_now } => {
            cli::schedule_cmd::run(config, day.as_deref(), at.as_deref(), run_now).await
        }
        Commands::Status => cli::status::run(config).await,
        Commands::Doctor => cli::doctor::run(config).await,
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "catalogue", &mut std::io::stdout());
            Ok(())
        }
    };

    // Consistent exit codes: 0=success, 1=error
    if let Err(e) = &result {
        if !cli::output::is_quiet() && !cli::output::is_json() {
            eprintln!("  Error: {e:#}");
        }
        if cli::output::is_json() {
            cli::output::print_json(&serde_json::json!({
                "error": true,
                "message": format!("{e:#}"),
            }));
        }
        std::process::exit(1);
    }

    result
}
