//! wafcheck CLI - Main Entry Point
//!
//! Runs single declarative actions against a deployed firewall and prepares
//! the files the CI matrix needs to schedule them.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::error;

mod commands;

use commands::{generate, parse, run};
use wafcheck_e2e::HarnessSettings;

/// wafcheck - declarative WAF end-to-end checks
#[derive(Parser)]
#[command(name = "wafcheck")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Root of the test tree
    #[arg(long, env = "WAFCHECK_TESTS_DIR", global = true)]
    tests_dir: Option<PathBuf>,

    /// Harness settings file
    #[arg(long, env = "WAFCHECK_SETTINGS", default_value = "wafcheck.toml", global = true)]
    settings: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute one action and report pass or fail
    Run(run::RunArgs),

    /// Expand test files into the per-integration test lists
    Parse(parse::ParseArgs),

    /// Write the configuration files one action needs
    Generate(generate::GenerateArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let debug = cli.verbose || std::env::var_os("ACTIONS_STEP_DEBUG").is_some();
    let log_level = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    let settings = match load_settings(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Commands::Run(args) => run::execute(args, &settings).await,
        Commands::Parse(args) => parse::execute(args, &settings).await,
        Commands::Generate(args) => generate::execute(args, &settings).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_settings(cli: &Cli) -> anyhow::Result<HarnessSettings> {
    use anyhow::Context;

    let mut settings = HarnessSettings::load(&cli.settings)
        .with_context(|| format!("Failed to load settings from {}", cli.settings.display()))?;
    if let Some(tests_dir) = &cli.tests_dir {
        settings.tests_dir = tests_dir.clone();
    }
    Ok(settings)
}
