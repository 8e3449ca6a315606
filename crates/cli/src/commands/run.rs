//! Run Command
//!
//! Executes one `file;action` pair and exits non-zero unless it passes.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tracing::{debug, info};

use wafcheck_e2e::playwright::Browser;
use wafcheck_e2e::{ActionRef, ActionRunner, HarnessSettings, RunnerConfig, TestFile, Verdict};

use super::Kind;

#[derive(Args)]
pub struct RunArgs {
    /// Action to run, as `file;action`
    pub test: ActionRef,

    /// Test tree the file lives in
    #[arg(long, value_enum, default_value = "core")]
    pub kind: Kind,

    /// Browser engine for xpath and cookie actions
    #[arg(long, env = "WAFCHECK_BROWSER")]
    pub browser: Option<Browser>,

    /// Do not wait for the action's delay before executing it
    #[arg(long)]
    pub skip_delay: bool,
}

pub async fn execute(args: RunArgs, settings: &HarnessSettings) -> Result<ExitCode> {
    info!("🚀 Starting test {} / {}", args.test.file, args.test.action);

    let path = settings.test_file(args.kind.as_str(), &args.test.file);
    info!("📖 Reading {}", path.display());
    let file = TestFile::from_file(&path).with_context(|| format!("Failed to read {}", path.display()))?;

    let action = file
        .action(&args.test.action)
        .with_context(|| format!("Action {} has invalid data", args.test))?;
    debug!("Action: {:?}", action);

    let mut config = RunnerConfig::from(settings);
    if let Some(browser) = args.browser {
        config.playwright.browser = browser;
    }
    config.skip_delay = args.skip_delay;

    let verdict = ActionRunner::new(config).run(&action).await?;

    match verdict {
        Verdict::Pass(_) => {
            println!("{} {}", "✅ PASS".green().bold(), args.test);
            Ok(ExitCode::SUCCESS)
        }
        Verdict::Fail(reason) => {
            println!("{} {}: {}", "❌ FAIL".red().bold(), args.test, reason);
            Ok(ExitCode::FAILURE)
        }
    }
}
