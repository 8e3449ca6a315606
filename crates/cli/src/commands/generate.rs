//! Generate Command
//!
//! Writes the instance configuration, autoconf services and timeout for
//! one action on one integration.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use wafcheck_e2e::{ActionRef, HarnessSettings, Integration, IntegrationMatrix, Materializer, Mode, TestFile};

use super::Kind;

#[derive(Args)]
pub struct GenerateArgs {
    /// Integration to generate for: Docker, Linux or Autoconf
    pub integration: Integration,

    /// Test tree the file lives in
    #[arg(value_enum)]
    pub kind: Kind,

    /// Action to generate for, as `file;action`
    pub test: ActionRef,

    /// Use the `dev` section of integrations.yml
    #[arg(long)]
    pub dev: bool,

    /// Instance configuration output
    #[arg(long)]
    pub config_out: Option<PathBuf>,

    /// Autoconf compose descriptor output
    #[arg(long)]
    pub autoconf_out: Option<PathBuf>,

    /// Action timeout output
    #[arg(long)]
    pub timeout_out: Option<PathBuf>,
}

pub async fn execute(args: GenerateArgs, settings: &HarnessSettings) -> Result<ExitCode> {
    let mut outputs = settings.outputs.clone();
    if let Some(path) = args.config_out {
        outputs.instance_config = path;
    }
    if let Some(path) = args.autoconf_out {
        outputs.autoconf_services = path;
    }
    if let Some(path) = args.timeout_out {
        outputs.timeout_file = path;
    }

    let mode = if args.dev { Mode::Dev } else { Mode::Staging };
    let matrix = IntegrationMatrix::load(&settings.integrations_file(), mode)
        .with_context(|| format!("Failed to load {}", settings.integrations_file().display()))?;

    let path = settings.test_file(args.kind.as_str(), &args.test.file);
    info!("📖 Reading {}", path.display());
    let file = TestFile::from_file(&path).with_context(|| format!("Failed to read {}", path.display()))?;

    let materializer = Materializer::load(&settings.base_config_file(), &settings.autoconf_template())
        .with_context(|| format!("Failed to load {}", settings.base_config_file().display()))?;
    let materialized = materializer
        .materialize(&matrix, args.integration, &file, &args.test.action)
        .with_context(|| format!("Cannot generate {} for {}", args.test, args.integration))?;

    materialized.write(&outputs)?;
    Ok(ExitCode::SUCCESS)
}
