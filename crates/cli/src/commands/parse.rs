//! Parse Command
//!
//! Expands a test tree into the lists the CI matrix fans out over.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use wafcheck_e2e::catalog::{self, Catalog, IntegrationMatrix, Mode};
use wafcheck_e2e::{HarnessSettings, TestFile};

use super::Kind;

#[derive(Args)]
pub struct ParseArgs {
    /// Test tree to expand
    #[arg(value_enum)]
    pub kind: Kind,

    /// Use the `dev` section of integrations.yml
    #[arg(long)]
    pub dev: bool,

    /// List the actions of one test file instead
    #[arg(long)]
    pub category: Option<String>,

    /// Directory receiving the generated lists
    #[arg(long)]
    pub out_dir: Option<PathBuf>,
}

pub async fn execute(args: ParseArgs, settings: &HarnessSettings) -> Result<ExitCode> {
    let out_dir = args.out_dir.unwrap_or_else(|| settings.outputs.catalog_dir.clone());

    if let Some(category) = &args.category {
        let path = settings.test_file(args.kind.as_str(), category);
        let file = TestFile::from_file(&path).with_context(|| format!("Failed to read {}", path.display()))?;
        let lines = catalog::list_actions(&file);
        let written = catalog::write_actions(&lines, &out_dir)?;
        info!("📝 Wrote {} actions to {}", lines.len(), written.display());
        return Ok(ExitCode::SUCCESS);
    }

    let mode = if args.dev { Mode::Dev } else { Mode::Staging };
    let matrix = IntegrationMatrix::load(&settings.integrations_file(), mode)
        .with_context(|| format!("Failed to load {}", settings.integrations_file().display()))?;

    let catalog = Catalog::scan(&settings.kind_dir(args.kind.as_str()), &matrix)?;
    for path in catalog.write_per_integration(&matrix, &out_dir)? {
        info!("📝 Wrote {}", path.display());
    }

    Ok(ExitCode::SUCCESS)
}
