use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::path::Path;

use super::OutputConfig;
use crate::config::WorkspaceConfig;
use crate::entities::EntityCache;
use crate::storage::Store;

#[derive(Args)]
pub struct IngestArgs {
    /// Regenerate every output even for unchanged sources
    #[arg(long, short = 'f')]
    force: bool,

    /// Generate markdown but skip re-indexing
    #[arg(long)]
    no_index: bool,
}

pub fn run(args: IngestArgs, workspace: &Path, output: OutputConfig) -> Result<()> {
    let config = WorkspaceConfig::load(workspace);
    let report = crate::ingest::sync_ingest(workspace, &config.ingest, args.force)?;

    if !args.no_index && (report.generated > 0 || report.removed > 0) {
        let mut store = Store::open(workspace)?;
        crate::index::index_workspace(workspace, &mut store, &config, false)?;
        EntityCache::global().invalidate();
    }

    if output.json {
        println!("{}", serde_json::to_string(&report)?);
    } else if !output.quiet {
        println!(
            "{} generated {}, skipped {}, removed {}",
            "✓".green(),
            report.generated,
            report.skipped,
            report.removed
        );
        for err in &report.errors {
            println!("  {} {}", "!".yellow(), err);
        }
    }
    Ok(())
}
