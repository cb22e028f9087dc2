use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::path::Path;

use super::OutputConfig;
use crate::config::WorkspaceConfig;
use crate::entities::EntityCache;
use crate::storage::Store;

#[derive(Args)]
pub struct IndexArgs {
    /// Re-index every file even if its mtime is unchanged
    #[arg(long, short = 'f')]
    force: bool,
}

pub fn run(args: IndexArgs, workspace: &Path, output: OutputConfig) -> Result<()> {
    let config = WorkspaceConfig::load(workspace);
    let mut store = Store::open(workspace)?;

    if config.ingest.auto_sync {
        let ingest_report = crate::ingest::sync_ingest(workspace, &config.ingest, args.force)?;
        if output.verbose && !output.quiet && !output.json {
            println!(
                "{} ingest: {} generated, {} skipped, {} removed",
                "•".cyan(),
                ingest_report.generated,
                ingest_report.skipped,
                ingest_report.removed
            );
        }
    }

    let report = crate::index::index_workspace(workspace, &mut store, &config, args.force)?;
    EntityCache::global().invalidate();

    if output.json {
        println!("{}", serde_json::to_string(&report)?);
    } else if !output.quiet {
        println!(
            "{} indexed {} file(s), skipped {}, cleaned {}",
            "✓".green(),
            report.indexed,
            report.skipped,
            report.cleaned
        );
        for err in &report.errors {
            println!("  {} {}: {}", "!".yellow(), err.file_path, err.error);
        }
    }
    Ok(())
}
