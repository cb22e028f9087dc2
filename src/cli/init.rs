use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::path::Path;

use super::OutputConfig;
use crate::config::WorkspaceConfig;
use crate::storage::Store;

#[derive(Args)]
pub struct InitArgs {
    /// Overwrite an existing config with defaults
    #[arg(long)]
    force: bool,
}

pub fn run(args: InitArgs, workspace: &Path, output: OutputConfig) -> Result<()> {
    let memory_dir = WorkspaceConfig::memory_dir(workspace);
    std::fs::create_dir_all(&memory_dir)?;

    let config_path = WorkspaceConfig::config_path(workspace);
    let wrote_config = if !config_path.exists() || args.force {
        let defaults = serde_json::to_string_pretty(&WorkspaceConfig::default())?;
        std::fs::write(&config_path, defaults)?;
        true
    } else {
        false
    };

    // Opening the store creates the schema.
    let store = Store::open(workspace)?;
    let stats = store.get_stats()?;

    if output.json {
        println!(
            "{}",
            serde_json::json!({
                "workspace": workspace.display().to_string(),
                "config_written": wrote_config,
                "chunks": stats.total_chunks,
            })
        );
    } else if !output.quiet {
        println!("{} initialized {}", "✓".green(), memory_dir.display());
        if wrote_config {
            println!("  wrote {}", config_path.display().to_string().cyan());
        } else {
            println!("  kept existing {}", config_path.display().to_string().cyan());
        }
        println!("  run {} to build the index", "engram index".cyan());
    }
    Ok(())
}
