use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::path::Path;

use super::OutputConfig;
use crate::config::WorkspaceConfig;
use crate::entities::EntityCache;
use crate::storage::Store;

#[derive(Args)]
pub struct RememberArgs {
    /// What to remember
    content: String,

    /// Tag: fact, decision, pref, opinion, confirmed, inferred, action_item
    #[arg(long, short = 't')]
    tag: Option<String>,

    /// Log date (YYYY-MM-DD), defaults to today
    #[arg(long)]
    date: Option<String>,

    /// Append without re-indexing the log file
    #[arg(long)]
    no_index: bool,
}

pub fn run(args: RememberArgs, workspace: &Path, output: OutputConfig) -> Result<()> {
    let outcome = crate::remember::remember(
        workspace,
        &args.content,
        args.tag.as_deref(),
        args.date.as_deref(),
    )?;

    if !outcome.skipped && !args.no_index {
        let config = WorkspaceConfig::load(workspace);
        let mut store = Store::open(workspace)?;
        crate::index::index_single_file(workspace, &mut store, &config, &outcome.rel_path)?;
        EntityCache::global().invalidate();
    }

    if output.json {
        println!(
            "{}",
            serde_json::json!({
                "file": outcome.file_path.display().to_string(),
                "created": outcome.created,
                "skipped": outcome.skipped,
                "line": outcome.line,
            })
        );
    } else if !output.quiet {
        if outcome.skipped {
            println!("{} already remembered today, skipped", "!".yellow());
        } else {
            println!(
                "{} {} {}",
                "✓".green(),
                outcome.rel_path.cyan(),
                outcome.line.as_deref().unwrap_or("").trim_end()
            );
        }
    }
    Ok(())
}
