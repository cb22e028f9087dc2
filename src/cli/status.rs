use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::path::Path;

use super::OutputConfig;
use crate::storage::Store;

#[derive(Args)]
pub struct StatusArgs {}

pub fn run(_args: StatusArgs, workspace: &Path, output: OutputConfig) -> Result<()> {
    let config = crate::config::WorkspaceConfig::load(workspace);
    let store = Store::open(workspace)?;
    let stats = store.get_stats()?;

    if output.json {
        println!("{}", serde_json::to_string(&stats)?);
        return Ok(());
    }

    let label = match &config.owner {
        Some(owner) => format!("{} ({owner})", workspace.display()),
        None => workspace.display().to_string(),
    };
    println!("{} {}", "•".cyan(), label.bold());
    println!(
        "  {} file(s), {} chunk(s) ({} stale, {} embedded)",
        stats.total_files, stats.total_chunks, stats.stale_chunks, stats.embedded_chunks
    );
    println!(
        "  {} archived, {} open contradiction(s)",
        stats.archived_chunks, stats.open_contradictions
    );
    if !stats.chunks_by_type.is_empty() {
        let breakdown = stats
            .chunks_by_type
            .iter()
            .map(|t| format!("{} {}", t.count, t.chunk_type))
            .collect::<Vec<_>>()
            .join(", ");
        println!("  by type: {breakdown}");
    }
    if let Some(ts) = stats.last_indexed {
        if let Some(dt) = chrono::DateTime::from_timestamp_millis(ts) {
            println!("  last indexed {}", dt.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M"));
        }
    }
    println!("  db size {} KiB", stats.db_size_bytes / 1024);

    if output.verbose {
        let events = crate::recall_log::read_all(workspace);
        if let Some(last) = events.last() {
            println!(
                "  {} recall(s) logged, last: \"{}\" → {} chunk(s)",
                events.len(),
                last.query,
                last.returned
            );
        }
    }
    Ok(())
}
