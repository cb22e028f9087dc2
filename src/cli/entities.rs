use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::path::Path;

use super::OutputConfig;
use crate::entities::{build_entity_index, get_related_entities, normalize_label};
use crate::storage::Store;

#[derive(Args)]
pub struct EntitiesArgs {
    /// Show one entity (and its co-occurrences) instead of the list
    name: Option<String>,

    /// Maximum entities to list
    #[arg(long, short = 'n', default_value = "25")]
    limit: usize,

    /// Rebuild the entity index first
    #[arg(long)]
    rebuild: bool,
}

pub fn run(args: EntitiesArgs, workspace: &Path, output: OutputConfig) -> Result<()> {
    let mut store = Store::open(workspace)?;
    if args.rebuild {
        let report = build_entity_index(&mut store, false)?;
        if !output.quiet && !output.json {
            println!(
                "{} rebuilt: {} entities, {} links",
                "✓".green(),
                report.entities,
                report.links
            );
        }
    }

    if let Some(name) = &args.name {
        let normalized = normalize_label(name).unwrap_or_default();
        let Some(record) = store.get_entity(&normalized)? else {
            if output.json {
                println!("null");
            } else if !output.quiet {
                println!("{} unknown entity: {name}", "!".yellow());
            }
            return Ok(());
        };
        if output.json {
            println!("{}", serde_json::to_string(&record)?);
            return Ok(());
        }
        println!(
            "{} {} — {} mention(s) across {} chunk(s)",
            "•".cyan(),
            record.entity.bold(),
            record.mention_count,
            record.chunk_ids.len()
        );
        for (other, count) in get_related_entities(&store, &normalized)? {
            println!("  {} {} (×{})", "↳".dimmed(), other, count);
        }
        return Ok(());
    }

    let entities = store.list_entities(args.limit)?;
    if output.json {
        println!("{}", serde_json::to_string(&entities)?);
        return Ok(());
    }
    if entities.is_empty() {
        if !output.quiet {
            println!("{} entity index is empty — run `engram reflect` or `engram entities --rebuild`", "!".yellow());
        }
        return Ok(());
    }
    for e in entities {
        println!("{} {} (×{})", "•".cyan(), e.entity, e.mention_count);
    }
    Ok(())
}
