use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::path::Path;

use super::OutputConfig;
use crate::config::WorkspaceConfig;
use crate::entities::EntityCache;
use crate::reflect::{resolve_contradiction, run_reflect_cycle, Resolution};
use crate::storage::Store;

#[derive(Args)]
pub struct ReflectArgs {
    /// Report what the cycle would change without writing
    #[arg(long)]
    dry_run: bool,
}

pub fn run(args: ReflectArgs, workspace: &Path, output: OutputConfig) -> Result<()> {
    let config = WorkspaceConfig::load(workspace);
    let mut store = Store::open(workspace)?;
    let report = run_reflect_cycle(&mut store, &config.reflect, args.dry_run)?;
    if !args.dry_run {
        EntityCache::global().invalidate();
    }

    if output.json {
        println!("{}", serde_json::to_string(&report)?);
        return Ok(());
    }
    if output.quiet {
        return Ok(());
    }

    let marker = if args.dry_run { "(dry run) " } else { "" };
    println!(
        "{} {}decayed {}, reinforced {}, stale {}, contradictions {}, pruned {}",
        "✓".green(),
        marker,
        report.decayed,
        report.reinforced,
        report.marked_stale,
        report.contradictions_found,
        report.pruned
    );
    println!(
        "  entity index: {} entities, {} links",
        report.entities.entities, report.entities.links
    );

    if report.contradictions_found > 0 && !args.dry_run {
        for c in store.list_contradictions(false)? {
            println!(
                "  {} #{}: chunk {} vs {} — {}",
                "⚠".yellow(),
                c.id,
                c.chunk_id_old,
                c.chunk_id_new,
                c.reason
            );
        }
    }
    Ok(())
}

#[derive(Args)]
pub struct RestoreArgs {
    /// Archived chunk id to restore
    #[arg(required_unless_present = "list")]
    chunk_id: Option<i64>,

    /// List archived chunks instead of restoring
    #[arg(long, conflicts_with = "chunk_id")]
    list: bool,

    /// Maximum archived chunks to list
    #[arg(long, short = 'n', default_value = "20", requires = "list")]
    limit: usize,
}

pub fn run_restore(args: RestoreArgs, workspace: &Path, output: OutputConfig) -> Result<()> {
    let mut store = Store::open(workspace)?;

    if args.list {
        let archived = store.list_archived(args.limit)?;
        if output.json {
            println!("{}", serde_json::to_string(&archived)?);
        } else if archived.is_empty() {
            if !output.quiet {
                println!("{} archive is empty", "!".yellow());
            }
        } else {
            for a in archived {
                let preview: String = a.content.chars().take(80).collect();
                println!(
                    "{} #{} {}:{} [{}] ({}) {}",
                    "•".cyan(),
                    a.id,
                    a.file_path,
                    a.line_start,
                    a.chunk_type,
                    a.archive_reason.dimmed(),
                    preview
                );
            }
        }
        return Ok(());
    }

    let Some(chunk_id) = args.chunk_id else {
        anyhow::bail!("missing archived chunk id");
    };
    match store.restore_chunk(chunk_id)? {
        Some(new_id) => {
            EntityCache::global().invalidate();
            if output.json {
                println!("{}", serde_json::json!({ "restored": chunk_id, "new_id": new_id }));
            } else if !output.quiet {
                println!("{} restored archive {} as chunk {}", "✓".green(), chunk_id, new_id);
            }
            Ok(())
        }
        None => anyhow::bail!("no archived chunk with id {}", chunk_id),
    }
}

#[derive(Args)]
pub struct ResolveArgs {
    /// Contradiction id
    id: i64,

    /// One of: keep-newer, keep-older, keep-both, dismiss
    action: String,
}

pub fn run_resolve(args: ResolveArgs, workspace: &Path, output: OutputConfig) -> Result<()> {
    let Some(action) = Resolution::parse(&args.action) else {
        anyhow::bail!(
            "unknown action '{}': expected keep-newer, keep-older, keep-both, or dismiss",
            args.action
        );
    };
    let mut store = Store::open(workspace)?;
    if !resolve_contradiction(&mut store, args.id, action)? {
        anyhow::bail!("no contradiction with id {}", args.id);
    }
    if output.json {
        println!("{}", serde_json::json!({ "resolved": args.id, "action": args.action }));
    } else if !output.quiet {
        println!("{} resolved contradiction {} ({})", "✓".green(), args.id, args.action);
    }
    Ok(())
}
