use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::path::Path;

use super::OutputConfig;
use crate::config::WorkspaceConfig;
use crate::search::recall::{recall, RecallOptions};
use crate::storage::Store;
use crate::types::ChunkType;

#[derive(Args)]
pub struct SearchArgs {
    /// The search query
    query: String,

    /// Maximum number of results
    #[arg(long, short = 'n', default_value = "10")]
    limit: usize,

    /// Only chunks created since (YYYY-MM-DD or Nd/Nw/Nm/Ny)
    #[arg(long)]
    since: Option<String>,

    /// Restrict to one chunk type
    #[arg(long, short = 't', value_parser = parse_chunk_type)]
    r#type: Option<ChunkType>,

    /// Minimum confidence
    #[arg(long)]
    min_confidence: Option<f64>,

    /// Include stale chunks
    #[arg(long)]
    include_stale: bool,

    /// Attach ±N adjacent chunks from the same file
    #[arg(long, short = 'c', default_value = "0")]
    context: usize,
}

fn parse_chunk_type(s: &str) -> Result<ChunkType, String> {
    ChunkType::from_label(s).ok_or_else(|| format!("unknown chunk type: {s}"))
}

pub fn run(args: SearchArgs, workspace: &Path, output: OutputConfig) -> Result<()> {
    let config = WorkspaceConfig::load(workspace);
    let mut store = Store::open(workspace)?;
    let opts = RecallOptions {
        limit: args.limit,
        since: args.since,
        chunk_type: args.r#type,
        min_confidence: args.min_confidence,
        include_stale: args.include_stale,
        context: args.context,
    };
    let results = recall(workspace, &mut store, &config, &args.query, &opts)?;

    if output.json {
        let rows: Vec<_> = results
            .iter()
            .map(|r| {
                serde_json::json!({
                    "file_path": r.chunk.file_path,
                    "line_start": r.chunk.line_start,
                    "line_end": r.chunk.line_end,
                    "heading": r.chunk.heading,
                    "chunk_type": r.chunk.chunk_type,
                    "confidence": r.chunk.confidence,
                    "score": r.score,
                    "content": r.chunk.content,
                    "context": r.context.iter().map(|c| &c.content).collect::<Vec<_>>(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string(&rows)?);
        return Ok(());
    }

    if results.is_empty() {
        if !output.quiet {
            println!("{} no matches", "!".yellow());
        }
        return Ok(());
    }

    for r in &results {
        let location = format!("{}:{}", r.chunk.file_path, r.chunk.line_start);
        println!(
            "{} {} {} (score {:.2})",
            "•".cyan(),
            location.bold(),
            format!("[{}]", r.chunk.chunk_type).dimmed(),
            r.score
        );
        let preview: String = r.chunk.content.chars().take(160).collect();
        println!("  {preview}");
        if output.verbose {
            for ctx in &r.context {
                let line: String = ctx.content.chars().take(100).collect();
                println!("    {} {}", "↳".dimmed(), line.dimmed());
            }
        }
    }
    Ok(())
}
