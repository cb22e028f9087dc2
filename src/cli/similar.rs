use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::path::Path;

use super::OutputConfig;
use crate::search::semantic::EmbeddingService;
use crate::storage::Store;

#[derive(Args)]
pub struct SimilarArgs {
    /// Text to find semantically similar memories for
    text: String,

    /// Maximum number of results
    #[arg(long, short = 'n', default_value = "10")]
    limit: usize,
}

pub async fn run(args: SimilarArgs, workspace: &Path, output: OutputConfig) -> Result<()> {
    let store = Store::open(workspace)?;
    let service = EmbeddingService::global();

    if !service.warmup().await {
        if output.json {
            println!("[]");
        } else if !output.quiet {
            println!(
                "{} embedding model not installed; run `engram embed --status` for details",
                "!".yellow()
            );
        }
        return Ok(());
    }

    let scored = service.semantic_search(&store, &args.text, args.limit).await?;
    if output.json {
        let rows: Vec<_> = scored
            .iter()
            .filter_map(|(id, sim)| {
                store.get_chunk(*id).ok().flatten().map(|c| {
                    serde_json::json!({
                        "file_path": c.file_path,
                        "line_start": c.line_start,
                        "similarity": sim,
                        "content": c.content,
                    })
                })
            })
            .collect();
        println!("{}", serde_json::to_string(&rows)?);
        return Ok(());
    }

    if scored.is_empty() {
        if !output.quiet {
            println!("{} no embedded chunks to compare against", "!".yellow());
        }
        return Ok(());
    }
    for (id, sim) in scored {
        let Some(chunk) = store.get_chunk(id)? else {
            continue;
        };
        let preview: String = chunk.content.chars().take(120).collect();
        println!(
            "{} {}:{} (cos {:.2})",
            "•".cyan(),
            chunk.file_path.bold(),
            chunk.line_start,
            sim
        );
        println!("  {preview}");
    }
    Ok(())
}
