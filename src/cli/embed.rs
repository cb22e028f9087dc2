use anyhow::Result;
use clap::Args;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;

use super::OutputConfig;
use crate::search::semantic::{embedding_status, EmbeddingService};
use crate::storage::Store;

#[derive(Args)]
pub struct EmbedArgs {
    /// Show embedding status without embedding anything
    #[arg(long)]
    status: bool,
}

pub async fn run(args: EmbedArgs, workspace: &Path, output: OutputConfig) -> Result<()> {
    let mut store = Store::open(workspace)?;
    let service = EmbeddingService::global();

    if args.status {
        let status = embedding_status(service, &store)?;
        if output.json {
            println!("{}", serde_json::to_string(&status)?);
        } else {
            let availability = if status.available {
                "available".green()
            } else {
                "not installed".yellow()
            };
            println!("{} model {} ({}d): {}", "•".cyan(), status.model, status.dimensions, availability);
            println!(
                "  {} embedded, {} pending, {} total",
                status.embedded_chunks, status.pending_chunks, status.total_chunks
            );
        }
        return Ok(());
    }

    if !service.warmup().await {
        if output.json {
            println!("{}", serde_json::json!({ "available": false, "embedded": 0 }));
        } else if !output.quiet {
            println!(
                "{} embedding model not installed; semantic features stay disabled",
                "!".yellow()
            );
        }
        return Ok(());
    }

    let pending = embedding_status(service, &store)?.pending_chunks;
    let bar = if output.quiet || output.json {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(pending);
        bar.set_style(
            ProgressStyle::with_template("{spinner} embedding {pos}/{len} chunks")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar
    };
    let report = service
        .embed_all(&mut store, |done| bar.set_position(done as u64))
        .await?;
    bar.finish_and_clear();

    if output.json {
        println!("{}", serde_json::to_string(&report)?);
    } else if !output.quiet {
        println!("{} embedded {} chunk(s)", "✓".green(), report.embedded);
    }
    Ok(())
}
