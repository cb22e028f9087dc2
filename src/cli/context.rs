use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::path::Path;

use super::OutputConfig;
use crate::config::WorkspaceConfig;
use crate::entities::EntityCache;
use crate::search::context::{get_relevant_context, ContextOptions};
use crate::search::semantic::EmbeddingService;
use crate::storage::Store;

#[derive(Args)]
pub struct ContextArgs {
    /// The user message to assemble context for
    message: String,

    /// Token budget for the rendered block
    #[arg(long, default_value = "1500")]
    max_tokens: usize,

    /// Maximum chunks before intent widening
    #[arg(long, default_value = "6")]
    max_chunks: usize,

    /// Score floor before intent/date lowering
    #[arg(long, default_value = "0.25")]
    min_score: f64,

    /// Embed the query for semantic scoring and rescue
    #[arg(long)]
    semantic: bool,

    /// Skip the contradiction annotation
    #[arg(long)]
    no_contradictions: bool,

    /// Prior conversation messages (repeatable; newest last)
    #[arg(long = "prior")]
    prior: Vec<String>,
}

pub async fn run(args: ContextArgs, workspace: &Path, output: OutputConfig) -> Result<()> {
    let config = WorkspaceConfig::load(workspace);
    let mut store = Store::open(workspace)?;
    let opts = ContextOptions {
        max_tokens: args.max_tokens,
        max_chunks: args.max_chunks,
        min_score: args.min_score,
        min_confidence: None,
        conversation: args.prior,
        flag_contradictions: !args.no_contradictions,
        use_semantic: args.semantic,
    };

    let result = get_relevant_context(
        workspace,
        &mut store,
        &config,
        EmbeddingService::global(),
        EntityCache::global(),
        &args.message,
        &opts,
    )
    .await?;

    if output.json {
        println!("{}", serde_json::to_string(&result)?);
        return Ok(());
    }

    if result.chunks.is_empty() {
        if !output.quiet {
            println!("{} nothing relevant found", "!".yellow());
        }
        return Ok(());
    }

    print!("{}", result.text);
    if output.verbose {
        println!(
            "{}",
            format!("~{} tokens, {} chunk(s)", result.token_estimate, result.chunks.len()).dimmed()
        );
    }
    Ok(())
}
