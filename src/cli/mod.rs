mod completions;
mod context;
mod embed;
mod entities;
mod index;
mod ingest;
mod init;
mod reflect;
mod remember;
mod search;
mod similar;
mod status;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "engram")]
#[command(about = "Local persistent memory index for AI assistant workspaces")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    /// Show detailed progress
    #[arg(long, global = true)]
    verbose: bool,

    /// Workspace root (defaults to the nearest ancestor with a .memory/)
    #[arg(long, global = true, value_name = "DIR", env = "ENGRAM_WORKSPACE")]
    workspace: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a memory workspace in the current directory
    Init(init::InitArgs),

    /// Index workspace markdown into the store
    Index(index::IndexArgs),

    /// Precision search over indexed memories
    Search(search::SearchArgs),

    /// Find semantically similar memories (requires the embedding model)
    Similar(similar::SimilarArgs),

    /// Assemble a ranked, token-budgeted context block for a message
    Context(context::ContextArgs),

    /// Append a structured line to today's log and index it
    Remember(remember::RememberArgs),

    /// Run the maintenance cycle (decay, reinforce, stale, contradictions, prune)
    Reflect(reflect::ReflectArgs),

    /// Restore an archived chunk
    Restore(reflect::RestoreArgs),

    /// Resolve a detected contradiction
    Resolve(reflect::ResolveArgs),

    /// Inspect the entity index
    Entities(entities::EntitiesArgs),

    /// Embed chunks for semantic retrieval, or show embedding status
    Embed(embed::EmbedArgs),

    /// Sync transcript/CSV sources into indexed markdown
    Ingest(ingest::IngestArgs),

    /// Show store statistics
    Status(status::StatusArgs),

    /// Generate shell completions
    Completions(completions::CompletionsArgs),
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let output = OutputConfig {
            json: self.json,
            quiet: self.quiet,
            verbose: self.verbose,
        };
        let workspace = resolve_workspace(self.workspace);

        match self.command {
            Commands::Init(args) => init::run(args, &workspace, output),
            Commands::Index(args) => index::run(args, &workspace, output),
            Commands::Search(args) => search::run(args, &workspace, output),
            Commands::Similar(args) => similar::run(args, &workspace, output).await,
            Commands::Context(args) => context::run(args, &workspace, output).await,
            Commands::Remember(args) => remember::run(args, &workspace, output),
            Commands::Reflect(args) => reflect::run(args, &workspace, output),
            Commands::Restore(args) => reflect::run_restore(args, &workspace, output),
            Commands::Resolve(args) => reflect::run_resolve(args, &workspace, output),
            Commands::Entities(args) => entities::run(args, &workspace, output),
            Commands::Embed(args) => embed::run(args, &workspace, output).await,
            Commands::Ingest(args) => ingest::run(args, &workspace, output),
            Commands::Status(args) => status::run(args, &workspace, output),
            Commands::Completions(args) => {
                completions::run(args);
                Ok(())
            }
        }
    }
}

/// Explicit flag wins; otherwise walk up from cwd looking for `.memory/`,
/// falling back to cwd (so `init` can bootstrap anywhere).
fn resolve_workspace(explicit: Option<PathBuf>) -> PathBuf {
    if let Some(ws) = explicit {
        return ws;
    }
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let mut current = cwd.clone();
    loop {
        if current.join(".memory").is_dir() {
            return current;
        }
        if !current.pop() {
            return cwd;
        }
    }
}

/// Output configuration passed to all commands
#[derive(Debug, Clone, Copy)]
pub struct OutputConfig {
    pub json: bool,
    pub quiet: bool,
    pub verbose: bool,
}
