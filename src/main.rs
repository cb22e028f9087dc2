use anyhow::Result;
use clap::Parser;

mod cli;
mod config;
mod entities;
mod index;
mod ingest;
mod recall_log;
mod reflect;
mod remember;
mod scoring;
mod search;
mod storage;
mod temporal;
mod types;

use cli::Cli;

/// Point `ORT_DYLIB_PATH` at a `libonnxruntime` shared library so the
/// `ort` crate can dlopen it. A missing library just means semantic
/// features stay disabled.
fn ensure_ort_dylib() {
    if std::env::var_os("ORT_DYLIB_PATH").is_some() {
        return;
    }
    if let Some(path) = find_ort_dylib() {
        std::env::set_var("ORT_DYLIB_PATH", &path);
    }
}

/// Candidate locations, most specific first: next to the binary (release
/// bundle layout), the engram model cache (installers drop the runtime
/// beside the models), then system library paths.
fn find_ort_dylib() -> Option<std::path::PathBuf> {
    let mut dirs: Vec<std::path::PathBuf> = Vec::new();
    if let Ok(exe) = std::env::current_exe() {
        if let Some(exe_dir) = exe.parent() {
            dirs.push(exe_dir.join("lib"));
            dirs.push(exe_dir.to_path_buf());
        }
    }
    if let Ok(model_dir) = index::embedder::Embedder::model_dir(index::embedder::DEFAULT_MODEL) {
        // model_dir is <cache>/models/<name>; the runtime lives at
        // <cache>/onnxruntime when installed alongside the models.
        if let Some(cache_root) = model_dir.parent().and_then(|p| p.parent()) {
            dirs.push(cache_root.join("onnxruntime"));
        }
    }
    dirs.push("/usr/local/lib".into());
    dirs.push("/usr/lib".into());

    dirs.iter().find_map(|dir| {
        std::fs::read_dir(dir)
            .ok()?
            .flatten()
            .map(|entry| entry.path())
            .find(|path| path.is_file() && is_ort_library(path))
    })
}

fn is_ort_library(path: &std::path::Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if name.contains("providers") {
        return false;
    }
    if cfg!(target_os = "macos") {
        name.starts_with("libonnxruntime") && name.contains(".dylib")
    } else {
        name.starts_with("libonnxruntime.so")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    ensure_ort_dylib();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();
    cli.run().await
}
