use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;

use carebot_rag::ingest::load_healthcare_dir;
use carebot_server::{build_store, init_tracing, load_config};

/// Bulk-load folders of scraped healthcare JSON into the vector store.
#[derive(Parser)]
#[command(name = "carebot-load")]
struct Cli {
    /// Folders to walk; every `.json` file must hold a top-level array
    #[arg(required = true)]
    dirs: Vec<PathBuf>,

    /// JSON config file; environment variables override it
    #[arg(short, long, env = "CAREBOT_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = load_config(cli.config.as_deref())?;
    if !config.astra.is_configured() {
        anyhow::bail!("ASTRA_DB_APPLICATION_TOKEN and ASTRA_DB_ID must be set to bulk-load data");
    }
    let store = build_store(&config).await?;

    let mut failed = 0;
    for dir in &cli.dirs {
        let summary = load_healthcare_dir(store.as_ref(), dir)
            .await
            .with_context(|| format!("Failed to load {}", dir.display()))?;
        tracing::info!(
            dir = %dir.display(),
            files_loaded = summary.files_loaded,
            files_failed = summary.files_failed,
            documents = summary.documents,
            "Folder loaded"
        );
        failed += summary.files_failed;
    }

    if failed > 0 {
        tracing::warn!(files_failed = failed, "Some files could not be loaded");
    }
    Ok(())
}
