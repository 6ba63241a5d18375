use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use zoltar::config::AppConfig;
use zoltar::db::Database;
use zoltar::ingest::{DocumentOutcome, Ingestor};
use zoltar::provider::build_providers;
use zoltar::qdrant_store::QdrantStore;

#[derive(Parser, Debug)]
#[command(name = "ingest")]
#[command(about = "Index the PDF library into the Qdrant collection")]
struct Cli {
    /// Drop the collection and the manifest before indexing.
    #[arg(long, default_value_t = false)]
    rebuild: bool,
    /// Defaults to DATA_DIR/docs.
    #[arg(long)]
    docs_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();

    let config = AppConfig::from_env()?;
    let docs_dir = cli.docs_dir.unwrap_or_else(|| config.docs_dir());

    let db = Database::new(&config).await?;
    let providers = build_providers(&config);
    let qdrant = QdrantStore::new(
        config.qdrant_base_url.clone(),
        config.qdrant_collection.clone(),
    );
    let ingestor = Ingestor::new(config.chunking.clone(), db, providers.embeddings, qdrant);

    let report = ingestor
        .ingest(&docs_dir, cli.rebuild, |doc_id, outcome| match outcome {
            DocumentOutcome::Indexed { chunks } => println!("[indexed] {doc_id} chunks={chunks}"),
            DocumentOutcome::Unchanged => println!("[skipped] {doc_id} unchanged"),
            DocumentOutcome::NoText => println!("[skipped] {doc_id} no extractable text"),
        })
        .await?;

    println!(
        "Ingest complete. indexed={} skipped={} chunks={} collection={}",
        report.indexed(),
        report.skipped(),
        report.chunk_count(),
        config.qdrant_collection
    );

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
