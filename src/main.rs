use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use zoltar::chat::ChatService;
use zoltar::db::Database;
use zoltar::provider::build_providers;
use zoltar::qdrant_store::QdrantStore;
use zoltar::retrieval::Retriever;
use zoltar::{run_server, AppConfig};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    let db = Database::new(&config).await?;
    let providers = build_providers(&config);

    let qdrant = QdrantStore::new(
        config.qdrant_base_url.clone(),
        config.qdrant_collection.clone(),
    );
    let retriever = Retriever::new(qdrant, providers.embeddings.clone());

    let chat = ChatService::new(
        config.retrieval.clone(),
        Arc::new(retriever),
        providers.chat.clone(),
    );

    run_server(config, chat, db).await
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
