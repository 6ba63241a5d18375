use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use zoltar::chat::{ChatService, DEFAULT_RAG_K, DEFAULT_TEACHER_K};
use zoltar::config::AppConfig;
use zoltar::models::Answer;
use zoltar::prompts::Tone;
use zoltar::provider::build_providers;
use zoltar::qdrant_store::QdrantStore;
use zoltar::retrieval::Retriever;

#[derive(Parser, Debug)]
#[command(name = "ask")]
#[command(about = "Ask one question to both personas from the terminal")]
struct Cli {
    question: String,
    #[arg(long, default_value = "")]
    history: String,
    /// Chunks to retrieve; defaults to 5 for Zoltar and 6 for the teacher.
    #[arg(long)]
    k: Option<usize>,
    #[arg(long, default_value = "engineered")]
    mode: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();

    if cli.question.trim().is_empty() {
        anyhow::bail!("question must not be empty");
    }
    let tone: Tone = cli
        .mode
        .parse()
        .map_err(|_| anyhow::anyhow!("unknown mode '{}'; use baseline or engineered", cli.mode))?;

    let config = AppConfig::from_env()?;
    let providers = build_providers(&config);
    let qdrant = QdrantStore::new(
        config.qdrant_base_url.clone(),
        config.qdrant_collection.clone(),
    );
    let retriever = Retriever::new(qdrant, providers.embeddings.clone());
    let chat = ChatService::new(config.retrieval.clone(), Arc::new(retriever), providers.chat);

    let grounded = chat
        .answer_with_rag(
            &cli.question,
            tone.system_prompt(),
            cli.k.unwrap_or(DEFAULT_RAG_K),
            false,
        )
        .await;
    print_answer(&format!("Zoltar ({})", tone.as_str()), &grounded);

    let teacher = chat
        .chatbot_teacher(
            &cli.question,
            &cli.history,
            cli.k.unwrap_or(DEFAULT_TEACHER_K),
        )
        .await;
    print_answer("Maestro", &teacher);

    Ok(())
}

fn print_answer(label: &str, answer: &Answer) {
    println!("=== {label} ===");
    println!("{}", answer.text.trim());
    if !answer.sources.is_empty() {
        println!("\nFuentes:");
        for source in &answer.sources {
            println!("- {source}");
        }
    }
    println!();
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
