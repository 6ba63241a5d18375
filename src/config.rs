use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Ollama,
}

impl FromStr for ProviderKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "ollama" => Ok(ProviderKind::Ollama),
            other => bail!("unknown provider '{other}', expected 'openai' or 'ollama'"),
        }
    }
}

/// What the teacher persona does when retrieval fails or finds nothing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TeacherFallback {
    /// Return the canned "no fragments found" answer without calling the model.
    Canned,
    /// Call the model anyway with a "no relevant documents" notice.
    Model,
}

impl FromStr for TeacherFallback {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "canned" => Ok(TeacherFallback::Canned),
            "model" => Ok(TeacherFallback::Model),
            other => bail!("unknown teacher fallback '{other}', expected 'canned' or 'model'"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ModelConfig {
    pub embeddings_provider: ProviderKind,
    pub embeddings_model: String,
    pub chat_provider: ProviderKind,
    pub chat_model: String,
    pub chat_temperature: f32,
}

#[derive(Clone, Debug)]
pub struct RetrievalConfig {
    pub use_mmr: bool,
    pub fetch_k: usize,
    pub lambda_mult: f32,
    pub score_threshold: f32,
    pub max_chars_total: usize,
    pub max_chars_per_block: usize,
    pub teacher_fallback: TeacherFallback,
}

#[derive(Clone, Debug)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bind_addr: String,
    pub data_dir: PathBuf,
    pub frontend_dir: PathBuf,
    pub frontend_origin: String,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub ollama_base_url: String,
    pub qdrant_base_url: String,
    pub qdrant_collection: String,
    pub models: ModelConfig,
    pub retrieval: RetrievalConfig,
    pub chunking: ChunkingConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let data_dir = env::var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));

        let embeddings_provider: ProviderKind = env::var("EMBEDDINGS_PROVIDER")
            .unwrap_or_else(|_| "openai".to_string())
            .parse()?;
        let default_embeddings_model = match embeddings_provider {
            ProviderKind::OpenAi => "text-embedding-3-large",
            ProviderKind::Ollama => "nomic-embed-text",
        };

        Ok(Self {
            bind_addr: env::var("ZOLTAR_BIND").unwrap_or_else(|_| "127.0.0.1:8000".to_string()),
            data_dir,
            frontend_dir: env::var("FRONTEND_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./frontend")),
            frontend_origin: env::var("FRONTEND_ORIGIN").unwrap_or_else(|_| "*".to_string()),
            openai_api_key: env::var("OPENAI_API_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty()),
            openai_base_url: env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            ollama_base_url: env::var("OLLAMA_BASE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:11434".to_string()),
            qdrant_base_url: env::var("QDRANT_BASE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:6333".to_string()),
            qdrant_collection: env::var("QDRANT_COLLECTION")
                .unwrap_or_else(|_| "zoltar_chunks".to_string()),
            models: ModelConfig {
                embeddings_provider,
                embeddings_model: env::var("EMBEDDINGS_MODEL")
                    .unwrap_or_else(|_| default_embeddings_model.to_string()),
                chat_provider: env::var("CHAT_PROVIDER")
                    .unwrap_or_else(|_| "openai".to_string())
                    .parse()?,
                chat_model: env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
                chat_temperature: env_parse("CHAT_TEMPERATURE", 0.2),
            },
            retrieval: RetrievalConfig {
                use_mmr: env_parse("RETRIEVAL_USE_MMR", true),
                fetch_k: env_parse("RETRIEVAL_FETCH_K", 24),
                lambda_mult: env_parse("RETRIEVAL_LAMBDA_MULT", 0.5f32).clamp(0.0, 1.0),
                score_threshold: env_parse("RETRIEVAL_SCORE_THRESHOLD", 0.55),
                max_chars_total: env_parse("CONTEXT_MAX_CHARS_TOTAL", 6_000),
                max_chars_per_block: env_parse("CONTEXT_MAX_CHARS_PER_BLOCK", 1_200),
                teacher_fallback: env::var("TEACHER_FALLBACK")
                    .unwrap_or_else(|_| "canned".to_string())
                    .parse()?,
            },
            chunking: ChunkingConfig {
                chunk_size: env_parse("CHUNK_SIZE", 500),
                chunk_overlap: env_parse("CHUNK_OVERLAP", 80),
            },
        })
    }

    pub fn docs_dir(&self) -> PathBuf {
        self.data_dir.join("docs")
    }

    pub fn sqlite_dsn(&self) -> String {
        format!("sqlite://{}", self.data_dir.join("zoltar.sqlite3").display())
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
