use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChunkMetadata {
    pub doc_id: Option<String>,
    pub title: Option<String>,
    pub authors: Option<String>,
    pub page: Option<u32>,
    pub source: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentChunk {
    pub content: String,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormattedContext {
    pub text: String,
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Normalized output of a chat completion, whatever the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatResult {
    pub content: String,
    pub model: Option<String>,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<String>,
}

impl Answer {
    pub fn without_sources(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sources: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    #[serde(alias = "text")]
    pub question: String,
    #[serde(default)]
    pub mode: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeacherRequest {
    #[serde(alias = "text")]
    pub question: String,
    #[serde(default)]
    pub history: Option<String>,
    #[serde(default)]
    pub k: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerRequest {
    #[serde(alias = "text")]
    pub question: String,
    #[serde(default)]
    pub rag: bool,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub history: Option<String>,
    #[serde(default)]
    pub top_k: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerResponse {
    pub text: String,
    pub sources: Vec<String>,
    pub rag: bool,
    pub mode: String,
}

/// One ingested PDF as recorded in the manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentRecord {
    pub doc_id: String,
    pub sha256: String,
    pub title: String,
    pub authors: String,
    pub page_count: i64,
    pub chunk_count: i64,
    pub ingested_at: DateTime<Utc>,
}
