use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{AppConfig, ProviderKind};
use crate::error::ProviderError;
use crate::models::{ChatResult, ConversationTurn};
use crate::ollama::OllamaClient;
use crate::openai::OpenAiClient;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;
}

#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn complete(&self, messages: &[ConversationTurn]) -> Result<ChatResult, ProviderError>;
}

#[derive(Clone)]
pub struct Providers {
    pub embeddings: Arc<dyn EmbeddingProvider>,
    pub chat: Arc<dyn ChatProvider>,
}

pub fn build_providers(config: &AppConfig) -> Providers {
    let openai = || {
        OpenAiClient::new(
            config.openai_base_url.clone(),
            config.openai_api_key.clone(),
        )
    };
    let ollama = || OllamaClient::new(config.ollama_base_url.clone());
    let models = &config.models;

    let embeddings: Arc<dyn EmbeddingProvider> = match models.embeddings_provider {
        ProviderKind::OpenAi => Arc::new(openai().embeddings(models.embeddings_model.clone())),
        ProviderKind::Ollama => Arc::new(ollama().embeddings(models.embeddings_model.clone())),
    };

    let chat: Arc<dyn ChatProvider> = match models.chat_provider {
        ProviderKind::OpenAi => {
            Arc::new(openai().chat(models.chat_model.clone(), models.chat_temperature))
        }
        ProviderKind::Ollama => {
            Arc::new(ollama().chat(models.chat_model.clone(), models.chat_temperature))
        }
    };

    if (models.embeddings_provider == ProviderKind::OpenAi
        || models.chat_provider == ProviderKind::OpenAi)
        && config.openai_api_key.is_none()
    {
        tracing::warn!("OPENAI_API_KEY is not set; OpenAI calls will fail until it is provided");
    }

    Providers { embeddings, chat }
}
