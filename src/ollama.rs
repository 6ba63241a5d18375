use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::models::{ChatResult, ConversationTurn};
use crate::provider::{ChatProvider, EmbeddingProvider};

#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn embeddings(self, model: impl Into<String>) -> OllamaEmbeddings {
        OllamaEmbeddings {
            client: self,
            model: model.into(),
        }
    }

    pub fn chat(self, model: impl Into<String>, temperature: f32) -> OllamaChat {
        OllamaChat {
            client: self,
            model: model.into(),
            temperature,
        }
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, ProviderError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let endpoint = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&endpoint)
            .json(body)
            .send()
            .await
            .map_err(|source| ProviderError::Http {
                endpoint: endpoint.clone(),
                source,
            })?;

        if response.status() != StatusCode::OK {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                endpoint,
                status,
                body: normalize_err_body(&body),
            });
        }

        response
            .json::<R>()
            .await
            .map_err(|err| ProviderError::Decode {
                endpoint,
                message: err.to_string(),
            })
    }

    async fn embed_with_endpoint_fallback(
        &self,
        model: &str,
        text: &str,
    ) -> Result<Vec<f32>, ProviderError> {
        // Newer Ollama releases use /api/embed, older ones only /api/embeddings.
        match self.embed_modern(model, text).await {
            Ok(vector) => Ok(vector),
            Err(modern_err) => match self.embed_legacy(model, text).await {
                Ok(vector) => Ok(vector),
                Err(legacy_err) => Err(ProviderError::EmptyResponse(format!(
                    "ollama embedding failed via /api/embed and /api/embeddings. \
                     modern error: {modern_err}; legacy error: {legacy_err}; \
                     ensure the embedding model is pulled (e.g. `ollama pull {model}`)"
                ))),
            },
        }
    }

    async fn embed_modern(&self, model: &str, text: &str) -> Result<Vec<f32>, ProviderError> {
        #[derive(Serialize)]
        struct EmbedReq<'a> {
            model: &'a str,
            input: &'a str,
        }

        #[derive(Deserialize)]
        struct EmbedResp {
            embeddings: Vec<Vec<f32>>,
        }

        let response: EmbedResp = self
            .post_json("/api/embed", &EmbedReq { model, input: text })
            .await?;

        response.embeddings.into_iter().next().ok_or_else(|| {
            ProviderError::EmptyResponse("ollama /api/embed returned empty embeddings array".into())
        })
    }

    async fn embed_legacy(&self, model: &str, text: &str) -> Result<Vec<f32>, ProviderError> {
        #[derive(Serialize)]
        struct EmbeddingReq<'a> {
            model: &'a str,
            prompt: &'a str,
        }

        #[derive(Deserialize)]
        struct EmbeddingResp {
            embedding: Vec<f32>,
        }

        let response: EmbeddingResp = self
            .post_json(
                "/api/embeddings",
                &EmbeddingReq {
                    model,
                    prompt: text,
                },
            )
            .await?;

        Ok(response.embedding)
    }
}

#[derive(Clone)]
pub struct OllamaEmbeddings {
    client: OllamaClient,
    model: String,
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbeddings {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let input = text.trim();
        if input.is_empty() {
            return Err(ProviderError::EmptyResponse(
                "cannot embed empty text input".to_string(),
            ));
        }

        let err = match self
            .client
            .embed_with_endpoint_fallback(&self.model, input)
            .await
        {
            Ok(vector) => return Ok(vector),
            Err(err) if is_context_length_error(&err) => err,
            Err(err) => return Err(err),
        };

        let word_count = input.split_whitespace().count();
        let mut last_err = err;
        for max_words in [1400usize, 1000, 800, 600, 450, 320, 240, 180, 120] {
            if word_count <= max_words {
                continue;
            }

            let truncated = truncate_to_word_limit(input, max_words);
            match self
                .client
                .embed_with_endpoint_fallback(&self.model, &truncated)
                .await
            {
                Ok(vector) => return Ok(vector),
                Err(next_err) if is_context_length_error(&next_err) => last_err = next_err,
                Err(next_err) => return Err(next_err),
            }
        }

        Err(ProviderError::EmptyResponse(format!(
            "ollama embedding exceeded context length even after adaptive truncation \
             (original_words={word_count}). last error: {last_err}"
        )))
    }
}

#[derive(Clone)]
pub struct OllamaChat {
    client: OllamaClient,
    model: String,
    temperature: f32,
}

#[async_trait]
impl ChatProvider for OllamaChat {
    async fn complete(&self, messages: &[ConversationTurn]) -> Result<ChatResult, ProviderError> {
        #[derive(Serialize)]
        struct ChatReq<'a> {
            model: &'a str,
            messages: &'a [ConversationTurn],
            stream: bool,
            options: ChatOptions,
        }

        #[derive(Serialize)]
        struct ChatOptions {
            temperature: f32,
        }

        #[derive(Deserialize)]
        struct ChatResp {
            #[serde(default)]
            model: Option<String>,
            message: ChatRespMessage,
            #[serde(default)]
            done_reason: Option<String>,
        }

        #[derive(Deserialize)]
        struct ChatRespMessage {
            #[serde(default)]
            content: String,
        }

        let response: ChatResp = self
            .client
            .post_json(
                "/api/chat",
                &ChatReq {
                    model: &self.model,
                    messages,
                    stream: false,
                    options: ChatOptions {
                        temperature: self.temperature,
                    },
                },
            )
            .await?;

        Ok(ChatResult {
            content: response.message.content.trim().to_string(),
            model: response.model,
            finish_reason: response.done_reason,
        })
    }
}

fn normalize_err_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<empty body>".to_string();
    }

    if let Ok(json) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(err) = json.get("error").and_then(|v| v.as_str()) {
            return err.to_string();
        }
    }

    trimmed.to_string()
}

fn is_context_length_error(err: &ProviderError) -> bool {
    let msg = err.to_string().to_ascii_lowercase();
    msg.contains("input length exceeds the context length")
        || (msg.contains("context length") && msg.contains("input length"))
}

fn truncate_to_word_limit(text: &str, max_words: usize) -> String {
    text.split_whitespace()
        .take(max_words)
        .collect::<Vec<_>>()
        .join(" ")
}
