use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::models::{ChatResult, ConversationTurn};
use crate::provider::{ChatProvider, EmbeddingProvider};

#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    pub fn embeddings(self, model: impl Into<String>) -> OpenAiEmbeddings {
        OpenAiEmbeddings {
            client: self,
            model: model.into(),
        }
    }

    pub fn chat(self, model: impl Into<String>, temperature: f32) -> OpenAiChat {
        OpenAiChat {
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
        let api_key = self.api_key.as_deref().ok_or(ProviderError::MissingApiKey)?;
        let endpoint = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(api_key)
            .json(body)
            .send()
            .await
            .map_err(|source| ProviderError::Http {
                endpoint: endpoint.clone(),
                source,
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|source| ProviderError::Http {
                endpoint: endpoint.clone(),
                source,
            })?;

        if !status.is_success() {
            return Err(ProviderError::Status {
                endpoint,
                status: status.as_u16(),
                body: normalize_err_body(&text),
            });
        }

        serde_json::from_str(&text).map_err(|err| ProviderError::Decode {
            endpoint,
            message: err.to_string(),
        })
    }
}

#[derive(Clone)]
pub struct OpenAiEmbeddings {
    client: OpenAiClient,
    model: String,
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddings {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        #[derive(Serialize)]
        struct EmbeddingReq<'a> {
            model: &'a str,
            input: &'a str,
        }

        #[derive(Deserialize)]
        struct EmbeddingResp {
            data: Vec<EmbeddingData>,
        }

        #[derive(Deserialize)]
        struct EmbeddingData {
            embedding: Vec<f32>,
        }

        let input = text.trim();
        if input.is_empty() {
            return Err(ProviderError::EmptyResponse(
                "cannot embed empty text input".to_string(),
            ));
        }

        let response: EmbeddingResp = self
            .client
            .post_json(
                "/embeddings",
                &EmbeddingReq {
                    model: &self.model,
                    input,
                },
            )
            .await?;

        response
            .data
            .into_iter()
            .next()
            .map(|data| data.embedding)
            .ok_or_else(|| {
                ProviderError::EmptyResponse("openai /embeddings returned no vectors".to_string())
            })
    }
}

#[derive(Clone)]
pub struct OpenAiChat {
    client: OpenAiClient,
    model: String,
    temperature: f32,
}

#[derive(Serialize)]
struct CompletionReq<'a> {
    model: &'a str,
    messages: &'a [ConversationTurn],
    temperature: f32,
}

#[derive(Deserialize)]
struct CompletionResp {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<MessageContent>,
    #[serde(default)]
    refusal: Option<String>,
}

/// Chat content is either a plain string or a list of typed parts.
#[derive(Deserialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Deserialize)]
struct ContentPart {
    #[serde(default)]
    text: Option<String>,
}

impl MessageContent {
    fn into_text(self) -> String {
        match self {
            MessageContent::Text(text) => text,
            MessageContent::Parts(parts) => parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

fn into_chat_result(response: CompletionResp) -> Result<ChatResult, ProviderError> {
    let choice = response.choices.into_iter().next().ok_or_else(|| {
        ProviderError::EmptyResponse("openai /chat/completions returned no choices".to_string())
    })?;

    let content = match (choice.message.content, choice.message.refusal) {
        (Some(content), _) => content.into_text(),
        (None, Some(refusal)) => refusal,
        (None, None) => String::new(),
    };

    Ok(ChatResult {
        content: content.trim().to_string(),
        model: response.model,
        finish_reason: choice.finish_reason,
    })
}

#[async_trait]
impl ChatProvider for OpenAiChat {
    async fn complete(&self, messages: &[ConversationTurn]) -> Result<ChatResult, ProviderError> {
        let response: CompletionResp = self
            .client
            .post_json(
                "/chat/completions",
                &CompletionReq {
                    model: &self.model,
                    messages,
                    temperature: self.temperature,
                },
            )
            .await?;

        into_chat_result(response)
    }
}

fn normalize_err_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<empty body>".to_string();
    }

    if let Ok(json) = serde_json::from_str::<serde_json::Value>(trimmed) {
        let message = json
            .get("error")
            .and_then(|err| err.get("message").or(Some(err)))
            .and_then(|v| v.as_str());
        if let Some(message) = message {
            return message.to_string();
        }
    }

    trimmed.to_string()
}
