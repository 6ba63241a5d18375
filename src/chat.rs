use std::sync::Arc;

use crate::config::{RetrievalConfig, TeacherFallback};
use crate::context::format_context;
use crate::error::RetrievalError;
use crate::models::{Answer, ConversationTurn, DocumentChunk, FormattedContext};
use crate::prompts::{
    build_teacher_prompt, grounded_messages, simple_messages, with_no_documents_notice, Tone,
};
use crate::provider::ChatProvider;
use crate::retrieval::{DocumentSearch, SearchMode};

pub const DEFAULT_RAG_K: usize = 5;
pub const DEFAULT_TEACHER_K: usize = 6;

pub const RETRIEVAL_FAILED_MESSAGE: &str = "No se pudo recuperar información desde el índice.";
pub const INSUFFICIENT_CONTEXT_MESSAGE: &str =
    "No encontré información suficiente en los documentos indexados para responder a tu pregunta.";
pub const TEACHER_NO_CONTEXT_MESSAGE: &str = "Soy un asistente educativo con acceso a documentos. \
No encontré fragmentos relevantes para tu consulta.\n\n\
👉 Puedes intentar con preguntas más específicas como:\n\
- '¿Cómo se puede usar la IA en evaluación formativa?'\n\
- 'Ventajas de los chatbots educativos en secundaria'\n\n\
Mis respuestas se basan exclusivamente en los documentos cargados.";
pub const EMPTY_ANSWER_MESSAGE: &str = "⚠️ Respuesta vacía";

/// Where the retrieval step of one request ended up.
#[derive(Debug)]
enum RetrievalOutcome {
    Failed(RetrievalError),
    NoContext,
    HasContext(Vec<DocumentChunk>),
}

impl From<Result<Vec<DocumentChunk>, RetrievalError>> for RetrievalOutcome {
    fn from(result: Result<Vec<DocumentChunk>, RetrievalError>) -> Self {
        match result {
            Ok(chunks) if chunks.is_empty() => RetrievalOutcome::NoContext,
            Ok(chunks) => RetrievalOutcome::HasContext(chunks),
            Err(RetrievalError::EmptyResult) => RetrievalOutcome::NoContext,
            Err(err) => RetrievalOutcome::Failed(err),
        }
    }
}

#[derive(Clone)]
pub struct ChatService {
    search: Arc<dyn DocumentSearch>,
    chat: Arc<dyn ChatProvider>,
    retrieval: RetrievalConfig,
}

impl ChatService {
    pub fn new(
        retrieval: RetrievalConfig,
        search: Arc<dyn DocumentSearch>,
        chat: Arc<dyn ChatProvider>,
    ) -> Self {
        Self {
            search,
            chat,
            retrieval,
        }
    }

    /// Plain persona: no retrieval, the question goes straight to the model.
    pub async fn chatbot_simple(&self, question: &str, tone: Tone) -> Answer {
        tracing::debug!(tone = tone.as_str(), "simple persona request");
        self.respond(simple_messages(tone, question), vec![]).await
    }

    /// Grounded answer with the given system prompt. Without `allow_fallback`
    /// a failed or empty retrieval ends the request without a model call.
    pub async fn answer_with_rag(
        &self,
        question: &str,
        system_prompt: &str,
        k: usize,
        allow_fallback: bool,
    ) -> Answer {
        match self.retrieve(question, k).await {
            RetrievalOutcome::HasContext(chunks) => {
                let context = self.format(&chunks);
                let messages = grounded_messages(system_prompt, &context.text, question);
                self.respond(messages, context.sources).await
            }
            RetrievalOutcome::Failed(_) if !allow_fallback => {
                Answer::without_sources(RETRIEVAL_FAILED_MESSAGE)
            }
            RetrievalOutcome::NoContext if !allow_fallback => {
                Answer::without_sources(INSUFFICIENT_CONTEXT_MESSAGE)
            }
            RetrievalOutcome::Failed(_) | RetrievalOutcome::NoContext => {
                tracing::info!("no documents for question; answering with fallback notice");
                let messages = vec![
                    ConversationTurn::system(system_prompt),
                    ConversationTurn::user(with_no_documents_notice(question)),
                ];
                self.respond(messages, vec![]).await
            }
        }
    }

    /// Teacher persona. A failed or empty retrieval is handled by the
    /// configured `TeacherFallback`, independently of `answer_with_rag`'s flag.
    pub async fn chatbot_teacher(&self, question: &str, history: &str, k: usize) -> Answer {
        match self.retrieve(question, k).await {
            RetrievalOutcome::HasContext(chunks) => {
                let context = self.format(&chunks);
                let prompt = build_teacher_prompt(&context.text, question, history);
                self.respond(vec![ConversationTurn::user(prompt)], context.sources)
                    .await
            }
            RetrievalOutcome::Failed(_) | RetrievalOutcome::NoContext => {
                match self.retrieval.teacher_fallback {
                    TeacherFallback::Canned => Answer::without_sources(TEACHER_NO_CONTEXT_MESSAGE),
                    TeacherFallback::Model => {
                        let prompt = build_teacher_prompt(
                            "(sin fragmentos recuperados)",
                            &with_no_documents_notice(question),
                            history,
                        );
                        self.respond(vec![ConversationTurn::user(prompt)], vec![])
                            .await
                    }
                }
            }
        }
    }

    async fn retrieve(&self, question: &str, k: usize) -> RetrievalOutcome {
        let mode = SearchMode::from_config(&self.retrieval);
        let outcome = RetrievalOutcome::from(self.search.search(question, k, mode).await);

        match &outcome {
            RetrievalOutcome::Failed(RetrievalError::IndexNotFound(collection)) => {
                tracing::warn!(%collection, "vector index not found");
            }
            RetrievalOutcome::Failed(err) => tracing::error!("retrieval failed: {err}"),
            RetrievalOutcome::NoContext => tracing::info!(k, "retrieval returned no chunks"),
            RetrievalOutcome::HasContext(chunks) => {
                tracing::debug!(k, chunks = chunks.len(), "retrieval found context")
            }
        }

        outcome
    }

    fn format(&self, chunks: &[DocumentChunk]) -> FormattedContext {
        format_context(
            chunks,
            true,
            self.retrieval.max_chars_total,
            self.retrieval.max_chars_per_block,
        )
    }

    /// Model failures degrade to an error-text answer instead of propagating.
    async fn respond(&self, messages: Vec<ConversationTurn>, sources: Vec<String>) -> Answer {
        match self.chat.complete(&messages).await {
            Ok(result) if result.content.trim().is_empty() => {
                tracing::warn!(model = ?result.model, "model returned an empty answer");
                Answer {
                    text: EMPTY_ANSWER_MESSAGE.to_string(),
                    sources,
                }
            }
            Ok(result) => Answer {
                text: result.content,
                sources,
            },
            Err(err) => {
                tracing::error!("chat completion failed: {err}");
                Answer::without_sources(format!("Error al generar respuesta: {err}"))
            }
        }
    }
}
