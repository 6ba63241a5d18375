use std::net::SocketAddr;

use anyhow::Result;
use axum::extract::State;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::chat::{ChatService, DEFAULT_RAG_K, DEFAULT_TEACHER_K};
use crate::config::AppConfig;
use crate::db::Database;
use crate::models::{
    Answer, AnswerRequest, AnswerResponse, DocumentRecord, GenerateRequest, GenerateResponse,
    TeacherRequest,
};
use crate::prompts::Tone;

const MAX_TOP_K: usize = 12;
const TEACHER_MODE: &str = "teacher";

#[derive(Clone)]
pub struct AppState {
    pub chat: ChatService,
    pub db: Database,
}

pub async fn run_server(config: AppConfig, chat: ChatService, db: Database) -> Result<()> {
    let app = build_router(AppState { chat, db }, &config);

    let addr: SocketAddr = config.bind_addr.parse()?;
    tracing::info!("listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn build_router(state: AppState, config: &AppConfig) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/generate", post(generate_handler))
        .route("/api/teacher", post(teacher_handler))
        .route("/api/answer", post(answer_handler))
        .route("/api/documents", get(documents_handler))
        .fallback_service(ServeDir::new(&config.frontend_dir))
        .layer(cors_layer(&config.frontend_origin))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origin: &str) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    match origin.trim() {
        "*" | "" => layer.allow_origin(Any),
        explicit => match HeaderValue::from_str(explicit) {
            Ok(value) => layer.allow_origin(value),
            Err(_) => {
                tracing::warn!(origin = explicit, "invalid FRONTEND_ORIGIN; allowing any origin");
                layer.allow_origin(Any)
            }
        },
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

async fn generate_handler(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let question = require_question(&request.question)?;
    let tone = Tone::from_mode(request.mode.as_deref());

    let answer = state.chat.chatbot_simple(question, tone).await;
    Ok(Json(GenerateResponse { text: answer.text }))
}

async fn teacher_handler(
    State(state): State<AppState>,
    Json(request): Json<TeacherRequest>,
) -> Result<Json<Answer>, ApiError> {
    let question = require_question(&request.question)?;
    let k = validate_k(request.k, DEFAULT_TEACHER_K)?;
    let history = request.history.unwrap_or_default();

    let answer = state.chat.chatbot_teacher(question, &history, k).await;
    Ok(Json(answer))
}

async fn answer_handler(
    State(state): State<AppState>,
    Json(request): Json<AnswerRequest>,
) -> Result<Json<AnswerResponse>, ApiError> {
    let question = require_question(&request.question)?;
    let tone = Tone::from_mode(request.mode.as_deref());

    let (answer, mode) = if request.rag {
        let k = validate_k(request.top_k, DEFAULT_TEACHER_K)?;
        let history = request.history.unwrap_or_default();
        let answer = state.chat.chatbot_teacher(question, &history, k).await;
        (answer, TEACHER_MODE)
    } else {
        let k = validate_k(request.top_k, DEFAULT_RAG_K)?;
        let answer = state
            .chat
            .answer_with_rag(question, tone.system_prompt(), k, false)
            .await;
        (answer, tone.as_str())
    };

    Ok(Json(AnswerResponse {
        text: answer.text,
        sources: answer.sources,
        rag: request.rag,
        mode: mode.to_string(),
    }))
}

async fn documents_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<DocumentRecord>>, ApiError> {
    let documents = state.db.list_documents().await?;
    Ok(Json(documents))
}

fn require_question(question: &str) -> Result<&str, ApiError> {
    let trimmed = question.trim();
    if trimmed.is_empty() {
        return Err(ApiError::bad_request("question must not be empty"));
    }
    Ok(trimmed)
}

fn validate_k(k: Option<usize>, default: usize) -> Result<usize, ApiError> {
    match k {
        None => Ok(default),
        Some(k) if (1..=MAX_TOP_K).contains(&k) => Ok(k),
        Some(k) => Err(ApiError::bad_request(format!(
            "top_k must be between 1 and {MAX_TOP_K}, got {k}"
        ))),
    }
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(value: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: value.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}
