//! Test doubles shared by the unit tests.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::config::{
    AppConfig, ChunkingConfig, ModelConfig, ProviderKind, RetrievalConfig, TeacherFallback,
};
use crate::error::{ProviderError, RetrievalError};
use crate::models::{ChatResult, ChunkMetadata, ConversationTurn, DocumentChunk};
use crate::provider::{ChatProvider, EmbeddingProvider};
use crate::qdrant_store::QdrantPayload;
use crate::retrieval::{DocumentSearch, SearchMode};

pub fn retrieval_config() -> RetrievalConfig {
    RetrievalConfig {
        use_mmr: true,
        fetch_k: 24,
        lambda_mult: 0.5,
        score_threshold: 0.55,
        max_chars_total: 6_000,
        max_chars_per_block: 1_200,
        teacher_fallback: TeacherFallback::Canned,
    }
}

pub fn app_config(data_dir: &Path) -> AppConfig {
    AppConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        data_dir: data_dir.to_path_buf(),
        frontend_dir: data_dir.join("frontend"),
        frontend_origin: "*".to_string(),
        openai_api_key: None,
        openai_base_url: "http://127.0.0.1:9/v1".to_string(),
        ollama_base_url: "http://127.0.0.1:9".to_string(),
        qdrant_base_url: "http://127.0.0.1:9".to_string(),
        qdrant_collection: "zoltar_chunks".to_string(),
        models: ModelConfig {
            embeddings_provider: ProviderKind::OpenAi,
            embeddings_model: "text-embedding-3-large".to_string(),
            chat_provider: ProviderKind::OpenAi,
            chat_model: "gpt-4o-mini".to_string(),
            chat_temperature: 0.2,
        },
        retrieval: retrieval_config(),
        chunking: ChunkingConfig {
            chunk_size: 500,
            chunk_overlap: 80,
        },
    }
}

pub fn sample_chunks() -> Vec<DocumentChunk> {
    let chunk = |doc_id: &str, title: &str, page: u32, content: &str| DocumentChunk {
        content: content.to_string(),
        metadata: ChunkMetadata {
            doc_id: Some(doc_id.to_string()),
            title: Some(title.to_string()),
            authors: Some("Autora Ejemplo".to_string()),
            page: Some(page),
            source: Some(doc_id.to_string()),
        },
    };

    vec![
        chunk(
            "evaluacion.pdf",
            "Evaluación formativa",
            3,
            "La evaluación formativa ofrece retroalimentación durante el aprendizaje.",
        ),
        chunk(
            "ubd.pdf",
            "Comprender con UbD",
            10,
            "El diseño inverso comienza por los resultados deseados.",
        ),
        chunk(
            "evaluacion.pdf",
            "Evaluación formativa",
            3,
            "Las rúbricas ayudan a los estudiantes a autoevaluarse.",
        ),
    ]
}

enum SearchBehavior {
    Chunks(Vec<DocumentChunk>),
    IndexNotFound,
    Backend(String),
}

pub struct MockSearch {
    behavior: SearchBehavior,
    calls: AtomicUsize,
    last_k: Mutex<Option<usize>>,
}

impl MockSearch {
    fn with(behavior: SearchBehavior) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
            last_k: Mutex::new(None),
        }
    }

    pub fn returning(chunks: Vec<DocumentChunk>) -> Self {
        Self::with(SearchBehavior::Chunks(chunks))
    }

    pub fn index_not_found() -> Self {
        Self::with(SearchBehavior::IndexNotFound)
    }

    pub fn backend_error(message: &str) -> Self {
        Self::with(SearchBehavior::Backend(message.to_string()))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_k(&self) -> Option<usize> {
        *self.last_k.lock().unwrap()
    }
}

#[async_trait]
impl DocumentSearch for MockSearch {
    async fn search(
        &self,
        _query: &str,
        k: usize,
        _mode: SearchMode,
    ) -> Result<Vec<DocumentChunk>, RetrievalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_k.lock().unwrap() = Some(k);

        match &self.behavior {
            SearchBehavior::Chunks(chunks) => Ok(chunks.iter().take(k).cloned().collect()),
            SearchBehavior::IndexNotFound => {
                Err(RetrievalError::IndexNotFound("zoltar_chunks".to_string()))
            }
            SearchBehavior::Backend(message) => Err(RetrievalError::Backend(message.clone())),
        }
    }
}

pub struct MockChat {
    reply: Result<String, String>,
    calls: AtomicUsize,
    last_messages: Mutex<Vec<ConversationTurn>>,
}

impl MockChat {
    pub fn replying(text: &str) -> Self {
        Self {
            reply: Ok(text.to_string()),
            calls: AtomicUsize::new(0),
            last_messages: Mutex::new(vec![]),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            reply: Err(message.to_string()),
            calls: AtomicUsize::new(0),
            last_messages: Mutex::new(vec![]),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_messages(&self) -> Vec<ConversationTurn> {
        self.last_messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatProvider for MockChat {
    async fn complete(&self, messages: &[ConversationTurn]) -> Result<ChatResult, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_messages.lock().unwrap() = messages.to_vec();

        match &self.reply {
            Ok(text) => Ok(ChatResult {
                content: text.clone(),
                model: Some("mock".to_string()),
                finish_reason: Some("stop".to_string()),
            }),
            Err(message) => Err(ProviderError::Status {
                endpoint: "mock://chat".to_string(),
                status: 429,
                body: message.clone(),
            }),
        }
    }
}

pub struct MockEmbeddings {
    vector: Vec<f32>,
    calls: AtomicUsize,
}

impl MockEmbeddings {
    pub fn new(vector: Vec<f32>) -> Self {
        Self {
            vector,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddings {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.vector.clone())
    }
}

#[derive(Default)]
struct FakeCollection {
    vector_size: Option<usize>,
    points: Vec<Value>,
    log: Vec<String>,
}

/// In-process stand-in for the Qdrant REST endpoints the store uses.
/// Every mutating call is appended to `log()` as `create`, `drop`,
/// `upsert:<n>` or `delete:<doc_id>`.
#[derive(Clone, Default)]
pub struct FakeQdrant {
    state: Arc<Mutex<FakeCollection>>,
}

impl FakeQdrant {
    /// Serves on an ephemeral local port and returns the base URL.
    pub async fn spawn() -> (Self, String) {
        let fake = Self::default();
        let app = Router::new()
            .route(
                "/collections/:name",
                get(fake_collection_info)
                    .put(fake_create_collection)
                    .delete(fake_drop_collection),
            )
            .route("/collections/:name/points", put(fake_upsert))
            .route("/collections/:name/points/delete", post(fake_delete))
            .route("/collections/:name/points/search", post(fake_search))
            .with_state(fake.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (fake, format!("http://{addr}"))
    }

    pub fn create_collection(&self, vector_size: usize) {
        self.state.lock().unwrap().vector_size = Some(vector_size);
    }

    pub fn insert(&self, vector: Vec<f32>, chunk: &DocumentChunk) {
        let mut state = self.state.lock().unwrap();
        let id = state.points.len();
        state.points.push(json!({
            "id": id,
            "vector": vector,
            "payload": QdrantPayload::from_chunk(chunk),
        }));
    }

    pub fn exists(&self) -> bool {
        self.state.lock().unwrap().vector_size.is_some()
    }

    pub fn point_count(&self) -> usize {
        self.state.lock().unwrap().points.len()
    }

    pub fn log(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }
}

fn not_found() -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "status": { "error": "Not found: Collection doesn't exist!" } })),
    )
}

fn ok(result: Value) -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "result": result, "status": "ok" })))
}

async fn fake_collection_info(State(fake): State<FakeQdrant>) -> (StatusCode, Json<Value>) {
    let state = fake.state.lock().unwrap();
    match state.vector_size {
        None => not_found(),
        Some(size) => ok(json!({
            "status": "green",
            "points_count": state.points.len(),
            "config": { "params": { "vectors": { "size": size, "distance": "Cosine" } } }
        })),
    }
}

async fn fake_create_collection(
    State(fake): State<FakeQdrant>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let mut state = fake.state.lock().unwrap();
    state.vector_size = body["vectors"]["size"].as_u64().map(|size| size as usize);
    state.log.push("create".to_string());
    ok(json!(true))
}

async fn fake_drop_collection(State(fake): State<FakeQdrant>) -> (StatusCode, Json<Value>) {
    let mut state = fake.state.lock().unwrap();
    if state.vector_size.take().is_none() {
        return not_found();
    }
    state.points.clear();
    state.log.push("drop".to_string());
    ok(json!(true))
}

async fn fake_upsert(
    State(fake): State<FakeQdrant>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let mut state = fake.state.lock().unwrap();
    if state.vector_size.is_none() {
        return not_found();
    }
    let points = body["points"].as_array().cloned().unwrap_or_default();
    state.log.push(format!("upsert:{}", points.len()));
    state.points.extend(points);
    ok(json!({ "status": "completed" }))
}

async fn fake_delete(
    State(fake): State<FakeQdrant>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let mut state = fake.state.lock().unwrap();
    if state.vector_size.is_none() {
        return not_found();
    }
    let doc_id = body["filter"]["must"][0]["match"]["value"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    state.points.retain(|point| point["payload"]["doc_id"] != doc_id.as_str());
    state.log.push(format!("delete:{doc_id}"));
    ok(json!({ "status": "completed" }))
}

async fn fake_search(
    State(fake): State<FakeQdrant>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let state = fake.state.lock().unwrap();
    if state.vector_size.is_none() {
        return not_found();
    }

    let query = as_vector(&body["vector"]);
    let limit = body["limit"].as_u64().unwrap_or(10) as usize;
    let threshold = body["score_threshold"].as_f64().map(|t| t as f32);
    let with_vector = body["with_vector"].as_bool().unwrap_or(false);

    let mut scored: Vec<(f32, &Value)> = state
        .points
        .iter()
        .map(|point| (cosine(&query, &as_vector(&point["vector"])), point))
        .filter(|(score, _)| threshold.map_or(true, |t| *score >= t))
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));

    let result: Vec<Value> = scored
        .into_iter()
        .take(limit)
        .map(|(score, point)| {
            let mut hit = json!({
                "id": point["id"],
                "version": 0,
                "score": score,
                "payload": point["payload"],
            });
            if with_vector {
                hit["vector"] = point["vector"].clone();
            }
            hit
        })
        .collect();
    ok(json!(result))
}

fn as_vector(value: &Value) -> Vec<f32> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_f64().map(|f| f as f32))
                .collect()
        })
        .unwrap_or_default()
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm = |v: &[f32]| v.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denom = norm(a) * norm(b);
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}
