use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;

use crate::config::RetrievalConfig;
use crate::error::RetrievalError;
use crate::models::DocumentChunk;
use crate::provider::EmbeddingProvider;
use crate::qdrant_store::{IndexHandle, QdrantStore, VectorHit};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SearchMode {
    Similarity,
    /// `lambda_mult` 1.0 ranks purely by relevance, 0.0 purely by diversity.
    Mmr { fetch_k: usize, lambda_mult: f32 },
    Threshold { score_threshold: f32 },
}

impl SearchMode {
    pub fn from_config(config: &RetrievalConfig) -> Self {
        if config.use_mmr {
            SearchMode::Mmr {
                fetch_k: config.fetch_k,
                lambda_mult: config.lambda_mult,
            }
        } else {
            SearchMode::Threshold {
                score_threshold: config.score_threshold,
            }
        }
    }
}

#[async_trait]
pub trait DocumentSearch: Send + Sync {
    async fn search(
        &self,
        query: &str,
        k: usize,
        mode: SearchMode,
    ) -> Result<Vec<DocumentChunk>, RetrievalError>;
}

#[derive(Clone)]
pub struct Retriever {
    store: QdrantStore,
    embeddings: Arc<dyn EmbeddingProvider>,
    handle: Arc<OnceCell<IndexHandle>>,
}

impl Retriever {
    pub fn new(store: QdrantStore, embeddings: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            store,
            embeddings,
            handle: Arc::new(OnceCell::new()),
        }
    }

    /// Opens the index once and caches the handle; until the collection
    /// exists every call re-checks so a later ingest is picked up.
    async fn index(&self) -> Result<&IndexHandle, RetrievalError> {
        self.handle
            .get_or_try_init(|| async {
                let handle = self.store.open().await?;
                tracing::info!(
                    collection = %handle.collection,
                    vector_size = ?handle.vector_size,
                    points = ?handle.points_count,
                    "opened vector index"
                );
                Ok::<_, RetrievalError>(handle)
            })
            .await
    }
}

#[async_trait]
impl DocumentSearch for Retriever {
    async fn search(
        &self,
        query: &str,
        k: usize,
        mode: SearchMode,
    ) -> Result<Vec<DocumentChunk>, RetrievalError> {
        let index = self.index().await?;
        if k == 0 {
            return Ok(vec![]);
        }

        let embedding = self.embeddings.embed(query).await?;
        if let Some(expected) = index.vector_size {
            if expected != embedding.len() {
                return Err(RetrievalError::Backend(format!(
                    "query embedding has {} dimensions but index '{}' expects {expected}; \
                     the embedding model changed since ingestion",
                    embedding.len(),
                    index.collection
                )));
            }
        }

        let hits = match mode {
            SearchMode::Similarity => self.store.search(&embedding, k, false, None).await?,
            SearchMode::Threshold { score_threshold } => {
                let hits = self
                    .store
                    .search(&embedding, k, false, Some(score_threshold))
                    .await?;
                apply_score_threshold(hits, score_threshold)
            }
            SearchMode::Mmr {
                fetch_k,
                lambda_mult,
            } => {
                let candidates = self
                    .store
                    .search(&embedding, fetch_k.max(k), true, None)
                    .await?;
                maximal_marginal_relevance(&embedding, candidates, k, lambda_mult)
            }
        };

        tracing::debug!(k, hits = hits.len(), ?mode, "vector search finished");
        if hits.is_empty() {
            return Err(RetrievalError::EmptyResult);
        }
        Ok(hits.into_iter().take(k).map(|hit| hit.chunk).collect())
    }
}

fn apply_score_threshold(hits: Vec<VectorHit>, score_threshold: f32) -> Vec<VectorHit> {
    hits.into_iter()
        .filter(|hit| hit.score >= score_threshold)
        .collect()
}

/// Greedy MMR: each step picks the candidate maximizing
/// `lambda * sim(query, c) - (1 - lambda) * max sim(c, selected)`.
/// Candidates without a vector fall back to their search score and are
/// treated as dissimilar to everything.
pub fn maximal_marginal_relevance(
    query: &[f32],
    candidates: Vec<VectorHit>,
    k: usize,
    lambda_mult: f32,
) -> Vec<VectorHit> {
    let lambda = lambda_mult.clamp(0.0, 1.0);
    let relevance: Vec<f32> = candidates
        .iter()
        .map(|hit| match &hit.vector {
            Some(vector) => cosine_similarity(query, vector),
            None => hit.score,
        })
        .collect();

    let mut remaining: Vec<(VectorHit, f32)> = candidates.into_iter().zip(relevance).collect();
    let mut selected: Vec<VectorHit> = Vec::with_capacity(k.min(remaining.len()));

    while selected.len() < k && !remaining.is_empty() {
        let mut best_idx = 0;
        let mut best_score = f32::NEG_INFINITY;

        for (idx, (candidate, relevance)) in remaining.iter().enumerate() {
            let redundancy = selected
                .iter()
                .filter_map(|chosen| match (&candidate.vector, &chosen.vector) {
                    (Some(a), Some(b)) => Some(cosine_similarity(a, b)),
                    _ => None,
                })
                .fold(f32::NEG_INFINITY, f32::max);
            let redundancy = if redundancy.is_finite() { redundancy } else { 0.0 };

            let score = lambda * relevance - (1.0 - lambda) * redundancy;
            if score > best_score {
                best_score = score;
                best_idx = idx;
            }
        }

        let (chosen, _) = remaining.remove(best_idx);
        selected.push(chosen);
    }

    selected
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
