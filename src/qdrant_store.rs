use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;

use crate::error::RetrievalError;
use crate::models::{ChunkMetadata, DocumentChunk};

#[derive(Debug, Clone)]
pub struct VectorHit {
    pub chunk: DocumentChunk,
    pub score: f32,
    pub vector: Option<Vec<f32>>,
}

/// What the accessor learns when it opens an existing collection.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHandle {
    pub collection: String,
    pub vector_size: Option<usize>,
    pub points_count: Option<u64>,
}

#[derive(Clone)]
pub struct QdrantStore {
    client: Client,
    base_url: String,
    collection: String,
    known_vector_size: Arc<RwLock<Option<usize>>>,
}

impl QdrantStore {
    pub fn new(base_url: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            known_vector_size: Arc::new(RwLock::new(None)),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.base_url, self.collection)
    }

    /// Fails with `IndexNotFound` when the collection was never created.
    pub async fn open(&self) -> Result<IndexHandle, RetrievalError> {
        let response = self
            .client
            .get(self.collection_url())
            .send()
            .await
            .map_err(|err| RetrievalError::Backend(format!("failed to contact qdrant: {err}")))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(RetrievalError::IndexNotFound(self.collection.clone()));
        }
        if !response.status().is_success() {
            return Err(RetrievalError::Backend(format!(
                "qdrant collection lookup returned {}",
                response.status()
            )));
        }

        let info = response
            .json::<QdrantCollectionResponse>()
            .await
            .map_err(|err| {
                RetrievalError::Backend(format!("failed to decode qdrant collection info: {err}"))
            })?;

        let vector_size = info
            .result
            .config
            .as_ref()
            .and_then(|config| config.params.vectors.get("size"))
            .and_then(|size| size.as_u64())
            .map(|size| size as usize);

        Ok(IndexHandle {
            collection: self.collection.clone(),
            vector_size,
            points_count: info.result.points_count,
        })
    }

    pub async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        with_vectors: bool,
        score_threshold: Option<f32>,
    ) -> Result<Vec<VectorHit>, RetrievalError> {
        if vector.is_empty() || limit == 0 {
            return Ok(vec![]);
        }

        let url = format!("{}/points/search", self.collection_url());
        let mut body = json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
            "with_vector": with_vectors,
        });
        if let Some(threshold) = score_threshold {
            body["score_threshold"] = json!(threshold);
        }

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|err| RetrievalError::Backend(format!("failed to contact qdrant: {err}")))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(RetrievalError::IndexNotFound(self.collection.clone()));
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RetrievalError::Backend(format!(
                "qdrant search returned {status}: {}",
                body.trim()
            )));
        }

        let response = response
            .json::<QdrantSearchResponse>()
            .await
            .map_err(|err| {
                RetrievalError::Backend(format!("failed to decode qdrant search response: {err}"))
            })?;

        Ok(into_hits(response))
    }

    /// Drops the whole collection; the next upsert recreates it with the
    /// vector size of the incoming points.
    pub async fn drop_collection(&self) -> Result<()> {
        let response = self
            .client
            .delete(self.collection_url())
            .send()
            .await
            .context("failed to contact qdrant while dropping collection")?;
        *self.known_vector_size.write().await = None;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        response
            .error_for_status()
            .context("qdrant failed to drop collection")?;
        Ok(())
    }

    pub async fn ensure_collection(&self, vector_size: usize) -> Result<()> {
        {
            let known = self.known_vector_size.read().await;
            if *known == Some(vector_size) {
                return Ok(());
            }
        }

        match self.open().await {
            Ok(handle) if handle.vector_size == Some(vector_size) => {
                *self.known_vector_size.write().await = Some(vector_size);
                return Ok(());
            }
            Ok(handle) => anyhow::bail!(
                "qdrant collection '{}' has vector size {:?} but embeddings have {}; rerun ingest with --rebuild",
                self.collection,
                handle.vector_size,
                vector_size
            ),
            Err(RetrievalError::IndexNotFound(_)) => {}
            Err(err) => return Err(err.into()),
        }

        let payload = json!({
            "vectors": {
                "size": vector_size,
                "distance": "Cosine"
            }
        });

        self.client
            .put(self.collection_url())
            .json(&payload)
            .send()
            .await
            .context("failed to contact qdrant while creating collection")?
            .error_for_status()
            .context("qdrant failed to create collection")?;

        *self.known_vector_size.write().await = Some(vector_size);
        Ok(())
    }

    pub async fn upsert_points(&self, points: &[QdrantPoint]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }

        let vector_size = points[0].vector.len();
        self.ensure_collection(vector_size).await?;

        let upsert_url = format!("{}/points?wait=true", self.collection_url());
        let body = json!({ "points": points });

        self.client
            .put(upsert_url)
            .json(&body)
            .send()
            .await
            .context("failed to contact qdrant during upsert")?
            .error_for_status()
            .context("qdrant upsert returned non-success status")?;

        Ok(())
    }

    /// Removes every point of one document; a missing collection is not an error.
    pub async fn delete_document(&self, doc_id: &str) -> Result<()> {
        let url = format!("{}/points/delete?wait=true", self.collection_url());
        let body = json!({
            "filter": {
                "must": [{ "key": "doc_id", "match": { "value": doc_id } }]
            }
        });

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .context("failed to contact qdrant during delete")?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        response
            .error_for_status()
            .with_context(|| format!("qdrant failed to delete points of {doc_id}"))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QdrantPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: QdrantPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QdrantPayload {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub doc_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub authors: Option<String>,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub source: Option<String>,
}

impl QdrantPayload {
    pub fn from_chunk(chunk: &DocumentChunk) -> Self {
        Self {
            content: chunk.content.clone(),
            doc_id: chunk.metadata.doc_id.clone(),
            title: chunk.metadata.title.clone(),
            authors: chunk.metadata.authors.clone(),
            page: chunk.metadata.page,
            source: chunk.metadata.source.clone(),
        }
    }

    fn into_chunk(self) -> DocumentChunk {
        DocumentChunk {
            content: self.content,
            metadata: ChunkMetadata {
                doc_id: self.doc_id,
                title: self.title,
                authors: self.authors,
                page: self.page,
                source: self.source,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct QdrantCollectionResponse {
    result: QdrantCollectionInfo,
}

#[derive(Debug, Deserialize)]
struct QdrantCollectionInfo {
    #[serde(default)]
    points_count: Option<u64>,
    #[serde(default)]
    config: Option<QdrantCollectionConfig>,
}

#[derive(Debug, Deserialize)]
struct QdrantCollectionConfig {
    params: QdrantCollectionParams,
}

#[derive(Debug, Deserialize)]
struct QdrantCollectionParams {
    #[serde(default)]
    vectors: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct QdrantSearchResponse {
    result: Vec<QdrantResultPoint>,
}

#[derive(Debug, Deserialize)]
struct QdrantResultPoint {
    score: f32,
    payload: Option<QdrantPayload>,
    #[serde(default)]
    vector: Option<Vec<f32>>,
}

/// Points without a payload carry no chunk and are dropped.
fn into_hits(response: QdrantSearchResponse) -> Vec<VectorHit> {
    response
        .result
        .into_iter()
        .filter_map(|point| {
            let payload = point.payload?;
            Some(VectorHit {
                chunk: payload.into_chunk(),
                score: point.score,
                vector: point.vector,
            })
        })
        .collect()
}
