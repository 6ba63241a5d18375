pub mod pdf;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use sha2::{Digest, Sha256};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::config::ChunkingConfig;
use crate::db::Database;
use crate::models::{ChunkMetadata, DocumentChunk, DocumentRecord};
use crate::provider::EmbeddingProvider;
use crate::qdrant_store::{QdrantPayload, QdrantPoint, QdrantStore};

const UPSERT_BATCH: usize = 64;

/// What happened to one PDF during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentOutcome {
    Indexed { chunks: usize },
    Unchanged,
    NoText,
}

#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub documents: Vec<(String, DocumentOutcome)>,
}

impl IngestReport {
    pub fn indexed(&self) -> usize {
        self.count(|o| matches!(o, DocumentOutcome::Indexed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| !matches!(o, DocumentOutcome::Indexed { .. }))
    }

    pub fn chunk_count(&self) -> usize {
        self.documents
            .iter()
            .map(|(_, outcome)| match outcome {
                DocumentOutcome::Indexed { chunks } => *chunks,
                _ => 0,
            })
            .sum()
    }

    fn count(&self, pred: impl Fn(&DocumentOutcome) -> bool) -> usize {
        self.documents.iter().filter(|(_, o)| pred(o)).count()
    }
}

#[derive(Clone)]
pub struct Ingestor {
    chunking: ChunkingConfig,
    db: Database,
    embeddings: Arc<dyn EmbeddingProvider>,
    qdrant: QdrantStore,
}

impl Ingestor {
    pub fn new(
        chunking: ChunkingConfig,
        db: Database,
        embeddings: Arc<dyn EmbeddingProvider>,
        qdrant: QdrantStore,
    ) -> Self {
        Self {
            chunking,
            db,
            embeddings,
            qdrant,
        }
    }

    pub async fn ingest<F>(
        &self,
        docs_dir: &Path,
        rebuild: bool,
        mut progress: F,
    ) -> Result<IngestReport>
    where
        F: FnMut(&str, &DocumentOutcome) + Send,
    {
        let files = list_pdfs(docs_dir)?;
        if files.is_empty() {
            anyhow::bail!("no PDF files found in {}", docs_dir.display());
        }
        tracing::info!(count = files.len(), dir = %docs_dir.display(), "found PDF files");

        if rebuild {
            self.reset_index().await?;
        }

        let mut report = IngestReport::default();
        for path in files {
            let doc_id = path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .with_context(|| format!("invalid PDF path {}", path.display()))?;

            let outcome = self
                .ingest_document(&path, &doc_id)
                .await
                .with_context(|| format!("failed to ingest {doc_id}"))?;

            progress(doc_id.as_str(), &outcome);
            report.documents.push((doc_id, outcome));
        }

        tracing::info!(
            indexed = report.indexed(),
            skipped = report.skipped(),
            chunks = report.chunk_count(),
            "ingest finished"
        );
        Ok(report)
    }

    /// Drops every indexed point and forgets every manifest entry.
    async fn reset_index(&self) -> Result<()> {
        tracing::info!(collection = self.qdrant.collection(), "rebuilding index from scratch");
        self.qdrant.drop_collection().await?;
        self.db.clear_documents().await
    }

    async fn ingest_document(&self, path: &Path, doc_id: &str) -> Result<DocumentOutcome> {
        let sha256 = file_sha256(path).await?;
        let previous = self.db.get_document(doc_id).await?;
        if previous.as_ref().is_some_and(|record| record.sha256 == sha256) {
            tracing::debug!(doc_id, "unchanged; skipping");
            return Ok(DocumentOutcome::Unchanged);
        }

        let document = pdf::extract_pdf(path).await?;
        self.index_document(doc_id, sha256, previous.is_some(), &document)
            .await
    }

    /// Embeds and upserts one extracted document, replacing the points of a
    /// previous version when `replaces` is set. Documents without text are
    /// still recorded so an unchanged file is not extracted again.
    async fn index_document(
        &self,
        doc_id: &str,
        sha256: String,
        replaces: bool,
        document: &pdf::PdfDocument,
    ) -> Result<DocumentOutcome> {
        let chunks = build_chunks(doc_id, document, &self.chunking);

        let mut points = Vec::with_capacity(chunks.len());
        for (idx, chunk) in chunks.iter().enumerate() {
            let vector = self
                .embeddings
                .embed(&chunk.content)
                .await
                .with_context(|| format!("failed embedding for chunk {idx} of {doc_id}"))?;

            points.push(QdrantPoint {
                id: Uuid::new_v4().to_string(),
                vector,
                payload: QdrantPayload::from_chunk(chunk),
            });
        }

        if replaces {
            self.qdrant.delete_document(doc_id).await?;
        }
        for batch in points.chunks(UPSERT_BATCH) {
            self.qdrant.upsert_points(batch).await?;
        }

        self.db
            .upsert_document(&DocumentRecord {
                doc_id: doc_id.to_string(),
                sha256,
                title: document.title.clone(),
                authors: document.authors.clone(),
                page_count: document.page_count as i64,
                chunk_count: chunks.len() as i64,
                ingested_at: Utc::now(),
            })
            .await?;

        if chunks.is_empty() {
            tracing::warn!(doc_id, "no extractable text");
            return Ok(DocumentOutcome::NoText);
        }

        tracing::info!(doc_id, chunks = chunks.len(), "indexed");
        Ok(DocumentOutcome::Indexed {
            chunks: chunks.len(),
        })
    }
}

fn list_pdfs(docs_dir: &Path) -> Result<Vec<PathBuf>> {
    if !docs_dir.is_dir() {
        anyhow::bail!("documents directory not found: {}", docs_dir.display());
    }

    let mut files: Vec<PathBuf> = WalkDir::new(docs_dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
        })
        .collect();
    files.sort();
    Ok(files)
}

fn build_chunks(
    doc_id: &str,
    document: &pdf::PdfDocument,
    chunking: &ChunkingConfig,
) -> Vec<DocumentChunk> {
    let mut chunks = Vec::new();

    for page in &document.pages {
        for content in split_text(&page.text, chunking.chunk_size, chunking.chunk_overlap) {
            chunks.push(DocumentChunk {
                content,
                metadata: ChunkMetadata {
                    doc_id: Some(doc_id.to_string()),
                    title: Some(document.title.clone()),
                    authors: Some(document.authors.clone()),
                    page: page.page,
                    source: Some(doc_id.to_string()),
                },
            });
        }
    }

    chunks
}

/// Packs whitespace-separated words into chunks of at most `chunk_size`
/// characters. Each chunk starts with the trailing words of the previous one,
/// up to `overlap` characters. Words longer than a chunk are hard-split.
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let overlap = overlap.min(chunk_size.saturating_sub(1));

    let mut words: Vec<String> = Vec::new();
    for word in text.split_whitespace() {
        if word.chars().count() <= chunk_size {
            words.push(word.to_string());
        } else {
            let chars: Vec<char> = word.chars().collect();
            words.extend(chars.chunks(chunk_size).map(|piece| piece.iter().collect::<String>()));
        }
    }

    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut len = 0usize;

    for word in &words {
        let word_len = word.chars().count();
        let joined = if current.is_empty() { word_len } else { len + 1 + word_len };

        if joined > chunk_size && !current.is_empty() {
            chunks.push(current.join(" "));

            let mut tail: Vec<&str> = Vec::new();
            let mut tail_len = 0usize;
            for prev in current.iter().rev() {
                let extra = prev.chars().count() + usize::from(!tail.is_empty());
                if tail_len + extra > overlap {
                    break;
                }
                tail_len += extra;
                tail.push(prev);
            }
            tail.reverse();

            if tail.is_empty() || tail_len + 1 + word_len > chunk_size {
                current = Vec::new();
                len = 0;
            } else {
                current = tail;
                len = tail_len;
            }
        }

        len = if current.is_empty() { word_len } else { len + 1 + word_len };
        current.push(word);
    }

    if !current.is_empty() {
        chunks.push(current.join(" "));
    }

    chunks
}

pub async fn file_sha256(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{app_config, FakeQdrant, MockEmbeddings};

    fn words(n: usize) -> String {
        (0..n)
            .map(|i| format!("w{i:03}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn chunks_never_exceed_the_size() {
        let text = words(300);
        for (size, overlap) in [(500, 80), (50, 10), (23, 0), (7, 3)] {
            let chunks = split_text(&text, size, overlap);
            assert!(!chunks.is_empty());
            for chunk in &chunks {
                assert!(chunk.chars().count() <= size, "{chunk:?} exceeds {size}");
            }
        }
    }

    #[test]
    fn consecutive_chunks_overlap() {
        let chunks = split_text(&words(100), 60, 15);
        assert!(chunks.len() > 1);

        for pair in chunks.windows(2) {
            let last_word = pair[0].split(' ').last().unwrap();
            assert!(
                pair[1].starts_with(last_word) || pair[1].contains(&format!(" {last_word} ")),
                "no overlap between {:?} and {:?}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn no_overlap_keeps_every_word_once() {
        let text = words(50);
        let chunks = split_text(&text, 40, 0);
        assert_eq!(chunks.join(" "), text);
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        assert_eq!(
            split_text("  La evaluación\nformativa  ", 500, 80),
            vec!["La evaluación formativa"]
        );
        assert!(split_text("   ", 500, 80).is_empty());
    }

    #[test]
    fn long_words_are_hard_split() {
        let chunks = split_text("abcdefghij", 4, 0);
        assert_eq!(chunks, vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn chunks_carry_page_and_document_metadata() {
        let document = pdf::PdfDocument {
            title: "Comprender con UbD".to_string(),
            authors: "Wiggins".to_string(),
            page_count: 2,
            pages: vec![
                pdf::PdfPage {
                    page: Some(1),
                    text: "Diseño inverso.".to_string(),
                },
                pdf::PdfPage {
                    page: Some(2),
                    text: "Evidencias de aprendizaje.".to_string(),
                },
            ],
        };
        let chunking = ChunkingConfig {
            chunk_size: 500,
            chunk_overlap: 80,
        };

        let chunks = build_chunks("ubd.pdf", &document, &chunking);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].metadata.page, Some(2));
        assert_eq!(chunks[1].metadata.doc_id.as_deref(), Some("ubd.pdf"));
        assert_eq!(chunks[1].metadata.source.as_deref(), Some("ubd.pdf"));
        assert_eq!(chunks[0].metadata.title.as_deref(), Some("Comprender con UbD"));
    }

    #[tokio::test]
    async fn sha256_matches_known_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.pdf");
        tokio::fs::write(&path, b"abc").await.unwrap();

        assert_eq!(
            file_sha256(&path).await.unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn only_pdfs_are_listed_in_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("b.pdf"), b"").unwrap();
        std::fs::write(dir.path().join("sub/a.PDF"), b"").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"").unwrap();

        let names: Vec<String> = list_pdfs(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();

        assert_eq!(names, vec!["b.pdf", "a.PDF"]);
    }

    struct Pipeline {
        ingestor: Ingestor,
        db: Database,
        qdrant: FakeQdrant,
        embeddings: Arc<MockEmbeddings>,
        dir: tempfile::TempDir,
    }

    async fn pipeline(chunk_size: usize) -> Pipeline {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(&app_config(dir.path())).await.unwrap();
        let (qdrant, base_url) = FakeQdrant::spawn().await;
        let embeddings = Arc::new(MockEmbeddings::new(vec![1.0, 0.0]));
        let ingestor = Ingestor::new(
            ChunkingConfig {
                chunk_size,
                chunk_overlap: 0,
            },
            db.clone(),
            embeddings.clone(),
            QdrantStore::new(base_url, "zoltar_chunks"),
        );

        Pipeline {
            ingestor,
            db,
            qdrant,
            embeddings,
            dir,
        }
    }

    fn document(text: &str) -> pdf::PdfDocument {
        pdf::PdfDocument {
            title: "Comprender con UbD".to_string(),
            authors: "Wiggins".to_string(),
            page_count: 1,
            pages: vec![pdf::PdfPage {
                page: Some(1),
                text: text.to_string(),
            }],
        }
    }

    async fn write_pdf(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
        let docs = dir.join("docs");
        tokio::fs::create_dir_all(&docs).await.unwrap();
        let path = docs.join(name);
        tokio::fs::write(&path, bytes).await.unwrap();
        path
    }

    #[tokio::test]
    async fn unchanged_file_is_skipped_on_the_next_run() {
        let p = pipeline(500).await;
        let path = write_pdf(p.dir.path(), "ubd.pdf", b"version 1").await;
        let sha = file_sha256(&path).await.unwrap();

        let first = p
            .ingestor
            .index_document("ubd.pdf", sha.clone(), false, &document("Diseño inverso."))
            .await
            .unwrap();
        assert_eq!(first, DocumentOutcome::Indexed { chunks: 1 });
        assert_eq!(p.db.get_document("ubd.pdf").await.unwrap().unwrap().sha256, sha);

        let mut seen = Vec::new();
        let report = p
            .ingestor
            .ingest(&p.dir.path().join("docs"), false, |doc_id, outcome| {
                seen.push((doc_id.to_string(), outcome.clone()))
            })
            .await
            .unwrap();

        assert_eq!(seen, vec![("ubd.pdf".to_string(), DocumentOutcome::Unchanged)]);
        assert_eq!(report.indexed(), 0);
        assert_eq!(report.skipped(), 1);
        assert_eq!(p.embeddings.calls(), 1);
        assert_eq!(p.qdrant.log(), vec!["create", "upsert:1"]);
    }

    #[tokio::test]
    async fn changed_document_deletes_old_points_before_upsert() {
        let p = pipeline(500).await;

        p.ingestor
            .index_document("ubd.pdf", "sha-v1".to_string(), false, &document("Versión uno."))
            .await
            .unwrap();
        let outcome = p
            .ingestor
            .index_document("ubd.pdf", "sha-v2".to_string(), true, &document("Versión dos."))
            .await
            .unwrap();

        assert_eq!(outcome, DocumentOutcome::Indexed { chunks: 1 });
        assert_eq!(
            p.qdrant.log(),
            vec!["create", "upsert:1", "delete:ubd.pdf", "upsert:1"]
        );
        assert_eq!(p.qdrant.point_count(), 1);
        assert_eq!(p.db.get_document("ubd.pdf").await.unwrap().unwrap().sha256, "sha-v2");
    }

    #[tokio::test]
    async fn points_are_upserted_in_batches_of_64() {
        let p = pipeline(4).await;

        let outcome = p
            .ingestor
            .index_document("largo.pdf", "sha".to_string(), false, &document(&words(130)))
            .await
            .unwrap();

        assert_eq!(outcome, DocumentOutcome::Indexed { chunks: 130 });
        assert_eq!(
            p.qdrant.log(),
            vec!["create", "upsert:64", "upsert:64", "upsert:2"]
        );
        assert_eq!(p.qdrant.point_count(), 130);
        assert_eq!(
            p.db.get_document("largo.pdf").await.unwrap().unwrap().chunk_count,
            130
        );
    }

    #[tokio::test]
    async fn reset_drops_collection_and_clears_manifest() {
        let p = pipeline(500).await;
        p.ingestor
            .index_document("ubd.pdf", "sha".to_string(), false, &document("Texto."))
            .await
            .unwrap();
        assert!(p.qdrant.exists());

        p.ingestor.reset_index().await.unwrap();

        assert!(!p.qdrant.exists());
        assert_eq!(p.qdrant.log().last().map(String::as_str), Some("drop"));
        assert!(p.db.list_documents().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn document_without_text_is_recorded_and_skipped_later() {
        let p = pipeline(500).await;
        let path = write_pdf(p.dir.path(), "escaneado.pdf", b"scanned").await;
        let sha = file_sha256(&path).await.unwrap();
        let mut empty = document("");
        empty.pages.clear();

        let outcome = p
            .ingestor
            .index_document("escaneado.pdf", sha, false, &empty)
            .await
            .unwrap();
        assert_eq!(outcome, DocumentOutcome::NoText);

        let record = p.db.get_document("escaneado.pdf").await.unwrap().unwrap();
        assert_eq!(record.chunk_count, 0);
        assert!(p.qdrant.log().is_empty());

        let again = p
            .ingestor
            .ingest_document(&path, "escaneado.pdf")
            .await
            .unwrap();
        assert_eq!(again, DocumentOutcome::Unchanged);
    }
}
