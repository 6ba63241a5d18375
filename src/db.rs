use std::str::FromStr;

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use crate::config::AppConfig;
use crate::models::DocumentRecord;

/// Ingestion manifest: which PDFs are in the vector index and at which hash.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(config: &AppConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&config.data_dir).await?;

        let options = SqliteConnectOptions::from_str(&config.sqlite_dsn())?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                doc_id TEXT PRIMARY KEY,
                sha256 TEXT NOT NULL,
                title TEXT NOT NULL,
                authors TEXT NOT NULL,
                page_count INTEGER NOT NULL,
                chunk_count INTEGER NOT NULL,
                ingested_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_document(&self, doc_id: &str) -> Result<Option<DocumentRecord>> {
        let row = sqlx::query(
            r#"
            SELECT doc_id, sha256, title, authors, page_count, chunk_count, ingested_at
            FROM documents
            WHERE doc_id = ?
            "#,
        )
        .bind(doc_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(row_to_document))
    }

    pub async fn list_documents(&self) -> Result<Vec<DocumentRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT doc_id, sha256, title, authors, page_count, chunk_count, ingested_at
            FROM documents
            ORDER BY doc_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(row_to_document).collect())
    }

    pub async fn upsert_document(&self, record: &DocumentRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (doc_id, sha256, title, authors, page_count, chunk_count, ingested_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(doc_id) DO UPDATE SET
                sha256 = excluded.sha256,
                title = excluded.title,
                authors = excluded.authors,
                page_count = excluded.page_count,
                chunk_count = excluded.chunk_count,
                ingested_at = excluded.ingested_at
            "#,
        )
        .bind(&record.doc_id)
        .bind(&record.sha256)
        .bind(&record.title)
        .bind(&record.authors)
        .bind(record.page_count)
        .bind(record.chunk_count)
        .bind(record.ingested_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn clear_documents(&self) -> Result<()> {
        sqlx::query("DELETE FROM documents")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn row_to_document(row: SqliteRow) -> DocumentRecord {
    DocumentRecord {
        doc_id: row.get::<String, _>("doc_id"),
        sha256: row.get::<String, _>("sha256"),
        title: row.get::<String, _>("title"),
        authors: row.get::<String, _>("authors"),
        page_count: row.get::<i64, _>("page_count"),
        chunk_count: row.get::<i64, _>("chunk_count"),
        ingested_at: DateTime::parse_from_rfc3339(&row.get::<String, _>("ingested_at"))
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    }
}
