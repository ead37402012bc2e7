//! Key-value document store used as the pipeline's metadata merge target.
//!
//! `SqliteMetadataStore` keeps one row per `(collection, doc_key, field)` so a
//! merge is a per-field upsert: fields missing from the update are untouched.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("field `{field}` is not valid JSON: {source}")]
    Encoding {
        field: String,
        source: serde_json::Error,
    },
}

pub type MetadataResult<T> = Result<T, MetadataError>;

#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Set the given fields on document `key`, creating it if needed.
    /// Last write wins per field; other fields are preserved.
    async fn merge_document(&self, key: &str, fields: Map<String, Value>) -> MetadataResult<()>;

    async fn get_document(&self, key: &str) -> MetadataResult<Option<Map<String, Value>>>;
}

#[derive(Clone)]
pub struct SqliteMetadataStore {
    db: Arc<SqlitePool>,
    collection: String,
}

impl SqliteMetadataStore {
    pub fn new(db: Arc<SqlitePool>, collection: impl Into<String>) -> Self {
        Self {
            db,
            collection: collection.into(),
        }
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn merge_document(&self, key: &str, fields: Map<String, Value>) -> MetadataResult<()> {
        if fields.is_empty() {
            return Ok(());
        }

        let updated_at = Utc::now();
        let mut tx = self.db.begin().await?;
        for (field, value) in &fields {
            let encoded = serde_json::to_string(value).map_err(|source| MetadataError::Encoding {
                field: field.clone(),
                source,
            })?;
            sqlx::query(
                r#"
                INSERT INTO documents (collection, doc_key, field, value, updated_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(collection, doc_key, field) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&self.collection)
            .bind(key)
            .bind(field)
            .bind(encoded)
            .bind(updated_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!(
            collection = %self.collection,
            key,
            fields = fields.len(),
            "merged metadata document"
        );
        Ok(())
    }

    async fn get_document(&self, key: &str) -> MetadataResult<Option<Map<String, Value>>> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT field, value FROM documents
             WHERE collection = ? AND doc_key = ?
             ORDER BY field",
        )
        .bind(&self.collection)
        .bind(key)
        .fetch_all(&*self.db)
        .await?;

        if rows.is_empty() {
            return Ok(None);
        }

        let mut document = Map::new();
        for (field, raw) in rows {
            let value = serde_json::from_str(&raw).map_err(|source| MetadataError::Encoding {
                field: field.clone(),
                source,
            })?;
            document.insert(field, value);
        }
        Ok(Some(document))
    }
}

/// Apply the embedded schema. Statements are idempotent.
pub async fn run_migrations(db: &SqlitePool) -> MetadataResult<()> {
    let statements = SCHEMA
        .split(';')
        .map(|stmt| {
            stmt.lines()
                .filter(|line| !line.trim_start().starts_with("--"))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .filter(|stmt| !stmt.trim().is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());
    for stmt in statements {
        debug!("Executing migration SQL: {}", stmt.trim());
        sqlx::query(&stmt).execute(db).await?;
    }
    Ok(())
}
