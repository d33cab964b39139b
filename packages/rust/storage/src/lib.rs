//! libSQL-backed semantic index (offline, embedded).
//!
//! [`IndexStore`] keeps embedded text chunks in namespaced partitions and
//! answers top-k nearest-neighbor queries by cosine similarity. Vectors are
//! compared in process, which suits the single-site knowledge bases this
//! tool builds.

mod migrations;

use std::path::Path;

use chrono::Utc;
use libsql::{Connection, Database, params};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use sitekb_shared::{Result, SiteKbError};

fn storage_err(e: libsql::Error) -> SiteKbError {
    SiteKbError::Storage(e.to_string())
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A chunk ready to be written to the index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRecord {
    pub id: String,
    pub text: String,
    pub metadata: serde_json::Value,
    pub embedding: Vec<f32>,
}

/// A query hit, ranked by cosine similarity to the query vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredRecord {
    pub id: String,
    pub score: f32,
    pub text: String,
    pub metadata: serde_json::Value,
    /// Present only when the query asked for raw vectors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

// ---------------------------------------------------------------------------
// IndexStore
// ---------------------------------------------------------------------------

/// Handle to the chunk index database.
pub struct IndexStore {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    /// Serializes write transactions from concurrent crawl jobs.
    write_lock: Mutex<()>,
}

impl IndexStore {
    /// Open or create the index at `path` and apply pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| SiteKbError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        let store = Self {
            db,
            conn,
            write_lock: Mutex::new(()),
        };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    SiteKbError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 if no migrations have been applied.
    async fn schema_version(&self) -> u32 {
        let Ok(mut rows) = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await
        else {
            return 0; // table doesn't exist yet
        };

        match rows.next().await {
            Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
            _ => 0,
        }
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Insert or replace `records` in `namespace` in one transaction.
    pub async fn upsert(&self, namespace: &str, records: &[IndexRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let _guard = self.write_lock.lock().await;
        let tx = self.conn.transaction().await.map_err(storage_err)?;
        write_records(&tx, namespace, records).await?;
        tx.commit().await.map_err(storage_err)?;

        debug!(namespace, count = records.len(), "chunks upserted");
        Ok(records.len())
    }

    /// Swap every chunk whose `metadata.source` is `source` for `records`.
    ///
    /// The delete and the inserts share one transaction, so readers never see
    /// a page with its old chunks gone and its new ones missing.
    pub async fn replace_source(
        &self,
        namespace: &str,
        source: &str,
        records: &[IndexRecord],
    ) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let tx = self.conn.transaction().await.map_err(storage_err)?;
        let removed = tx
            .execute(
                "DELETE FROM chunks
                 WHERE namespace = ?1 AND json_extract(metadata_json, '$.source') = ?2",
                params![namespace, source],
            )
            .await
            .map_err(storage_err)?;
        write_records(&tx, namespace, records).await?;
        tx.commit().await.map_err(storage_err)?;

        debug!(namespace, source, removed, written = records.len(), "source replaced");
        Ok(records.len())
    }

    /// Remove every chunk in `namespace`. Returns the number removed.
    pub async fn clear(&self, namespace: &str) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        self.conn
            .execute("DELETE FROM chunks WHERE namespace = ?1", params![namespace])
            .await
            .map_err(storage_err)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Number of chunks stored in `namespace`.
    pub async fn count(&self, namespace: &str) -> Result<u64> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM chunks WHERE namespace = ?1",
                params![namespace],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => row.get::<i64>(0).map(|n| n as u64).map_err(storage_err),
            None => Ok(0),
        }
    }

    /// The `top_k` chunks in `namespace` most similar to `vector`, best first.
    ///
    /// Chunks whose dimensionality differs from the query are skipped.
    pub async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
        include_values: bool,
    ) -> Result<Vec<ScoredRecord>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let mut rows = self
            .conn
            .query(
                "SELECT id, text, metadata_json, embedding FROM chunks
                 WHERE namespace = ?1 AND dimensions = ?2",
                params![namespace, vector.len() as i64],
            )
            .await
            .map_err(storage_err)?;

        let mut hits = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            let embedding = decode_vector(&row.get::<Vec<u8>>(3).map_err(storage_err)?);
            let metadata_json = row.get::<String>(2).map_err(storage_err)?;
            hits.push(ScoredRecord {
                id: row.get::<String>(0).map_err(storage_err)?,
                score: cosine_similarity(vector, &embedding),
                text: row.get::<String>(1).map_err(storage_err)?,
                metadata: serde_json::from_str(&metadata_json)
                    .map_err(|e| SiteKbError::Storage(format!("metadata decode: {e}")))?,
                embedding: include_values.then_some(embedding),
            });
        }

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        debug!(namespace, hits = hits.len(), "index queried");
        Ok(hits)
    }
}

async fn write_records(conn: &Connection, namespace: &str, records: &[IndexRecord]) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    for record in records {
        let metadata = serde_json::to_string(&record.metadata)
            .map_err(|e| SiteKbError::Storage(format!("metadata encode: {e}")))?;
        conn.execute(
            "INSERT INTO chunks (namespace, id, text, metadata_json, embedding, dimensions, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(namespace, id) DO UPDATE SET
               text = excluded.text,
               metadata_json = excluded.metadata_json,
               embedding = excluded.embedding,
               dimensions = excluded.dimensions,
               updated_at = excluded.updated_at",
            params![
                namespace,
                record.id.as_str(),
                record.text.as_str(),
                metadata,
                encode_vector(&record.embedding),
                record.embedding.len() as i64,
                now.as_str(),
            ],
        )
        .await
        .map_err(storage_err)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Vector helpers
// ---------------------------------------------------------------------------

fn encode_vector(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Cosine similarity; 0.0 when either vector has zero length.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let (mut dot, mut norm_a, mut norm_b) = (0.0_f32, 0.0_f32, 0.0_f32);
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
