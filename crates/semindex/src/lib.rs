//! Semantic Index (C3): SQLite + FTS5 full-text search over retained chunks.
//!
//! Grounded on the SQLite session store in the `querymt` example, but where
//! that store keeps the FTS5 table in sync with manual dual-writes on every
//! insert/update/delete, this index uses an external-content FTS5 table
//! wired up with triggers, so `INSERT ... ON CONFLICT DO UPDATE` and `DELETE`
//! against `chunks` stay consistent with `chunks_fts` without the router
//! code needing to remember to mirror the write.

use sa_domain::plan::{Chunk, SearchHit};
use sa_domain::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;

pub struct SemanticIndex {
    pool: SqlitePool,
}

impl SemanticIndex {
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(Error::Io)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
            .map_err(|e| Error::Config(format!("invalid sqlite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| Error::Other(format!("failed to open semantic index: {e}")))?;

        migrate(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| Error::Other(format!("failed to open in-memory semantic index: {e}")))?;
        migrate(&pool).await?;
        Ok(Self { pool })
    }

    /// Insert or update one chunk by its `(source_id, chunk_id)` key.
    pub async fn upsert_chunk(&self, chunk: &Chunk) -> Result<()> {
        let meta_json = match &chunk.meta {
            Some(v) => Some(serde_json::to_string(v)?),
            None => None,
        };
        sqlx::query(
            "INSERT INTO chunks (source_id, chunk_id, text, meta_json, updated_ts)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(source_id, chunk_id) DO UPDATE SET
                text = excluded.text,
                meta_json = excluded.meta_json,
                updated_ts = excluded.updated_ts",
        )
        .bind(&chunk.source_id)
        .bind(&chunk.chunk_id)
        .bind(&chunk.text)
        .bind(meta_json)
        .bind(chunk.updated_ts)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Other(format!("upsert_chunk: {e}")))?;
        Ok(())
    }

    pub async fn upsert_many(&self, chunks: &[Chunk]) -> Result<()> {
        for chunk in chunks {
            self.upsert_chunk(chunk).await?;
        }
        Ok(())
    }

    /// Delete every chunk belonging to `source_id`. The FTS mirror is kept
    /// in sync by the `chunks_ad` trigger.
    pub async fn delete_source(&self, source_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM chunks WHERE source_id = ?")
            .bind(source_id)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Other(format!("delete_source: {e}")))?;
        Ok(result.rows_affected())
    }

    /// Maximum number of hits `search` will ever return, regardless of the
    /// requested `top_k`.
    pub const MAX_LIMIT: usize = 50;

    /// BM25-ranked full text search, most relevant first. `top_k` is
    /// clamped to `MAX_LIMIT`; `source_filter`, when given, restricts hits
    /// to that single `source_id`.
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        source_filter: Option<&str>,
    ) -> Result<Vec<SearchHit>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let limit = top_k.min(Self::MAX_LIMIT) as i64;

        let rows = match source_filter {
            Some(source_id) => {
                sqlx::query(
                    "SELECT c.source_id, c.chunk_id,
                            snippet(chunks_fts, 0, '', '', '...', 12) AS snippet,
                            bm25(chunks_fts) AS rank
                     FROM chunks_fts
                     JOIN chunks c ON c.rowid = chunks_fts.rowid
                     WHERE chunks_fts MATCH ? AND c.source_id = ?
                     ORDER BY rank
                     LIMIT ?",
                )
                .bind(escape_fts_query(query))
                .bind(source_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT c.source_id, c.chunk_id,
                            snippet(chunks_fts, 0, '', '', '...', 12) AS snippet,
                            bm25(chunks_fts) AS rank
                     FROM chunks_fts
                     JOIN chunks c ON c.rowid = chunks_fts.rowid
                     WHERE chunks_fts MATCH ?
                     ORDER BY rank
                     LIMIT ?",
                )
                .bind(escape_fts_query(query))
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(|e| Error::Other(format!("search: {e}")))?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            let source_id: String = row.try_get("source_id").map_err(sqlx_err)?;
            let chunk_id: String = row.try_get("chunk_id").map_err(sqlx_err)?;
            let snippet: String = row.try_get("snippet").map_err(sqlx_err)?;
            // bm25() in SQLite is lower-is-better; `score` is reported
            // as-is, matching that convention rather than inverting it.
            let rank: f64 = row.try_get("rank").map_err(sqlx_err)?;
            hits.push(SearchHit {
                source_id,
                chunk_id,
                snippet,
                score: rank,
            });
        }
        Ok(hits)
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        let total_chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Error::Other(format!("stats: {e}")))?;
        let distinct_sources: i64 =
            sqlx::query_scalar("SELECT COUNT(DISTINCT source_id) FROM chunks")
                .fetch_one(&self.pool)
                .await
                .map_err(|e| Error::Other(format!("stats: {e}")))?;
        Ok(IndexStats {
            total_chunks: total_chunks as u64,
            distinct_sources: distinct_sources as u64,
        })
    }

    /// Reclaim space and ask FTS5 to merge its segments.
    pub async fn vacuum(&self) -> Result<()> {
        sqlx::query("INSERT INTO chunks_fts(chunks_fts) VALUES('optimize')")
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Other(format!("fts optimize: {e}")))?;
        sqlx::query("VACUUM")
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Other(format!("vacuum: {e}")))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct IndexStats {
    pub total_chunks: u64,
    pub distinct_sources: u64,
}

fn sqlx_err(e: sqlx::Error) -> Error {
    Error::Other(format!("row decode: {e}"))
}

/// FTS5's query syntax treats unbalanced quotes and bare operators (`-`,
/// `*`, `:`) as errors rather than literal text; wrap the user's phrase in
/// quotes so arbitrary natural-language queries never fail to parse.
fn escape_fts_query(raw: &str) -> String {
    format!("\"{}\"", raw.replace('"', "\"\""))
}

async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS chunks (
            source_id TEXT NOT NULL,
            chunk_id TEXT NOT NULL,
            text TEXT NOT NULL,
            meta_json TEXT,
            updated_ts REAL NOT NULL,
            PRIMARY KEY (source_id, chunk_id)
        )",
    )
    .execute(pool)
    .await
    .map_err(|e| Error::Other(format!("create chunks table: {e}")))?;

    sqlx::query(
        "CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
            text, content='chunks', content_rowid='rowid'
        )",
    )
    .execute(pool)
    .await
    .map_err(|e| Error::Other(format!("create chunks_fts table: {e}")))?;

    sqlx::query(
        "CREATE TRIGGER IF NOT EXISTS chunks_ai AFTER INSERT ON chunks BEGIN
            INSERT INTO chunks_fts(rowid, text) VALUES (new.rowid, new.text);
         END",
    )
    .execute(pool)
    .await
    .map_err(|e| Error::Other(format!("create chunks_ai trigger: {e}")))?;

    sqlx::query(
        "CREATE TRIGGER IF NOT EXISTS chunks_ad AFTER DELETE ON chunks BEGIN
            INSERT INTO chunks_fts(chunks_fts, rowid, text) VALUES('delete', old.rowid, old.text);
         END",
    )
    .execute(pool)
    .await
    .map_err(|e| Error::Other(format!("create chunks_ad trigger: {e}")))?;

    sqlx::query(
        "CREATE TRIGGER IF NOT EXISTS chunks_au AFTER UPDATE ON chunks BEGIN
            INSERT INTO chunks_fts(chunks_fts, rowid, text) VALUES('delete', old.rowid, old.text);
            INSERT INTO chunks_fts(rowid, text) VALUES (new.rowid, new.text);
         END",
    )
    .execute(pool)
    .await
    .map_err(|e| Error::Other(format!("create chunks_au trigger: {e}")))?;

    Ok(())
}
