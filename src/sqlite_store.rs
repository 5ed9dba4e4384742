//! SQLite-backed [`SessionStore`] and [`VectorStore`] implementations.
//!
//! Tables are created by [`crate::migrate`]. Session timestamps are stored
//! as Unix milliseconds; turn citations as a JSON array.

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use context_chat_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use context_chat_core::models::{Chunk, ChunkRecord, Citation, Role, ScoredChunk, Session, Turn};
use context_chat_core::retrieval::compare_candidates;
use context_chat_core::store::{SessionStore, VectorStore};

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Session histories in the `sessions` and `turns` tables.
pub struct SqliteSessionStore {
    pool: SqlitePool,
    ttl_ms: i64,
}

impl SqliteSessionStore {
    pub fn new(pool: SqlitePool, ttl: Duration) -> Self {
        Self {
            pool,
            ttl_ms: i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX),
        }
    }

    /// Delete every expired session. Returns how many were removed.
    pub async fn purge_expired(&self) -> Result<u64> {
        let now = Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "DELETE FROM turns WHERE session_id IN (SELECT id FROM sessions WHERE expires_at <= ?)",
        )
        .bind(now)
        .execute(&mut *tx)
        .await?;
        let removed = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
            .bind(now)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(removed)
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn get(&self, session_id: &str) -> Result<Option<Session>> {
        let now = Utc::now().timestamp_millis();
        let row = sqlx::query(
            "SELECT created_at, last_access, expires_at FROM sessions WHERE id = ? AND expires_at > ?",
        )
        .bind(session_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let rows = sqlx::query(
            "SELECT role, text, created_at, citations_json FROM turns WHERE session_id = ? ORDER BY seq",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        let mut turns = Vec::with_capacity(rows.len());
        for r in &rows {
            let role: String = r.get("role");
            let citations_json: String = r.get("citations_json");
            let citations: Vec<Citation> = serde_json::from_str(&citations_json)?;
            turns.push(Turn {
                role: role.parse::<Role>()?,
                text: r.get("text"),
                timestamp: from_millis(r.get("created_at")),
                citations,
            });
        }

        Ok(Some(Session {
            id: session_id.to_string(),
            turns,
            created_at: from_millis(row.get("created_at")),
            last_access: from_millis(row.get("last_access")),
            expires_at: from_millis(row.get("expires_at")),
        }))
    }

    async fn append(&self, session_id: &str, turn: Turn) -> Result<()> {
        self.append_all(session_id, vec![turn]).await
    }

    /// All turns land in one transaction.
    async fn append_all(&self, session_id: &str, turns: Vec<Turn>) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let deadline = now.saturating_add(self.ttl_ms);
        let mut tx = self.pool.begin().await?;

        // An expired session restarts with an empty history.
        sqlx::query(
            r#"
            DELETE FROM turns WHERE session_id = ?
              AND EXISTS (SELECT 1 FROM sessions WHERE id = ? AND expires_at <= ?)
            "#,
        )
        .bind(session_id)
        .bind(session_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO sessions (id, created_at, last_access, expires_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                created_at = CASE WHEN sessions.expires_at <= excluded.last_access
                                  THEN excluded.created_at ELSE sessions.created_at END,
                expires_at = CASE WHEN sessions.expires_at <= excluded.last_access
                                  THEN excluded.expires_at ELSE sessions.expires_at END,
                last_access = excluded.last_access
            "#,
        )
        .bind(session_id)
        .bind(now)
        .bind(now)
        .bind(deadline)
        .execute(&mut *tx)
        .await?;

        for turn in &turns {
            sqlx::query(
                r#"
                INSERT INTO turns (session_id, seq, role, text, created_at, citations_json)
                SELECT ?, COALESCE(MAX(seq) + 1, 0), ?, ?, ?, ?
                FROM turns WHERE session_id = ?
                "#,
            )
            .bind(session_id)
            .bind(turn.role.as_str())
            .bind(&turn.text)
            .bind(turn.timestamp.timestamp_millis())
            .bind(serde_json::to_string(&turn.citations)?)
            .bind(session_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn touch_expiry(&self, session_id: &str) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        sqlx::query(
            "UPDATE sessions SET last_access = ?, expires_at = ? WHERE id = ? AND expires_at > ?",
        )
        .bind(now)
        .bind(now.saturating_add(self.ttl_ms))
        .bind(session_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear(&self, session_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM turns WHERE session_id = ?")
            .bind(session_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(session_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

/// Chunk vectors in the `chunk_vectors` table, searched by brute-force
/// cosine similarity.
pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or replace a record by chunk id.
    pub async fn insert(&self, record: &ChunkRecord) -> Result<()> {
        if record.embedding.is_empty() {
            bail!("chunk {} has an empty embedding", record.chunk.id);
        }
        let chunk = &record.chunk;
        sqlx::query(
            r#"
            INSERT INTO chunk_vectors (id, document_id, position, text, document_updated_at, dims, embedding)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                document_id = excluded.document_id,
                position = excluded.position,
                text = excluded.text,
                document_updated_at = excluded.document_updated_at,
                dims = excluded.dims,
                embedding = excluded.embedding
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(chunk.position)
        .bind(&chunk.text)
        .bind(chunk.document_updated_at)
        .bind(record.embedding.len() as i64)
        .bind(vec_to_blob(&record.embedding))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn count(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
            .fetch_one(&self.pool)
            .await?)
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn similarity_search(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT id, document_id, position, text, document_updated_at, embedding
            FROM chunk_vectors
            WHERE dims = ?
            "#,
        )
        .bind(vector.len() as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut scored: Vec<ScoredChunk> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let score = cosine_similarity(vector, &blob_to_vec(&blob)) as f64;
                ScoredChunk {
                    chunk: Chunk {
                        id: row.get("id"),
                        document_id: row.get("document_id"),
                        position: row.get("position"),
                        text: row.get("text"),
                        document_updated_at: row.get("document_updated_at"),
                    },
                    score,
                }
            })
            .collect();

        scored.sort_by(compare_candidates);
        scored.truncate(k);

        Ok(scored)
    }
}
