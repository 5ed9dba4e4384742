//! In-memory [`SessionStore`] and [`VectorStore`] implementations.
//!
//! Both use `std::sync::RwLock` for thread safety. Vector search is
//! brute-force cosine similarity over every stored vector. Expired
//! sessions are evicted lazily, on the next access to their key.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::embedding::cosine_similarity;
use crate::models::{ChunkRecord, ScoredChunk, Session, Turn};
use crate::retrieval::compare_candidates;

use super::{SessionStore, VectorStore};

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

/// Session histories held in process memory.
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    ttl: chrono::Duration,
}

impl InMemorySessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX),
        }
    }

    fn deadline(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn push(&self, session_id: &str, turns: Vec<Turn>) -> Result<()> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        let fresh = || Session {
            id: session_id.to_string(),
            turns: Vec::new(),
            created_at: now,
            last_access: now,
            expires_at: self.deadline(now),
        };
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(fresh);
        if session.is_expired(now) {
            *session = fresh();
        }
        session.turns.extend(turns);
        session.last_access = now;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, session_id: &str) -> Result<Option<Session>> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        match sessions.get(session_id) {
            Some(s) if s.is_expired(now) => {
                sessions.remove(session_id);
                Ok(None)
            }
            Some(s) => Ok(Some(s.clone())),
            None => Ok(None),
        }
    }

    async fn append(&self, session_id: &str, turn: Turn) -> Result<()> {
        self.push(session_id, vec![turn])
    }

    async fn append_all(&self, session_id: &str, turns: Vec<Turn>) -> Result<()> {
        self.push(session_id, turns)
    }

    async fn touch_expiry(&self, session_id: &str) -> Result<()> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        if let Some(s) = sessions.get_mut(session_id) {
            if !s.is_expired(now) {
                s.last_access = now;
                s.expires_at = self.deadline(now);
            }
        }
        Ok(())
    }

    async fn clear(&self, session_id: &str) -> Result<()> {
        self.sessions.write().map_err(poisoned)?.remove(session_id);
        Ok(())
    }
}

/// Chunk vectors held in process memory.
#[derive(Default)]
pub struct InMemoryVectorStore {
    records: RwLock<Vec<ChunkRecord>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record by chunk id.
    pub fn insert(&self, record: ChunkRecord) -> Result<()> {
        let mut records = self.records.write().map_err(poisoned)?;
        records.retain(|r| r.chunk.id != record.chunk.id);
        records.push(record);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn similarity_search(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let records = self.records.read().map_err(poisoned)?;
        let mut scored: Vec<ScoredChunk> = records
            .iter()
            .map(|r| ScoredChunk {
                chunk: r.chunk.clone(),
                score: cosine_similarity(vector, &r.embedding) as f64,
            })
            .collect();
        scored.sort_by(compare_candidates);
        scored.truncate(k);
        Ok(scored)
    }
}
