//! Storage capabilities for Context Chat.
//!
//! Two traits decouple the pipeline from concrete backends:
//!
//! | Trait | Holds | Mutated by |
//! |-------|-------|------------|
//! | [`SessionStore`] | per-session turn history with expiry | the orchestrator only |
//! | [`VectorStore`] | chunk vectors + metadata | the ingestion collaborator |
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//! Backends are chosen once at startup; the pipeline only ever sees the
//! trait objects.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{ScoredChunk, Session, Turn};

/// Key-value store of session histories.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get`](SessionStore::get) | Load a live session, `None` if absent or expired |
/// | [`append`](SessionStore::append) | Append one turn, creating the session if needed |
/// | [`append_all`](SessionStore::append_all) | Append several turns as one unit |
/// | [`touch_expiry`](SessionStore::touch_expiry) | Push the expiry deadline to now + TTL |
/// | [`clear`](SessionStore::clear) | Drop a session and its turns |
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a session. Expired sessions are reported as absent even when
    /// the backend has not evicted them yet.
    async fn get(&self, session_id: &str) -> Result<Option<Session>>;

    /// Append a turn. Appending to an absent or expired session starts a
    /// fresh one.
    async fn append(&self, session_id: &str, turn: Turn) -> Result<()>;

    /// Append turns in order. Backends that can do so should make this
    /// all-or-nothing; the default appends one by one.
    async fn append_all(&self, session_id: &str, turns: Vec<Turn>) -> Result<()> {
        for turn in turns {
            self.append(session_id, turn).await?;
        }
        Ok(())
    }

    async fn touch_expiry(&self, session_id: &str) -> Result<()>;

    async fn clear(&self, session_id: &str) -> Result<()>;
}

/// Nearest-neighbour search over chunk vectors.
///
/// Returns at most `k` chunks ordered by descending similarity. Any
/// backend (flat, approximate, hybrid lexical+vector) that honours this
/// ordering can be substituted.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn similarity_search(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>>;
}
