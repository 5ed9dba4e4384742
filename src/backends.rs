//! Startup wiring: turn a [`Config`] into a ready [`Pipeline`].
//!
//! | Concern | `memory` | `sqlite` |
//! |---------|----------|----------|
//! | sessions (`[session].backend`) | [`InMemorySessionStore`] | [`SqliteSessionStore`] |
//! | vectors (`[retrieval].backend`) | [`InMemoryVectorStore`] | [`SqliteVectorStore`] |
//!
//! SQLite backends share one pool; the schema is applied on open.

use std::sync::Arc;

use anyhow::{bail, Result};
use sqlx::SqlitePool;

use context_chat_core::store::memory::{InMemorySessionStore, InMemoryVectorStore};
use context_chat_core::store::{SessionStore, VectorStore};

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::llm::create_model;
use crate::pipeline::Pipeline;
use crate::sqlite_store::{SqliteSessionStore, SqliteVectorStore};
use crate::{db, migrate};

fn uses_sqlite(config: &Config) -> bool {
    config.session.backend == "sqlite" || config.retrieval.backend == "sqlite"
}

async fn open_pool(config: &Config) -> Result<SqlitePool> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;
    Ok(pool)
}

pub fn session_store(config: &Config, pool: Option<&SqlitePool>) -> Result<Arc<dyn SessionStore>> {
    match (config.session.backend.as_str(), pool) {
        ("memory", _) => Ok(Arc::new(InMemorySessionStore::new(config.session_ttl()))),
        ("sqlite", Some(pool)) => Ok(Arc::new(SqliteSessionStore::new(
            pool.clone(),
            config.session_ttl(),
        ))),
        ("sqlite", None) => bail!("sqlite session backend needs a database pool"),
        (other, _) => bail!("Unknown session backend: {}", other),
    }
}

pub fn vector_store(config: &Config, pool: Option<&SqlitePool>) -> Result<Arc<dyn VectorStore>> {
    match (config.retrieval.backend.as_str(), pool) {
        ("memory", _) => Ok(Arc::new(InMemoryVectorStore::new())),
        ("sqlite", Some(pool)) => Ok(Arc::new(SqliteVectorStore::new(pool.clone()))),
        ("sqlite", None) => bail!("sqlite retrieval backend needs a database pool"),
        (other, _) => bail!("Unknown retrieval backend: {}", other),
    }
}

/// Build the configured pipeline.
pub async fn build_pipeline(config: &Config) -> Result<Pipeline> {
    let pool = if uses_sqlite(config) {
        Some(open_pool(config).await?)
    } else {
        None
    };

    Ok(Pipeline::new(
        session_store(config, pool.as_ref())?,
        vector_store(config, pool.as_ref())?,
        create_embedder(&config.embedding)?,
        create_model(&config.llm)?,
        config.settings(),
    ))
}

/// Open the SQLite session store directly, for maintenance commands.
pub async fn open_session_store(config: &Config) -> Result<SqliteSessionStore> {
    Ok(SqliteSessionStore::new(open_pool(config).await?, config.session_ttl()))
}

/// Open the SQLite vector store directly, for loading records.
pub async fn open_vector_store(config: &Config) -> Result<SqliteVectorStore> {
    Ok(SqliteVectorStore::new(open_pool(config).await?))
}
