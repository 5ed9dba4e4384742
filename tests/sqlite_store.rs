//! SQLite session and vector stores against a temporary database file.

use std::time::Duration;

use tempfile::TempDir;

use context_chat::config::Config;
use context_chat::sqlite_store::{SqliteSessionStore, SqliteVectorStore};
use context_chat::{db, import, migrate};
use context_chat_core::models::{Chunk, ChunkRecord, Citation, Role, Turn};
use context_chat_core::store::{SessionStore, VectorStore};

fn test_config(tmp: &TempDir) -> Config {
    let mut config = Config::default();
    config.db.path = tmp.path().join("data").join("ctxchat.sqlite");
    config
}

async fn pool(config: &Config) -> sqlx::SqlitePool {
    let pool = db::connect(config).await.unwrap();
    migrate::apply(&pool).await.unwrap();
    pool
}

fn record(id: &str, embedding: Vec<f32>) -> ChunkRecord {
    ChunkRecord {
        chunk: Chunk {
            id: id.into(),
            document_id: format!("doc-{}", id),
            position: 3,
            text: format!("text of {}", id),
            document_updated_at: 42,
        },
        embedding,
    }
}

#[tokio::test]
async fn test_migrations_are_idempotent() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    migrate::run_migrations(&config).await.unwrap();
    migrate::run_migrations(&config).await.unwrap();
    assert!(config.db.path.exists());
}

#[tokio::test]
async fn test_session_roundtrip_keeps_order_and_citations() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let store = SqliteSessionStore::new(pool(&config).await, Duration::from_secs(3600));

    let citation = Citation {
        chunk_id: "c1".into(),
        document_id: "france.md".into(),
        position: 0,
        excerpt: "Paris is the capital of France.".into(),
    };
    store
        .append_all(
            "s1",
            vec![
                Turn::user("What is the capital of France?"),
                Turn::assistant("Paris [cite:c1].", vec![citation.clone()]),
            ],
        )
        .await
        .unwrap();
    store.append("s1", Turn::user("Thanks")).await.unwrap();

    let session = store.get("s1").await.unwrap().unwrap();
    assert_eq!(session.id, "s1");
    assert_eq!(session.turns.len(), 3);
    assert_eq!(session.turns[0].role, Role::User);
    assert_eq!(session.turns[1].role, Role::Assistant);
    assert_eq!(session.turns[1].citations, vec![citation]);
    assert_eq!(session.turns[2].text, "Thanks");
    assert!(session.expires_at > session.created_at);

    assert!(store.get("other").await.unwrap().is_none());
}

#[tokio::test]
async fn test_expired_session_is_hidden_and_restarts() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let store = SqliteSessionStore::new(pool(&config).await, Duration::from_millis(50));

    store.append("s1", Turn::user("old")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(store.get("s1").await.unwrap().is_none());

    store.append("s1", Turn::user("new")).await.unwrap();
    let session = store.get("s1").await.unwrap().unwrap();
    assert_eq!(session.turns.len(), 1);
    assert_eq!(session.turns[0].text, "new");
}

#[tokio::test]
async fn test_touch_extends_expiry() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let store = SqliteSessionStore::new(pool(&config).await, Duration::from_secs(60));

    store.append("s1", Turn::user("hi")).await.unwrap();
    let before = store.get("s1").await.unwrap().unwrap().expires_at;
    tokio::time::sleep(Duration::from_millis(20)).await;
    store.touch_expiry("s1").await.unwrap();
    let after = store.get("s1").await.unwrap().unwrap().expires_at;
    assert!(after > before);

    // Touching an unknown session is a no-op
    store.touch_expiry("ghost").await.unwrap();
    assert!(store.get("ghost").await.unwrap().is_none());
}

#[tokio::test]
async fn test_clear_and_purge() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let pool = pool(&config).await;

    let store = SqliteSessionStore::new(pool.clone(), Duration::from_secs(60));
    store.append("keep", Turn::user("a")).await.unwrap();
    store.append("drop", Turn::user("b")).await.unwrap();
    store.clear("drop").await.unwrap();
    assert!(store.get("drop").await.unwrap().is_none());
    assert!(store.get("keep").await.unwrap().is_some());

    let short = SqliteSessionStore::new(pool, Duration::from_millis(10));
    short.append("brief", Turn::user("c")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(short.purge_expired().await.unwrap(), 1);
    assert!(store.get("keep").await.unwrap().is_some());
}

#[tokio::test]
async fn test_vector_search_orders_and_bounds() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let store = SqliteVectorStore::new(pool(&config).await);

    store.insert(&record("a", vec![1.0, 0.0])).await.unwrap();
    store.insert(&record("b", vec![0.7, 0.7])).await.unwrap();
    store.insert(&record("c", vec![0.0, 1.0])).await.unwrap();
    // Replaces by id
    store.insert(&record("c", vec![-1.0, 0.0])).await.unwrap();
    assert_eq!(store.count().await.unwrap(), 3);

    let hits = store.similarity_search(&[1.0, 0.0], 2).await.unwrap();
    let ids: Vec<&str> = hits.iter().map(|h| h.chunk.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);
    assert!(hits[0].score >= hits[1].score);
    assert_eq!(hits[0].chunk.position, 3);
    assert_eq!(hits[0].chunk.document_updated_at, 42);

    assert!(store.similarity_search(&[1.0, 0.0], 0).await.unwrap().is_empty());
    // Different dimensionality matches nothing
    assert!(store
        .similarity_search(&[1.0, 0.0, 0.0], 5)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_vector_search_cut_keeps_newest_among_ties() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let store = SqliteVectorStore::new(pool(&config).await);

    for (id, updated) in [("old1", 1), ("old2", 2), ("new", 100)] {
        let mut r = record(id, vec![1.0, 0.0]);
        r.chunk.document_updated_at = updated;
        store.insert(&r).await.unwrap();
    }
    let hits = store.similarity_search(&[1.0, 0.0], 1).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk.id, "new");
}

#[tokio::test]
async fn test_import_skips_bad_lines() {
    let tmp = TempDir::new().unwrap();
    let mut config = test_config(&tmp);
    config.embedding.dims = Some(2);

    let path = tmp.path().join("chunks.jsonl");
    let lines = [
        serde_json::to_string(&record("a", vec![1.0, 0.0])).unwrap(),
        String::new(),
        "{ not json".to_string(),
        serde_json::to_string(&record("b", vec![1.0, 0.0, 0.0])).unwrap(),
        r#"{"id":"c","document_id":"d","position":0,"text":"t","embedding":[0.5,0.5]}"#.to_string(),
    ];
    std::fs::write(&path, lines.join("\n")).unwrap();

    let stats = import::import_records(&config, &path).await.unwrap();
    assert_eq!(stats.imported, 2);
    assert_eq!(stats.skipped, 2);

    let store = SqliteVectorStore::new(pool(&config).await);
    assert_eq!(store.count().await.unwrap(), 2);
}
