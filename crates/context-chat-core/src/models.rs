//! Core data types for the conversation pipeline.
//!
//! [`Session`] and [`Turn`] are the only values that outlive a request.
//! [`RetrievedChunk`] and [`RewrittenQuery`] are request-scoped and never
//! persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum excerpt length (in characters) carried by a [`Citation`].
pub const EXCERPT_CHARS: usize = 240;

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => anyhow::bail!("unknown turn role: {}", other),
        }
    }
}

/// Attribution for a generated answer: points at the chunk it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub chunk_id: String,
    pub document_id: String,
    /// Position of the chunk within its document.
    pub position: i64,
    pub excerpt: String,
}

impl Citation {
    pub fn from_chunk(chunk: &Chunk) -> Self {
        Self {
            chunk_id: chunk.id.clone(),
            document_id: chunk.document_id.clone(),
            position: chunk.position,
            excerpt: chunk.text.chars().take(EXCERPT_CHARS).collect(),
        }
    }
}

/// One message in a conversation. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// Sources used to produce an assistant turn; always empty for user turns.
    #[serde(default)]
    pub citations: Vec<Citation>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            timestamp: Utc::now(),
            citations: Vec::new(),
        }
    }

    pub fn assistant(text: impl Into<String>, citations: Vec<Citation>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            timestamp: Utc::now(),
            citations,
        }
    }
}

/// A bounded-lifetime conversation keyed by an opaque identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub turns: Vec<Turn>,
    pub created_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Generate a fresh opaque session identifier.
    pub fn new_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// The most recent `limit` turns, oldest first.
    pub fn recent_turns(&self, limit: usize) -> &[Turn] {
        let start = self.turns.len().saturating_sub(limit);
        &self.turns[start..]
    }
}

/// A unit of ingested text as the pipeline sees it (vector omitted).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub position: i64,
    pub text: String,
    /// Unix timestamp (seconds) of the source document's last update.
    /// Used as the recency tie-break during ranking.
    #[serde(default)]
    pub document_updated_at: i64,
}

/// Vector store wire record: a chunk together with its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    #[serde(flatten)]
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// A chunk paired with its raw similarity score, as returned by a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f64,
}

/// A chunk that survived ranking and threshold filtering for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    pub score: f64,
    /// 1-based rank within this retrieval call.
    pub rank: usize,
}

/// The retrieval-optimized form of a user utterance.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RewrittenQuery {
    /// The question with pronouns and ellipsis resolved from history.
    pub resolved_question: String,
    /// Salient keywords, bounded by configuration.
    pub keywords: Vec<String>,
    /// Plausible but unverified answer used only to enrich the embedding.
    pub hypothetical_answer: Option<String>,
    /// True when the enrichment call failed and this is the fallback query.
    pub degraded: bool,
}

impl RewrittenQuery {
    /// Text whose embedding drives retrieval: the hypothetical answer when
    /// present, otherwise the resolved question.
    pub fn retrieval_text(&self) -> &str {
        match &self.hypothetical_answer {
            Some(h) if !h.trim().is_empty() => h,
            _ => &self.resolved_question,
        }
    }
}

/// What a completed request hands back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalAnswer {
    pub text: String,
    pub citations: Vec<Citation>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_with(n: usize) -> Session {
        let now = Utc::now();
        Session {
            id: "s".into(),
            turns: (0..n).map(|i| Turn::user(format!("t{}", i))).collect(),
            created_at: now,
            last_access: now,
            expires_at: now,
        }
    }

    #[test]
    fn test_recent_turns_keeps_newest() {
        let s = session_with(5);
        let recent = s.recent_turns(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].text, "t3");
        assert_eq!(recent[1].text, "t4");
    }

    #[test]
    fn test_recent_turns_limit_larger_than_history() {
        let s = session_with(2);
        assert_eq!(s.recent_turns(20).len(), 2);
        assert!(s.recent_turns(0).is_empty());
    }

    #[test]
    fn test_retrieval_text_prefers_hypothetical() {
        let mut q = RewrittenQuery {
            resolved_question: "What is the population of France?".into(),
            ..Default::default()
        };
        assert_eq!(q.retrieval_text(), "What is the population of France?");
        q.hypothetical_answer = Some("France has about 68 million people.".into());
        assert_eq!(q.retrieval_text(), "France has about 68 million people.");
        q.hypothetical_answer = Some("   ".into());
        assert_eq!(q.retrieval_text(), "What is the population of France?");
    }

    #[test]
    fn test_citation_excerpt_is_bounded() {
        let chunk = Chunk {
            id: "c1".into(),
            document_id: "d1".into(),
            position: 3,
            text: "x".repeat(1000),
            document_updated_at: 0,
        };
        let c = Citation::from_chunk(&chunk);
        assert_eq!(c.excerpt.chars().count(), EXCERPT_CHARS);
        assert_eq!(c.position, 3);
    }

    #[test]
    fn test_chunk_record_wire_shape() {
        let line = r#"{"id":"c1","document_id":"d1","position":0,"text":"Paris","embedding":[1.0,0.0]}"#;
        let rec: ChunkRecord = serde_json::from_str(line).unwrap();
        assert_eq!(rec.chunk.id, "c1");
        assert_eq!(rec.chunk.document_updated_at, 0);
        assert_eq!(rec.embedding, vec![1.0, 0.0]);
    }

    #[test]
    fn test_role_roundtrip_str() {
        assert_eq!("user".parse::<Role>().unwrap(), Role::User);
        assert_eq!(Role::Assistant.as_str(), "assistant");
        assert!("system".parse::<Role>().is_err());
    }
}
