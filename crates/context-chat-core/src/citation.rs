//! Citation tags and grounding checks.
//!
//! Context blocks are tagged `[cite:<chunk id>]` and the model cites with
//! the same tag (several ids may share one tag, comma separated). Only ids
//! present in the supplied context become [`Citation`]s; anything else is
//! reported back as rejected.

use std::sync::OnceLock;

use regex::Regex;

use crate::models::{Citation, RetrievedChunk};

fn cite_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\[cite:\s*([^\]]+)\]").expect("valid citation pattern"))
}

pub fn cite_tag(chunk_id: &str) -> String {
    format!("[cite:{}]", chunk_id)
}

/// Chunk ids cited in `answer`, in first-appearance order, deduplicated.
pub fn cited_ids(answer: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for cap in cite_pattern().captures_iter(answer) {
        for id in cap[1].split(',') {
            let id = id.trim();
            if !id.is_empty() && !ids.iter().any(|seen| seen == id) {
                ids.push(id.to_string());
            }
        }
    }
    ids
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroundingReport {
    pub citations: Vec<Citation>,
    /// Cited ids that were not part of the supplied context.
    pub rejected: Vec<String>,
}

/// Match the ids cited in `answer` against the chunks that were in the prompt.
pub fn ground(answer: &str, context: &[RetrievedChunk]) -> GroundingReport {
    let mut report = GroundingReport::default();
    for id in cited_ids(answer) {
        match context.iter().find(|rc| rc.chunk.id == id) {
            Some(rc) => report.citations.push(Citation::from_chunk(&rc.chunk)),
            None => report.rejected.push(id),
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;

    fn rc(id: &str) -> RetrievedChunk {
        RetrievedChunk {
            chunk: Chunk {
                id: id.into(),
                document_id: "france.md".into(),
                position: 2,
                text: "Paris is the capital of France.".into(),
                document_updated_at: 0,
            },
            score: 0.82,
            rank: 1,
        }
    }

    #[test]
    fn test_cited_ids_order_and_dedup() {
        let ids = cited_ids("A [cite:c2]. B [cite: c1, c2]. C [cite:c3]");
        assert_eq!(ids, vec!["c2", "c1", "c3"]);
    }

    #[test]
    fn test_cited_ids_ignores_other_brackets() {
        assert!(cited_ids("see [1] and [source: x]").is_empty());
    }

    #[test]
    fn test_ground_keeps_known_and_rejects_unknown() {
        let report = ground("Paris [cite:c1]. Made up [cite:c9].", &[rc("c1")]);
        assert_eq!(report.citations.len(), 1);
        assert_eq!(report.citations[0].chunk_id, "c1");
        assert_eq!(report.citations[0].document_id, "france.md");
        assert_eq!(report.citations[0].position, 2);
        assert_eq!(report.rejected, vec!["c9"]);
    }

    #[test]
    fn test_ground_with_empty_context_cites_nothing() {
        let report = ground("Paris [cite:c1].", &[]);
        assert!(report.citations.is_empty());
        assert_eq!(report.rejected, vec!["c1"]);
    }

    #[test]
    fn test_tag_roundtrip() {
        assert_eq!(cited_ids(&cite_tag("doc-7#3")), vec!["doc-7#3"]);
    }
}
