//! Query rewriting helpers: enrichment prompt, reply parsing, keywords.
//!
//! The enrichment call asks the model for one JSON object:
//!
//! ```json
//! {"question": "...", "keywords": ["..."], "hypothetical_answer": "..."}
//! ```
//!
//! When the call cannot be used, [`fallback`] builds a query from the raw
//! utterance with locally extracted keywords.

use anyhow::{anyhow, Result};
use serde::Deserialize;

use crate::llm::{ChatMessage, CompletionRequest};
use crate::models::{RewrittenQuery, Turn};

pub const REWRITE_INSTRUCTIONS: &str = "\
You rewrite a user's latest message into a standalone search query.
Use the conversation history to resolve pronouns and ellipsis, so that the
question makes sense without the history (\"what about its side effects\"
becomes \"what are the side effects of <the entity discussed>\").
Then write a short, plausible answer to the resolved question as it might
appear in a reference document. It is only used for search and is never
shown to the user.
Reply with a single JSON object and nothing else:
{\"question\": string, \"keywords\": [string], \"hypothetical_answer\": string}";

const STOPWORDS: &[&str] = &[
    "a", "about", "an", "and", "are", "as", "at", "be", "but", "by", "can", "could", "did",
    "do", "does", "for", "from", "had", "has", "have", "how", "i", "in", "is", "it", "its",
    "me", "my", "of", "on", "or", "please", "tell", "that", "the", "their", "them", "there",
    "these", "they", "this", "those", "to", "was", "we", "were", "what", "when", "where",
    "which", "who", "whom", "why", "will", "with", "would", "you", "your",
];

#[derive(Debug, Deserialize)]
struct RewriteReply {
    #[serde(default)]
    question: String,
    #[serde(default)]
    keywords: KeywordList,
    #[serde(default)]
    hypothetical_answer: Option<String>,
}

/// Models return keywords either as an array or a comma-separated string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum KeywordList {
    List(Vec<String>),
    Joined(String),
}

impl Default for KeywordList {
    fn default() -> Self {
        KeywordList::List(Vec::new())
    }
}

impl KeywordList {
    fn into_vec(self) -> Vec<String> {
        match self {
            KeywordList::List(v) => v,
            KeywordList::Joined(s) => s.split(',').map(str::to_string).collect(),
        }
    }
}

/// Build the enrichment request for `utterance` given recent history.
pub fn rewrite_request(utterance: &str, history: &[Turn]) -> CompletionRequest {
    let mut transcript = String::new();
    for turn in history {
        transcript.push_str(turn.role.as_str());
        transcript.push_str(": ");
        transcript.push_str(&turn.text);
        transcript.push('\n');
    }
    if transcript.is_empty() {
        transcript.push_str("(no previous messages)\n");
    }
    CompletionRequest {
        system: REWRITE_INSTRUCTIONS.to_string(),
        messages: vec![ChatMessage::user(format!(
            "Conversation history:\n{}\nLatest message: {}",
            transcript, utterance
        ))],
        stream: false,
    }
}

/// Parse the model's enrichment reply into a [`RewrittenQuery`].
///
/// Surrounding prose and code fences are tolerated: the first `{` through
/// the last `}` is decoded. An empty `question` is an error.
pub fn parse_rewrite(raw: &str, max_keywords: usize) -> Result<RewrittenQuery> {
    let start = raw
        .find('{')
        .ok_or_else(|| anyhow!("rewrite reply contains no JSON object"))?;
    let end = raw
        .rfind('}')
        .filter(|&end| end > start)
        .ok_or_else(|| anyhow!("rewrite reply contains no JSON object"))?;
    let reply: RewriteReply = serde_json::from_str(&raw[start..=end])?;

    let question = reply.question.trim().to_string();
    if question.is_empty() {
        anyhow::bail!("rewrite reply has an empty question");
    }

    let mut keywords = normalize_keywords(reply.keywords.into_vec(), max_keywords);
    if keywords.is_empty() {
        keywords = extract_keywords(&question, max_keywords);
    }

    Ok(RewrittenQuery {
        resolved_question: question,
        keywords,
        hypothetical_answer: reply
            .hypothetical_answer
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty()),
        degraded: false,
    })
}

/// Query built from the raw utterance, without model help.
pub fn fallback(utterance: &str, max_keywords: usize, degraded: bool) -> RewrittenQuery {
    RewrittenQuery {
        resolved_question: utterance.trim().to_string(),
        keywords: extract_keywords(utterance, max_keywords),
        hypothetical_answer: None,
        degraded,
    }
}

fn normalize_keywords(raw: Vec<String>, max: usize) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for k in raw {
        if out.len() >= max {
            break;
        }
        let k = k.trim().to_lowercase();
        if !k.is_empty() && !out.contains(&k) {
            out.push(k);
        }
    }
    out
}

/// Salient terms of `text`: lowercased, stop words and short tokens
/// removed, first occurrence order, at most `max`.
pub fn extract_keywords(text: &str, max: usize) -> Vec<String> {
    let tokens = text
        .split(|c: char| !c.is_alphanumeric() && c != '-')
        .map(|t| t.trim_matches('-').to_lowercase())
        .filter(|t| t.chars().count() > 2 && !STOPWORDS.contains(&t.as_str()))
        .collect();
    normalize_keywords(tokens, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json() {
        let raw = r#"{"question":"What is the population of France?","keywords":["France","population"],"hypothetical_answer":"France has about 68 million inhabitants."}"#;
        let q = parse_rewrite(raw, 8).unwrap();
        assert_eq!(q.resolved_question, "What is the population of France?");
        assert_eq!(q.keywords, vec!["france", "population"]);
        assert_eq!(
            q.hypothetical_answer.as_deref(),
            Some("France has about 68 million inhabitants.")
        );
        assert!(!q.degraded);
    }

    #[test]
    fn test_parse_tolerates_fences_and_joined_keywords() {
        let raw = "Sure!\n```json\n{\"question\": \"side effects of ibuprofen\", \"keywords\": \"ibuprofen, side effects, ibuprofen\"}\n```";
        let q = parse_rewrite(raw, 8).unwrap();
        assert_eq!(q.resolved_question, "side effects of ibuprofen");
        assert_eq!(q.keywords, vec!["ibuprofen", "side effects"]);
        assert!(q.hypothetical_answer.is_none());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_rewrite("no json here", 8).is_err());
        assert!(parse_rewrite("} backwards {", 8).is_err());
        assert!(parse_rewrite(r#"{"question": "  "}"#, 8).is_err());
    }

    #[test]
    fn test_keywords_are_bounded() {
        let text = "alpha beta gamma delta epsilon";
        assert!(extract_keywords(text, 0).is_empty());
        assert_eq!(extract_keywords(text, 2), vec!["alpha", "beta"]);
        let q = parse_rewrite(r#"{"question":"q","keywords":["a","b","c"]}"#, 1).unwrap();
        assert_eq!(q.keywords, vec!["a"]);
    }

    #[test]
    fn test_parse_falls_back_to_local_keywords() {
        let q = parse_rewrite(r#"{"question":"Capital city of France"}"#, 8).unwrap();
        assert_eq!(q.keywords, vec!["capital", "city", "france"]);
    }

    #[test]
    fn test_keywords_bounded() {
        let raw = r#"{"question":"q?","keywords":["a1","b2","c3","d4"]}"#;
        assert_eq!(parse_rewrite(raw, 2).unwrap().keywords.len(), 2);
        assert_eq!(extract_keywords("alpha beta gamma delta", 3).len(), 3);
    }

    #[test]
    fn test_extract_keywords_drops_stopwords() {
        let k = extract_keywords("What is the capital of France?", 8);
        assert_eq!(k, vec!["capital", "france"]);
    }

    #[test]
    fn test_fallback_keeps_utterance() {
        let q = fallback("  What is its population? ", 8, true);
        assert_eq!(q.resolved_question, "What is its population?");
        assert_eq!(q.keywords, vec!["population"]);
        assert!(q.degraded);
        assert_eq!(q.retrieval_text(), "What is its population?");
    }

    #[test]
    fn test_rewrite_request_includes_history() {
        let history = vec![
            Turn::user("What is the capital of France?"),
            Turn::assistant("Paris.", vec![]),
        ];
        let req = rewrite_request("What is its population?", &history);
        assert!(!req.stream);
        assert_eq!(req.messages.len(), 1);
        let body = &req.messages[0].content;
        assert!(body.contains("user: What is the capital of France?"));
        assert!(body.contains("assistant: Paris."));
        assert!(body.ends_with("Latest message: What is its population?"));
    }
}
