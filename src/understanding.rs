//! Query Understanding stage.
//!
//! One non-streaming enrichment call rewrites the utterance into a
//! standalone question, keywords and a hypothetical answer. The stage
//! never fails the request: any failure falls back to the raw utterance
//! with the query marked degraded.

use tracing::{debug, warn};

use context_chat_core::llm::LanguageModel;
use context_chat_core::models::{RewrittenQuery, Turn};
use context_chat_core::query;
use context_chat_core::{PipelineError, RequestState};

use crate::config::PipelineSettings;

pub async fn understand(
    model: &dyn LanguageModel,
    utterance: &str,
    history: &[Turn],
    settings: &PipelineSettings,
) -> RewrittenQuery {
    if !settings.query_expansion {
        return query::fallback(utterance, settings.max_keywords, false);
    }

    match rewrite(model, utterance, history, settings).await {
        Ok(rewritten) => {
            debug!(
                question = %rewritten.resolved_question,
                keywords = ?rewritten.keywords,
                hypothetical = rewritten.hypothetical_answer.is_some(),
                "query rewritten"
            );
            rewritten
        }
        Err(e) => {
            warn!(error = %e, "query understanding degraded, using the raw utterance");
            query::fallback(utterance, settings.max_keywords, true)
        }
    }
}

async fn rewrite(
    model: &dyn LanguageModel,
    utterance: &str,
    history: &[Turn],
    settings: &PipelineSettings,
) -> Result<RewrittenQuery, PipelineError> {
    let request = query::rewrite_request(utterance, history);
    let raw = tokio::time::timeout(settings.understanding_timeout, model.complete(&request))
        .await
        .map_err(|_| PipelineError::Timeout {
            stage: RequestState::Understanding,
            after: settings.understanding_timeout,
        })?
        .map_err(|e| PipelineError::UnderstandingDegraded(format!("{:#}", e)))?;

    query::parse_rewrite(&raw, settings.max_keywords)
        .map_err(|e| PipelineError::UnderstandingDegraded(format!("unusable rewrite: {:#}", e)))
}
