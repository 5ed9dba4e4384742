//! Retrieval stage: embed the rewritten query, search, rank.
//!
//! The embedding call and the similarity search share one deadline.
//! An empty result is a valid outcome; only an unreachable or
//! misbehaving backend is an error.

use tokio::time::{timeout_at, Duration, Instant};
use tracing::debug;

use context_chat_core::embedding::Embedder;
use context_chat_core::models::RewrittenQuery;
use context_chat_core::retrieval::{rank_candidates, RetrievalOutcome, RetrievalParams};
use context_chat_core::store::VectorStore;
use context_chat_core::{PipelineError, RequestState};

pub async fn retrieve(
    embedder: &dyn Embedder,
    store: &dyn VectorStore,
    query: &RewrittenQuery,
    params: &RetrievalParams,
    limit: Duration,
) -> Result<RetrievalOutcome, PipelineError> {
    if params.top_k == 0 {
        return Ok(RetrievalOutcome::default());
    }

    let deadline = Instant::now() + limit;
    let timed_out = |_| PipelineError::Timeout {
        stage: RequestState::Retrieving,
        after: limit,
    };

    let vector = timeout_at(deadline, embedder.embed(query.retrieval_text()))
        .await
        .map_err(timed_out)?
        .map_err(|e| PipelineError::RetrievalUnavailable(format!("embedding failed: {:#}", e)))?;

    let dims = embedder.dims();
    if vector.is_empty() || (dims > 0 && vector.len() != dims) {
        return Err(PipelineError::RetrievalUnavailable(format!(
            "embedding dimension mismatch: {} returned {} values, expected {}",
            embedder.model_name(),
            vector.len(),
            dims
        )));
    }

    let search = store.similarity_search(&vector, params.candidate_count());
    let candidates = timeout_at(deadline, search)
        .await
        .map_err(timed_out)?
        .map_err(|e| PipelineError::RetrievalUnavailable(format!("vector store: {:#}", e)))?;

    let outcome = rank_candidates(candidates, query, params);
    debug!(
        candidates = outcome.candidates_seen,
        kept = outcome.chunks.len(),
        "retrieval ranked"
    );
    Ok(outcome)
}
