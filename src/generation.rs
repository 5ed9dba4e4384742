//! Generation stage: assemble the prompt, stream the answer, ground it.
//!
//! Fragments are forwarded to the caller as they arrive, minus any
//! reasoning trace. Citations are resolved from the complete answer
//! afterwards, against the chunks that actually made it into the prompt.

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use context_chat_core::citation::ground;
use context_chat_core::llm::LanguageModel;
use context_chat_core::models::{FinalAnswer, RetrievedChunk, Turn};
use context_chat_core::prompt::{assemble, AnswerSplitter, PromptOptions};
use context_chat_core::{PipelineError, RequestState};

use crate::config::PipelineSettings;
use crate::pipeline::AnswerEvent;

pub async fn generate(
    model: &dyn LanguageModel,
    question: &str,
    chunks: &[RetrievedChunk],
    history: &[Turn],
    settings: &PipelineSettings,
    events: &mpsc::Sender<AnswerEvent>,
) -> Result<FinalAnswer, PipelineError> {
    let prompt = assemble(
        question,
        chunks,
        history,
        &PromptOptions {
            max_chars: settings.max_prompt_chars,
            reasoning: settings.reasoning,
        },
    );
    if prompt.over_budget {
        warn!(
            chars = prompt.request.char_len(),
            budget = settings.max_prompt_chars,
            "prompt exceeds budget even without history and context"
        );
    } else if prompt.dropped_turns > 0 || prompt.dropped_chunks > 0 {
        debug!(
            dropped_turns = prompt.dropped_turns,
            dropped_chunks = prompt.dropped_chunks,
            "prompt trimmed to budget"
        );
    }

    let limit = settings.generation_timeout;
    let deadline = Instant::now() + limit;
    let timed_out = |_| PipelineError::Timeout {
        stage: RequestState::Generating,
        after: limit,
    };

    let mut fragments = timeout_at(deadline, model.stream(&prompt.request))
        .await
        .map_err(timed_out)?
        .map_err(|e| PipelineError::GenerationFailed(format!("{:#}", e)))?;

    let mut splitter = AnswerSplitter::new(settings.reasoning);
    while let Some(item) = timeout_at(deadline, fragments.next()).await.map_err(timed_out)? {
        let fragment = item.map_err(|e| PipelineError::GenerationFailed(format!("{:#}", e)))?;
        if let Some(text) = splitter.push(&fragment) {
            forward(events, text).await?;
        }
    }
    if let Some(text) = splitter.finish() {
        forward(events, text).await?;
    }

    let text = splitter.answer().to_string();
    if text.trim().is_empty() {
        return Err(PipelineError::GenerationFailed(
            "model returned an empty answer".to_string(),
        ));
    }

    let report = ground(&text, &prompt.chunks);
    if !report.rejected.is_empty() {
        if settings.strict_citations {
            return Err(PipelineError::GenerationFailed(format!(
                "answer cites chunks outside the supplied context: {}",
                report.rejected.join(", ")
            )));
        }
        warn!(rejected = ?report.rejected, "dropped citations outside the supplied context");
    }

    Ok(FinalAnswer {
        text,
        citations: report.citations,
    })
}

async fn forward(events: &mpsc::Sender<AnswerEvent>, text: String) -> Result<(), PipelineError> {
    events
        .send(AnswerEvent::Fragment(text))
        .await
        .map_err(|_| PipelineError::Cancelled)
}
