//! The request orchestrator.
//!
//! [`Pipeline::answer`] drives one utterance through
//! `Received → Understanding → Retrieving → Generating → Persisting → Completed`
//! on its own task, and hands the caller an [`AnswerStream`] of events.
//! Any non-terminal state may end in `Failed`.
//!
//! # Events
//!
//! | Event | When |
//! |-------|------|
//! | [`AnswerEvent::Stage`] | on every state transition |
//! | [`AnswerEvent::Fragment`] | answer text, as the model produces it |
//! | [`AnswerEvent::Completed`] | terminal: the answer was generated and saved |
//! | [`AnswerEvent::Failed`] | terminal: typed failure; follows any fragments already sent |
//!
//! # Sessions
//!
//! History is read and the new turn pair written under a per-session
//! lock held for the whole request, so concurrent requests on one session
//! run in some serial order. A request that fails or is abandoned writes
//! nothing.
//!
//! # Cancellation
//!
//! Dropping the [`AnswerStream`] cancels the request task, which drops the
//! in-flight backend call.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, info_span, warn, Instrument};

use context_chat_core::embedding::Embedder;
use context_chat_core::llm::LanguageModel;
use context_chat_core::models::{FinalAnswer, Turn};
use context_chat_core::store::{SessionStore, VectorStore};
use context_chat_core::{PipelineError, RequestState};

use crate::config::PipelineSettings;
use crate::locks::SessionLocks;
use crate::{generation, retrieval, understanding};

#[derive(Debug)]
pub enum AnswerEvent {
    Stage(RequestState),
    Fragment(String),
    Completed(FinalAnswer),
    Failed(PipelineError),
}

impl AnswerEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AnswerEvent::Completed(_) | AnswerEvent::Failed(_))
    }
}

/// Event stream for one request. Dropping it abandons the request.
pub struct AnswerStream {
    events: ReceiverStream<AnswerEvent>,
    _cancel: DropGuard,
}

impl AnswerStream {
    /// Drain the stream and return the terminal outcome.
    ///
    /// A request task that ends without a terminal event (it panicked)
    /// reports [`PipelineError::Cancelled`].
    pub async fn into_final(mut self) -> Result<FinalAnswer, PipelineError> {
        while let Some(event) = self.next().await {
            match event {
                AnswerEvent::Completed(answer) => return Ok(answer),
                AnswerEvent::Failed(e) => return Err(e),
                _ => {}
            }
        }
        Err(PipelineError::Cancelled)
    }
}

impl Stream for AnswerStream {
    type Item = AnswerEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_next_unpin(cx)
    }
}

struct Inner {
    sessions: Arc<dyn SessionStore>,
    vectors: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    model: Arc<dyn LanguageModel>,
    settings: PipelineSettings,
    locks: SessionLocks,
}

/// Cheap to clone; clones share backends and session locks.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<Inner>,
}

impl Pipeline {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        vectors: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn LanguageModel>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                sessions,
                vectors,
                embedder,
                model,
                settings,
                locks: SessionLocks::new(),
            }),
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.inner.settings
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.inner.sessions
    }

    /// Start answering `utterance` within `session_id`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn answer(
        &self,
        session_id: impl Into<String>,
        utterance: impl Into<String>,
    ) -> AnswerStream {
        let session_id = session_id.into();
        let (tx, rx) = mpsc::channel(self.inner.settings.stream_buffer.max(1));
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let span = info_span!(
            "answer",
            session_id = %session_id,
            request_id = %uuid::Uuid::new_v4()
        );
        let request = Request {
            inner: self.inner.clone(),
            user_turn: Turn::user(utterance),
            session_id,
            events: tx,
            state: RequestState::Received,
        };

        tokio::spawn(
            async move {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => debug!("caller went away, request abandoned"),
                    _ = request.run() => {}
                }
            }
            .instrument(span),
        );

        AnswerStream {
            events: ReceiverStream::new(rx),
            _cancel: cancel.drop_guard(),
        }
    }

    /// Answer and wait for the outcome, discarding intermediate events.
    pub async fn ask(
        &self,
        session_id: impl Into<String>,
        utterance: impl Into<String>,
    ) -> Result<FinalAnswer, PipelineError> {
        self.answer(session_id, utterance).into_final().await
    }
}

struct Request {
    inner: Arc<Inner>,
    session_id: String,
    user_turn: Turn,
    events: mpsc::Sender<AnswerEvent>,
    state: RequestState,
}

impl Request {
    async fn run(mut self) {
        let started = Instant::now();
        match self.execute().await {
            Ok(answer) => {
                info!(
                    chars = answer.text.chars().count(),
                    citations = answer.citations.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "answer completed"
                );
                if self.transition(RequestState::Completed).await.is_ok() {
                    let _ = self.events.send(AnswerEvent::Completed(answer)).await;
                }
            }
            Err(PipelineError::Cancelled) => debug!(state = %self.state, "caller went away"),
            Err(e) => {
                warn!(state = %self.state, error = %e, "request failed");
                if self.transition(RequestState::Failed).await.is_ok() {
                    let _ = self.events.send(AnswerEvent::Failed(e)).await;
                }
            }
        }
    }

    async fn execute(&mut self) -> Result<FinalAnswer, PipelineError> {
        let inner = self.inner.clone();
        let settings = &inner.settings;
        self.emit(AnswerEvent::Stage(RequestState::Received)).await?;

        let _lease = inner.locks.acquire(&self.session_id).await;
        let history = self.load_history().await?;

        self.transition(RequestState::Understanding).await?;
        let utterance = &self.user_turn.text;
        let query = understanding::understand(&*inner.model, utterance, &history, settings).await;

        self.transition(RequestState::Retrieving).await?;
        let retrieved = retrieval::retrieve(
            &*inner.embedder,
            &*inner.vectors,
            &query,
            &settings.retrieval,
            settings.retrieval_timeout,
        )
        .await?;
        if retrieved.no_context() {
            info!(candidates = retrieved.candidates_seen, "no relevant context found");
        }

        self.transition(RequestState::Generating).await?;
        let answer = generation::generate(
            &*inner.model,
            &query.resolved_question,
            &retrieved.chunks,
            &history,
            settings,
            &self.events,
        )
        .await?;

        self.transition(RequestState::Persisting).await?;
        self.persist(&answer).await?;
        Ok(answer)
    }

    async fn load_history(&self) -> Result<Vec<Turn>, PipelineError> {
        let settings = &self.inner.settings;
        let unavailable = |reason: String| PipelineError::SessionStoreUnavailable {
            reason,
            unsaved_answer: None,
        };
        let limit = settings.session_timeout;
        let session = tokio::time::timeout(limit, self.inner.sessions.get(&self.session_id))
            .await
            .map_err(|_| unavailable(format!("history load timed out after {:?}", limit)))?
            .map_err(|e| unavailable(format!("{:#}", e)))?;

        Ok(session
            .map(|s| s.recent_turns(settings.history_limit).to_vec())
            .unwrap_or_default())
    }

    async fn persist(&self, answer: &FinalAnswer) -> Result<(), PipelineError> {
        let limit = self.inner.settings.session_timeout;
        let sessions = &self.inner.sessions;
        let unsaved = |reason: String| PipelineError::SessionStoreUnavailable {
            reason,
            unsaved_answer: Some(answer.clone()),
        };

        let turns = vec![
            self.user_turn.clone(),
            Turn::assistant(answer.text.clone(), answer.citations.clone()),
        ];
        tokio::time::timeout(limit, sessions.append_all(&self.session_id, turns))
            .await
            .map_err(|_| unsaved(format!("append timed out after {:?}", limit)))?
            .map_err(|e| unsaved(format!("{:#}", e)))?;

        match tokio::time::timeout(limit, sessions.touch_expiry(&self.session_id)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %format!("{:#}", e), "failed to extend session expiry"),
            Err(_) => warn!("extending session expiry timed out"),
        }
        Ok(())
    }

    async fn transition(&mut self, next: RequestState) -> Result<(), PipelineError> {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        debug!(from = %self.state, to = %next, "transition");
        self.state = next;
        self.emit(AnswerEvent::Stage(next)).await
    }

    async fn emit(&self, event: AnswerEvent) -> Result<(), PipelineError> {
        self.events
            .send(event)
            .await
            .map_err(|_| PipelineError::Cancelled)
    }
}
