//! # Context Chat
//!
//! Retrieval-augmented conversational answers over a local knowledge base.
//!
//! Each user utterance flows through three stages under a per-session
//! orchestrator: the query is rewritten with history and a hypothetical
//! answer, matching chunks are retrieved by vector similarity, and the
//! answer is streamed back with citations to the chunks it used. The
//! user/assistant turn pair is then appended to the session history.
//!
//! ## Architecture
//!
//! ```text
//! utterance ──▶ Understanding ──▶ Retrieval ──▶ Generation ──▶ Persisting
//!                 (LLM, JSON)     (embed+search)  (LLM stream)   (session store)
//!                      │               │               │
//!                      ▼               ▼               ▼
//!                 RewrittenQuery  RetrievedChunk*  Fragment* + FinalAnswer
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ctxchat init                         # create database
//! ctxchat import chunks.jsonl          # load pre-embedded chunks
//! ctxchat ask "What is the capital of France?"
//! ctxchat chat --session demo          # interactive loop
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`pipeline`] | Request orchestrator and event stream |
//! | [`understanding`] | Query rewriting stage |
//! | [`retrieval`] | Embedding + similarity search stage |
//! | [`generation`] | Prompt assembly, streaming, citations |
//! | [`locks`] | Per-session mutual exclusion |
//! | [`embedding`] | Embedding provider implementations |
//! | [`llm`] | Language-model backends (Ollama, OpenAI) |
//! | [`sqlite_store`] | SQLite session and vector stores |
//! | [`backends`] | Startup wiring |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod backends;
pub mod chat_cmd;
pub mod config;
pub mod db;
pub mod embedding;
pub mod generation;
pub mod import;
pub mod llm;
pub mod locks;
pub mod logging;
pub mod migrate;
pub mod pipeline;
pub mod retrieval;
pub mod sqlite_store;
pub mod understanding;

pub use context_chat_core::{PipelineError, RequestState};
pub use pipeline::{AnswerEvent, AnswerStream, Pipeline};
