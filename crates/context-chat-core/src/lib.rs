//! # Context Chat Core
//!
//! Runtime-free logic for Context Chat: the conversation data model, the
//! backend capability traits, the request state machine, and the pure
//! algorithms behind each pipeline stage (candidate ranking, keyword
//! extraction, prompt assembly under a budget, reasoning splitting and
//! citation grounding).
//!
//! This crate contains no tokio, sqlx, or HTTP dependencies. Deadlines,
//! streaming tasks and concrete network backends live in the
//! `context-chat` app crate.

pub mod citation;
pub mod embedding;
pub mod error;
pub mod llm;
pub mod models;
pub mod prompt;
pub mod query;
pub mod retrieval;
pub mod state;
pub mod store;

pub use error::PipelineError;
pub use state::RequestState;
