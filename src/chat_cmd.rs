//! Conversation commands: `ask`, `chat`, `history` and `forget`.
//!
//! Answers stream to stdout as they are generated; citations and errors
//! follow once the request ends.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};

use context_chat_core::models::{Citation, Role, Session};
use context_chat_core::store::SessionStore;
use context_chat_core::PipelineError;

use crate::backends;
use crate::config::Config;
use crate::pipeline::{AnswerEvent, Pipeline};

fn write_citations(out: &mut impl Write, citations: &[Citation]) -> io::Result<()> {
    if citations.is_empty() {
        return Ok(());
    }
    writeln!(out)?;
    writeln!(out, "Sources:")?;
    for (i, c) in citations.iter().enumerate() {
        writeln!(
            out,
            "  [{}] {} (position {}, chunk {})",
            i + 1,
            c.document_id,
            c.position,
            c.chunk_id
        )?;
    }
    Ok(())
}

fn print_citations(citations: &[Citation]) {
    let _ = write_citations(&mut io::stdout(), citations);
}

/// The stdout part of a failure report. An answer that could not be saved
/// is written in full unless its fragments were already `streamed`.
fn write_unsaved(out: &mut impl Write, e: &PipelineError, streamed: bool) -> io::Result<()> {
    if streamed {
        writeln!(out)?;
    }
    if let PipelineError::SessionStoreUnavailable {
        unsaved_answer: Some(answer),
        ..
    } = e
    {
        if !streamed {
            writeln!(out, "{}", answer.text)?;
        }
        write_citations(out, &answer.citations)?;
    }
    Ok(())
}

fn report_failure(e: &PipelineError, streamed: bool) {
    eprintln!("Error: {}", e);
    let _ = write_unsaved(&mut io::stdout(), e, streamed);
    if matches!(
        e,
        PipelineError::SessionStoreUnavailable {
            unsaved_answer: Some(_),
            ..
        }
    ) {
        eprintln!("Warning: this answer was not saved to the session history");
    }
}

/// Stream one answer to stdout. Returns the typed failure, if any.
async fn stream_answer(
    pipeline: &Pipeline,
    session_id: &str,
    utterance: &str,
) -> Result<(), PipelineError> {
    let mut events = pipeline.answer(session_id, utterance);
    let mut stdout = io::stdout();
    let mut streamed = false;

    while let Some(event) = events.next().await {
        match event {
            AnswerEvent::Stage(_) => {}
            AnswerEvent::Fragment(text) => {
                print!("{}", text);
                let _ = stdout.flush();
                streamed = true;
            }
            AnswerEvent::Completed(answer) => {
                println!();
                print_citations(&answer.citations);
                return Ok(());
            }
            AnswerEvent::Failed(e) => {
                report_failure(&e, streamed);
                return Err(e);
            }
        }
    }
    Err(PipelineError::Cancelled)
}

pub async fn run_ask(config: &Config, session: Option<String>, utterance: &str) -> Result<()> {
    let pipeline = backends::build_pipeline(config).await?;
    let session_id = session.unwrap_or_else(Session::new_id);
    eprintln!("session: {}", session_id);

    stream_answer(&pipeline, &session_id, utterance)
        .await
        .map_err(|e| anyhow!(e))
}

pub async fn run_chat(config: &Config, session: Option<String>) -> Result<()> {
    let pipeline = backends::build_pipeline(config).await?;
    let session_id = session.unwrap_or_else(Session::new_id);
    eprintln!("session: {} (empty line or Ctrl-D to quit)", session_id);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        let _ = std::io::stdout().flush();
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let utterance = line.trim();
        if utterance.is_empty() {
            break;
        }
        // A failed request leaves the session usable.
        let _ = stream_answer(&pipeline, &session_id, utterance).await;
        println!();
    }
    Ok(())
}

async fn session_store(config: &Config) -> Result<Arc<dyn SessionStore>> {
    if config.session.backend != "sqlite" {
        bail!(
            "session backend '{}' keeps no history between runs",
            config.session.backend
        );
    }
    Ok(Arc::new(backends::open_session_store(config).await?))
}

pub async fn run_history(config: &Config, session_id: &str) -> Result<()> {
    let store = session_store(config).await?;
    let Some(session) = store.get(session_id).await? else {
        println!("no live session: {}", session_id);
        return Ok(());
    };

    println!("--- Session ---");
    println!("id:           {}", session.id);
    println!("created_at:   {}", session.created_at.format("%Y-%m-%dT%H:%M:%SZ"));
    println!("expires_at:   {}", session.expires_at.format("%Y-%m-%dT%H:%M:%SZ"));
    println!("turns:        {}", session.turns.len());
    for turn in &session.turns {
        println!();
        let who = match turn.role {
            Role::User => "you",
            Role::Assistant => "assistant",
        };
        println!("[{}] {}:", turn.timestamp.format("%H:%M:%S"), who);
        println!("{}", turn.text);
        print_citations(&turn.citations);
    }
    Ok(())
}

pub async fn run_forget(config: &Config, session_id: &str) -> Result<()> {
    let store = session_store(config).await?;
    store.clear(session_id).await?;
    println!("forgot session {}", session_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use context_chat_core::models::FinalAnswer;

    fn unsaved() -> PipelineError {
        PipelineError::SessionStoreUnavailable {
            reason: "disk full".into(),
            unsaved_answer: Some(FinalAnswer {
                text: "Paris is the capital of France [cite:c1].".into(),
                citations: vec![Citation {
                    chunk_id: "c1".into(),
                    document_id: "france.md".into(),
                    position: 0,
                    excerpt: "Paris is the capital of France.".into(),
                }],
            }),
        }
    }

    fn render(e: &PipelineError, streamed: bool) -> String {
        let mut out = Vec::new();
        write_unsaved(&mut out, e, streamed).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_streamed_unsaved_answer_is_not_repeated() {
        let out = render(&unsaved(), true);
        assert!(!out.contains("Paris is the capital"));
        assert!(out.contains("Sources:"));
        assert!(out.contains("france.md"));
    }

    #[test]
    fn test_unstreamed_unsaved_answer_is_written_once() {
        let out = render(&unsaved(), false);
        assert_eq!(out.matches("Paris is the capital").count(), 1);
        assert!(out.contains("france.md"));
    }

    #[test]
    fn test_other_failures_write_nothing_but_a_newline() {
        assert_eq!(render(&PipelineError::Cancelled, true), "\n");
        assert_eq!(render(&PipelineError::Cancelled, false), "");
    }
}
