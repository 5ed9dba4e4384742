//! Prompt assembly under a character budget, and the reasoning/answer split.
//!
//! # Budget policy
//!
//! The budget counts every character sent: instructions, context blocks,
//! history messages and the question. When over budget, history is trimmed
//! first (oldest turn first), then context (lowest-ranked chunk first). The
//! question is never cut; if the fixed parts alone exceed the budget the
//! prompt goes out anyway with [`AssembledPrompt::over_budget`] set.
//!
//! # Reasoning
//!
//! With reasoning enabled the model thinks step by step, then writes a line
//! starting with [`ANSWER_MARKER`]. [`AnswerSplitter`] withholds everything
//! before the marker.

use crate::citation::cite_tag;
use crate::llm::{ChatMessage, CompletionRequest};
use crate::models::{RetrievedChunk, Turn};

pub const ANSWER_MARKER: &str = "Answer:";

const ANSWER_INSTRUCTIONS: &str = "\
You are a helpful and knowledgeable assistant answering from a knowledge base.
Rules:
1. Answer ONLY from the context blocks in the latest message. If they do not
   contain the answer, say so plainly.
2. Use the conversation history only to understand follow-up questions.
3. After every sentence that states a fact, cite the block it came from using
   that block's tag exactly, for example [cite:chunk-42]. Never cite a tag that
   does not appear in the context.
4. Be precise. Do not invent facts.";

const REASONING_INSTRUCTIONS: &str = "\
First think through the question step by step on lines starting with
\"Reasoning:\". Then write the final answer on a new line starting with
\"Answer:\". Only the text after \"Answer:\" is shown to the user.";

const NO_CONTEXT_DIRECTIVE: &str = "\
No relevant context was found in the knowledge base for this question.
Reply that the knowledge base has insufficient information to answer it.
Do not answer from general knowledge and do not cite anything.";

#[derive(Debug, Clone)]
pub struct PromptOptions {
    pub max_chars: usize,
    pub reasoning: bool,
}

#[derive(Debug, Clone)]
pub struct AssembledPrompt {
    pub request: CompletionRequest,
    /// Chunks that made it into the prompt, in rank order.
    pub chunks: Vec<RetrievedChunk>,
    pub dropped_chunks: usize,
    pub dropped_turns: usize,
    pub over_budget: bool,
}

impl AssembledPrompt {
    pub fn no_context(&self) -> bool {
        self.chunks.is_empty()
    }
}

fn system_prompt(reasoning: bool, no_context: bool) -> String {
    let mut system = ANSWER_INSTRUCTIONS.to_string();
    if reasoning {
        system.push_str("\n\n");
        system.push_str(REASONING_INSTRUCTIONS);
    }
    if no_context {
        system.push_str("\n\n");
        system.push_str(NO_CONTEXT_DIRECTIVE);
    }
    system
}

fn context_block(rc: &RetrievedChunk) -> String {
    format!(
        "{} (document {}, position {})\n{}",
        cite_tag(&rc.chunk.id),
        rc.chunk.document_id,
        rc.chunk.position,
        rc.chunk.text
    )
}

fn build(
    question: &str,
    chunks: &[RetrievedChunk],
    history: &[Turn],
    reasoning: bool,
) -> CompletionRequest {
    let context = if chunks.is_empty() {
        "Context: none found.".to_string()
    } else {
        let blocks: Vec<String> = chunks.iter().map(context_block).collect();
        format!("Context:\n{}", blocks.join("\n\n"))
    };

    let mut messages: Vec<ChatMessage> = history.iter().map(ChatMessage::from).collect();
    messages.push(ChatMessage::user(format!(
        "{}\n\nQuestion: {}",
        context, question
    )));

    CompletionRequest {
        system: system_prompt(reasoning, chunks.is_empty()),
        messages,
        stream: true,
    }
}

/// Assemble the generation request for `question`.
///
/// `chunks` must be in rank order and `history` oldest first.
pub fn assemble(
    question: &str,
    chunks: &[RetrievedChunk],
    history: &[Turn],
    options: &PromptOptions,
) -> AssembledPrompt {
    let mut history_from = 0;
    let mut keep_chunks = chunks.len();

    loop {
        let request = build(
            question,
            &chunks[..keep_chunks],
            &history[history_from..],
            options.reasoning,
        );
        let fits = request.char_len() <= options.max_chars;
        if fits || (history_from == history.len() && keep_chunks == 0) {
            return AssembledPrompt {
                request,
                chunks: chunks[..keep_chunks].to_vec(),
                dropped_chunks: chunks.len() - keep_chunks,
                dropped_turns: history_from,
                over_budget: !fits,
            };
        }
        if history_from < history.len() {
            history_from += 1;
        } else {
            keep_chunks -= 1;
        }
    }
}

/// Separates the reasoning trace from the final answer in a fragment stream.
///
/// [`push`](AnswerSplitter::push) returns the part of each fragment that
/// belongs to the answer. The concatenation of everything returned by
/// `push` and [`finish`](AnswerSplitter::finish) equals
/// [`answer`](AnswerSplitter::answer).
#[derive(Debug, Default)]
pub struct AnswerSplitter {
    in_answer: bool,
    pending: String,
    answer: String,
}

impl AnswerSplitter {
    /// With `expect_reasoning = false` every fragment is answer text.
    pub fn new(expect_reasoning: bool) -> Self {
        Self {
            in_answer: !expect_reasoning,
            ..Default::default()
        }
    }

    pub fn push(&mut self, fragment: &str) -> Option<String> {
        if self.in_answer {
            return self.emit(fragment.to_string());
        }
        self.pending.push_str(fragment);
        let idx = marker_at_line_start(&self.pending)?;
        self.in_answer = true;
        let rest = self.pending[idx + ANSWER_MARKER.len()..].to_string();
        self.pending.clear();
        self.emit(rest)
    }

    /// Flush at end of stream. A reply that never reached the marker is
    /// treated as all answer.
    pub fn finish(&mut self) -> Option<String> {
        if self.in_answer {
            return None;
        }
        self.in_answer = true;
        let all = std::mem::take(&mut self.pending);
        self.emit(all)
    }

    pub fn answer(&self) -> &str {
        &self.answer
    }

    fn emit(&mut self, text: String) -> Option<String> {
        let text = if self.answer.is_empty() {
            text.trim_start().to_string()
        } else {
            text
        };
        if text.is_empty() {
            return None;
        }
        self.answer.push_str(&text);
        Some(text)
    }
}

/// Byte offset of the first [`ANSWER_MARKER`] that begins a line.
fn marker_at_line_start(text: &str) -> Option<usize> {
    text.match_indices(ANSWER_MARKER)
        .map(|(i, _)| i)
        .find(|&i| i == 0 || text[..i].ends_with('\n'))
}
