//! Language-model backends.
//!
//! Two HTTP chat backends implement [`LanguageModel`]:
//!
//! - **[`OllamaModel`]**: `POST {url}/api/chat`. Streaming replies arrive as
//!   newline-delimited JSON objects, the last one carrying `"done": true`.
//! - **[`OpenAiModel`]**: `POST {url}/v1/chat/completions`. Streaming replies
//!   arrive as server-sent events (`data: {...}` lines) closed by
//!   `data: [DONE]`.
//!
//! Both decode the response body through [`split_lines`], so a fragment
//! that straddles network chunks is reassembled before parsing. Dropping the
//! returned [`FragmentStream`] drops the response body and with it the
//! connection.
//!
//! Neither backend sets an overall request timeout; deadlines are applied
//! per stage by the pipeline.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use context_chat_core::llm::{CompletionRequest, FragmentStream, LanguageModel};

use crate::config::LlmConfig;

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const DEFAULT_OPENAI_URL: &str = "https://api.openai.com";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// One decoded line of a streaming reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(String),
    /// Keep-alives, role-only deltas, comments.
    Skip,
    /// Text that also closes the reply.
    Last(String),
    Done,
}

/// Reassemble a chunked byte stream into text lines (without the trailing
/// `\n` or `\r\n`). A final unterminated line is yielded at end of stream.
/// A transport error is yielded once and ends the stream.
pub fn split_lines<S>(bytes: S) -> BoxStream<'static, Result<String>>
where
    S: Stream<Item = Result<Vec<u8>>> + Send + 'static,
{
    let state = (bytes.boxed(), Vec::<u8>::new(), false);
    stream::unfold(state, |(mut bytes, mut buf, mut eof)| async move {
        loop {
            if let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buf.drain(..=pos).collect();
                let text = String::from_utf8_lossy(&line)
                    .trim_end_matches(|c| c == '\n' || c == '\r')
                    .to_string();
                return Some((Ok(text), (bytes, buf, eof)));
            }
            if eof {
                if buf.is_empty() {
                    return None;
                }
                let text = String::from_utf8_lossy(&buf).trim_end().to_string();
                buf.clear();
                return Some((Ok(text), (bytes, buf, eof)));
            }
            match bytes.next().await {
                Some(Ok(chunk)) => buf.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    buf.clear();
                    return Some((Err(e), (bytes, buf, true)));
                }
                None => eof = true,
            }
        }
    })
    .boxed()
}

/// Turn a line stream into a fragment stream using `parse`. Stops at the
/// first [`Frame::Done`], [`Frame::Last`] or error. A body that ends
/// before its completion marker yields a final error, so a truncated
/// reply is never mistaken for a complete one.
pub fn fragments<F>(lines: BoxStream<'static, Result<String>>, parse: F) -> FragmentStream
where
    F: Fn(&str) -> Result<Frame> + Send + 'static,
{
    stream::unfold(Some((lines, parse)), |state| async move {
        let (mut lines, parse) = state?;
        loop {
            let frame = match lines.next().await {
                Some(line) => line.and_then(|l| parse(&l)),
                None => Err(anyhow!("stream ended before completion marker")),
            };
            match frame {
                Ok(Frame::Text(t)) if !t.is_empty() => return Some((Ok(t), Some((lines, parse)))),
                Ok(Frame::Text(_)) | Ok(Frame::Skip) => continue,
                Ok(Frame::Last(t)) if !t.is_empty() => return Some((Ok(t), None)),
                Ok(Frame::Last(_)) | Ok(Frame::Done) => return None,
                Err(e) => return Some((Err(e), None)),
            }
        }
    })
    .boxed()
}

fn body_lines(response: reqwest::Response) -> BoxStream<'static, Result<String>> {
    split_lines(response.bytes_stream().map(|chunk| {
        chunk
            .map(|b| b.to_vec())
            .map_err(|e| anyhow!("stream read failed: {}", e))
    }))
}

async fn check_status(response: reqwest::Response, label: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    bail!("{} API error {}: {}", label, status, body)
}

fn chat_messages(request: &CompletionRequest) -> Vec<Value> {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    if !request.system.is_empty() {
        messages.push(json!({ "role": "system", "content": request.system }));
    }
    messages.extend(
        request
            .messages
            .iter()
            .map(|m| json!({ "role": m.role.as_str(), "content": m.content })),
    );
    messages
}

fn http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()?)
}

// ============ Ollama ============

pub struct OllamaModel {
    model: String,
    url: String,
    max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl OllamaModel {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            model: config.model.clone(),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            client: http_client()?,
        })
    }

    async fn send(&self, request: &CompletionRequest, stream: bool) -> Result<reqwest::Response> {
        let url = format!("{}/api/chat", self.url.trim_end_matches('/'));
        let body = json!({
            "model": self.model,
            "messages": chat_messages(request),
            "stream": stream,
            "options": {
                "temperature": self.temperature,
                "num_predict": self.max_tokens,
            },
        });
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Ollama connection error ({})", url))?;
        check_status(response, "Ollama").await
    }
}

/// Parse one NDJSON line of an Ollama `/api/chat` stream.
pub fn parse_ollama_line(line: &str) -> Result<Frame> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Frame::Skip);
    }
    let value: Value = serde_json::from_str(line).context("Invalid Ollama stream line")?;
    if let Some(err) = value.get("error").and_then(|e| e.as_str()) {
        bail!("Ollama error: {}", err);
    }
    let content = value
        .pointer("/message/content")
        .and_then(|c| c.as_str())
        .unwrap_or_default();
    let done = value.get("done").and_then(|d| d.as_bool()).unwrap_or(false);
    Ok(match (done, content.is_empty()) {
        (true, true) => Frame::Done,
        (true, false) => Frame::Last(content.to_string()),
        (false, false) => Frame::Text(content.to_string()),
        (false, true) => Frame::Skip,
    })
}

#[async_trait]
impl LanguageModel for OllamaModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let value: Value = self.send(request, false).await?.json().await?;
        value
            .pointer("/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Invalid Ollama response: missing message.content"))
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<FragmentStream> {
        let response = self.send(request, true).await?;
        Ok(fragments(body_lines(response), parse_ollama_line))
    }
}

// ============ OpenAI-compatible ============

pub struct OpenAiModel {
    model: String,
    url: String,
    api_key: String,
    max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl OpenAiModel {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow!("{} environment variable not set", config.api_key_env))?;
        Ok(Self {
            model: config.model.clone(),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string()),
            api_key,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            client: http_client()?,
        })
    }

    async fn send(&self, request: &CompletionRequest, stream: bool) -> Result<reqwest::Response> {
        let url = format!("{}/v1/chat/completions", self.url.trim_end_matches('/'));
        let body = json!({
            "model": self.model,
            "messages": chat_messages(request),
            "stream": stream,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("OpenAI connection error ({})", url))?;
        check_status(response, "OpenAI").await
    }
}

/// Parse one server-sent-event line of a chat completions stream.
pub fn parse_openai_line(line: &str) -> Result<Frame> {
    let Some(data) = line.strip_prefix("data:") else {
        // Blank separators, `event:` and `:` comment lines.
        return Ok(Frame::Skip);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(Frame::Done);
    }
    if data.is_empty() {
        return Ok(Frame::Skip);
    }
    let value: Value = serde_json::from_str(data).context("Invalid OpenAI stream event")?;
    if let Some(err) = value.get("error") {
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        bail!("OpenAI error: {}", message);
    }
    Ok(value
        .pointer("/choices/0/delta/content")
        .and_then(|c| c.as_str())
        .map(|c| Frame::Text(c.to_string()))
        .unwrap_or(Frame::Skip))
}

#[async_trait]
impl LanguageModel for OpenAiModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let value: Value = self.send(request, false).await?.json().await?;
        value
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Invalid OpenAI response: missing choices[0].message.content"))
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<FragmentStream> {
        let response = self.send(request, true).await?;
        Ok(fragments(body_lines(response), parse_openai_line))
    }
}

/// Create the configured [`LanguageModel`].
pub fn create_model(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>> {
    match config.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaModel::new(config)?)),
        "openai" => Ok(Arc::new(OpenAiModel::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}
