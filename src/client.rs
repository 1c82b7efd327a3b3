use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ClientError;

// ── Wire types ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Full reply once streaming finishes.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub text: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

// ── SSE delta types ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Option<Vec<StreamChoice>>,
    usage: Option<UsageStats>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    content: Option<String>,
    /// Reasoning tokens some servers send separately (DeepSeek-R1, Qwen3 thinking).
    /// Counted for progress, never part of the reply.
    reasoning_content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageStats {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

// ── Provider seam ─────────────────────────────────────────────────────────────

/// An OpenAI-compatible chat backend.
pub trait ChatProvider {
    async fn chat(
        &self,
        model: &str,
        system: &str,
        messages: &[Message],
    ) -> Result<Completion, ClientError>;

    async fn list_models(&self) -> Result<Vec<String>, ClientError>;

    fn base_url(&self) -> &str;

    fn set_base_url(&mut self, url: String);
}

// ── Client ────────────────────────────────────────────────────────────────────

pub struct Client {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    /// Characters received so far in the current request (drives the spinner)
    progress: Option<Arc<AtomicUsize>>,
}

impl Client {
    pub fn new(base_url: String) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { http, base_url, api_key: None, progress: None }
    }

    pub fn set_api_key(&mut self, key: String) {
        self.api_key = Some(key);
    }

    pub fn with_progress(mut self, counter: Arc<AtomicUsize>) -> Self {
        self.progress = Some(counter);
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url.trim_end_matches('/'))
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.header("Authorization", format!("Bearer {key}")),
            None => req,
        }
    }

    fn bump_progress(&self, n: usize) {
        if let Some(p) = &self.progress {
            p.fetch_add(n, Ordering::Relaxed);
        }
    }
}

impl ChatProvider for Client {
    /// Stream a chat completion and return the accumulated reply.
    async fn chat(
        &self,
        model: &str,
        system: &str,
        messages: &[Message],
    ) -> Result<Completion, ClientError> {
        let body = serde_json::json!({
            "model": model,
            "stream": true,
            "stream_options": {"include_usage": true},
            "messages": build_messages(system, messages),
        });

        let url = self.url("chat/completions");
        debug!(%url, model, messages = messages.len(), "sending chat request");
        if let Some(p) = &self.progress {
            p.store(0, Ordering::Relaxed);
        }

        let resp = self
            .authorize(self.http.post(&url).json(&body))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::Api { status, body });
        }

        // Some servers ignore `stream` and answer with a single JSON object
        let is_json = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));
        if is_json {
            let value: Value = resp.json().await?;
            return parse_full_completion(&value);
        }

        let mut stream = resp.bytes_stream();
        let mut completion = Completion::default();
        // Bytes after the last newline; SSE events may split across chunks
        let mut pending: Vec<u8> = Vec::new();

        while let Some(chunk) = stream.next().await {
            pending.extend_from_slice(&chunk?);

            while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
                let line_bytes: Vec<u8> = pending.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line_bytes);
                self.handle_sse_line(line.trim(), &mut completion);
            }
        }
        if !pending.is_empty() {
            let line = String::from_utf8_lossy(&pending).to_string();
            self.handle_sse_line(line.trim(), &mut completion);
        }

        debug!(
            chars = completion.text.len(),
            input_tokens = completion.input_tokens,
            output_tokens = completion.output_tokens,
            "chat response complete"
        );
        Ok(completion)
    }

    async fn list_models(&self) -> Result<Vec<String>, ClientError> {
        let url = self.url("models");
        debug!(%url, "listing models");
        let resp = self.authorize(self.http.get(&url)).send().await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::Api { status, body });
        }
        let list: ModelList = resp
            .json()
            .await
            .map_err(|e| ClientError::Decode(format!("model list: {e}")))?;
        Ok(list.data.into_iter().map(|m| m.id).collect())
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn set_base_url(&mut self, url: String) {
        self.base_url = url;
    }
}

impl Client {
    fn handle_sse_line(&self, line: &str, completion: &mut Completion) {
        if line.is_empty() || line == "data: [DONE]" {
            return;
        }
        let Some(json_str) = line.strip_prefix("data:") else {
            return;
        };
        let chunk: StreamChunk = match serde_json::from_str(json_str.trim_start()) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "skipping undecodable stream event");
                return;
            }
        };

        if let Some(usage) = chunk.usage {
            completion.input_tokens = usage.prompt_tokens.unwrap_or(0);
            completion.output_tokens = usage.completion_tokens.unwrap_or(0);
        }

        for choice in chunk.choices.unwrap_or_default() {
            let Some(delta) = choice.delta else { continue };
            if let Some(rc) = delta.reasoning_content {
                self.bump_progress(rc.len());
            }
            if let Some(text) = delta.content {
                self.bump_progress(text.len());
                completion.text.push_str(&text);
            }
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn build_messages(system: &str, messages: &[Message]) -> Vec<Value> {
    let mut out = Vec::with_capacity(messages.len() + 1);
    if !system.is_empty() {
        out.push(serde_json::json!({"role": Role::System, "content": system}));
    }
    for msg in messages {
        out.push(serde_json::json!({"role": msg.role, "content": msg.content}));
    }
    out
}

/// Non-streamed `chat.completion` body.
fn parse_full_completion(value: &Value) -> Result<Completion, ClientError> {
    let text = value["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| ClientError::Decode("no choices[0].message.content".to_string()))?;
    Ok(Completion {
        text: text.to_string(),
        input_tokens: value["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
        output_tokens: value["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
    })
}
