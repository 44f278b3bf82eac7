//! Model-serving client abstraction and the Ollama chat client.
//!
//! A [`ChatModel`] turns an ordered list of role-tagged messages into a
//! [`DeltaStream`]: a finite, non-restartable channel of text deltas. The
//! Ollama implementation spawns a producer task that decodes the NDJSON body
//! of `POST /api/chat` and forwards each `message.content` fragment; the
//! consumer reads until the channel closes or the first error arrives.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::error::ChatError;
use crate::models::{Role, Turn};

/// Deltas buffered between the HTTP reader and the consumer.
const STREAM_BUFFER: usize = 64;

/// A role-tagged message sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }
}

impl From<&Turn> for ChatMessage {
    fn from(turn: &Turn) -> Self {
        Self::new(turn.role, turn.content.clone())
    }
}

/// Receiving half of a streamed response.
pub struct DeltaStream {
    rx: mpsc::Receiver<Result<String, ChatError>>,
}

impl DeltaStream {
    /// Create a connected sender/stream pair.
    pub fn channel(buffer: usize) -> (mpsc::Sender<Result<String, ChatError>>, Self) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (tx, Self { rx })
    }

    /// A stream that yields the given deltas and then ends.
    pub fn from_deltas<I, S>(deltas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let items: Vec<Result<String, ChatError>> =
            deltas.into_iter().map(|d| Ok(d.into())).collect();
        Self::from_results(items)
    }

    /// A stream that yields the given items, errors included, then ends.
    pub fn from_results(items: Vec<Result<String, ChatError>>) -> Self {
        let (tx, stream) = Self::channel(items.len());
        for item in items {
            // Capacity equals the item count, so try_send cannot fail.
            let _ = tx.try_send(item);
        }
        stream
    }

    /// Next delta, or `None` once the producer is done.
    pub async fn next(&mut self) -> Option<Result<String, ChatError>> {
        self.rx.recv().await
    }

    /// Drain the stream into one string, stopping at the first error.
    pub async fn collect(mut self) -> Result<String, ChatError> {
        let mut out = String::new();
        while let Some(delta) = self.next().await {
            out.push_str(&delta?);
        }
        Ok(out)
    }
}

/// A model that can answer a conversation, one delta at a time.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Model identifier (e.g. `"llama3.1"`).
    fn model_id(&self) -> &str;

    /// Start a streamed chat completion over `messages`.
    async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<DeltaStream, ChatError>;

    /// Non-streamed completion: the concatenation of all deltas.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ChatError> {
        self.stream_chat(messages).await?.collect().await
    }
}

/// Hands out a client for a model id; sessions can switch models mid-chat.
pub trait ModelSource: Send + Sync {
    fn model(&self, id: &str) -> Arc<dyn ChatModel>;
}

// ============ Ollama ============

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaChatLine {
    #[serde(default)]
    message: Option<OllamaLineMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaLineMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct OllamaTagsResponse {
    models: Vec<OllamaTag>,
}

#[derive(Debug, Deserialize)]
struct OllamaTag {
    name: String,
}

/// Chat client for an Ollama server (`POST /api/chat`).
#[derive(Clone)]
pub struct OllamaChat {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl OllamaChat {
    /// Build a client for `model` with the configured URL and request timeout.
    pub fn new(config: &LlmConfig, model: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }

    /// Same client and endpoint, different model.
    pub fn with_model(&self, model: impl Into<String>) -> Self {
        Self {
            client: self.client.clone(),
            url: self.url.clone(),
            model: model.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Names of the models the server has pulled (`GET /api/tags`).
    pub async fn list_models(&self) -> Result<Vec<String>, ChatError> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.url))
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        if !response.status().is_success() {
            return Err(ChatError::ModelUnavailable(format!(
                "Ollama API error {}",
                response.status()
            )));
        }
        let tags: OllamaTagsResponse = response
            .json()
            .await
            .map_err(|e| ChatError::MalformedResponse(e.to_string()))?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    fn unreachable(&self, e: reqwest::Error) -> ChatError {
        ChatError::ModelUnavailable(format!(
            "Ollama connection error (is Ollama running at {}?): {}",
            self.url, e
        ))
    }
}

#[async_trait]
impl ChatModel for OllamaChat {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<DeltaStream, ChatError> {
        let body = OllamaChatRequest {
            model: &self.model,
            messages,
            stream: true,
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(ChatError::ModelUnavailable(format!(
                "Ollama API error {}: {}",
                status, body_text
            )));
        }

        debug!(model = %self.model, messages = messages.len(), "streaming chat");

        let (tx, stream) = DeltaStream::channel(STREAM_BUFFER);
        let url = self.url.clone();
        tokio::spawn(async move {
            let mut response = response;
            let mut decoder = LineDecoder::default();
            loop {
                match response.chunk().await {
                    Ok(Some(bytes)) => {
                        for item in decoder.push(&bytes) {
                            let stop = item.is_err();
                            if tx.send(item).await.is_err() || stop {
                                return;
                            }
                        }
                        if decoder.done {
                            return;
                        }
                    }
                    Ok(None) => {
                        if let Some(item) = decoder.finish() {
                            let _ = tx.send(item).await;
                        }
                        return;
                    }
                    Err(e) => {
                        warn!(error = %e, "chat stream interrupted");
                        let _ = tx
                            .send(Err(ChatError::ModelUnavailable(format!(
                                "stream from {} interrupted: {}",
                                url, e
                            ))))
                            .await;
                        return;
                    }
                }
            }
        });

        Ok(stream)
    }
}

impl ModelSource for OllamaChat {
    fn model(&self, id: &str) -> Arc<dyn ChatModel> {
        Arc::new(self.with_model(id))
    }
}

/// Incremental NDJSON decoder for Ollama's streamed chat body.
#[derive(Default)]
struct LineDecoder {
    buf: Vec<u8>,
    done: bool,
}

impl LineDecoder {
    /// Feed raw bytes; returns the deltas (or an error) for every complete line.
    fn push(&mut self, bytes: &[u8]) -> Vec<Result<String, ChatError>> {
        self.buf.extend_from_slice(bytes);
        let mut out = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if self.done {
                continue;
            }
            if let Some(item) = self.decode(&line) {
                let stop = item.is_err();
                out.push(item);
                if stop {
                    break;
                }
            }
        }
        out
    }

    /// Decode a trailing line that had no newline terminator.
    fn finish(&mut self) -> Option<Result<String, ChatError>> {
        let line = std::mem::take(&mut self.buf);
        if self.done {
            return None;
        }
        self.decode(&line)
    }

    fn decode(&mut self, line: &[u8]) -> Option<Result<String, ChatError>> {
        let text = String::from_utf8_lossy(line);
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        let parsed: OllamaChatLine = match serde_json::from_str(text) {
            Ok(p) => p,
            Err(e) => return Some(Err(ChatError::MalformedResponse(format!("{}: {}", e, text)))),
        };
        if let Some(error) = parsed.error {
            return Some(Err(ChatError::ModelUnavailable(error)));
        }
        self.done = parsed.done;

        parsed
            .message
            .map(|m| m.content)
            .filter(|c| !c.is_empty())
            .map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_splits_lines_across_chunks() {
        let mut decoder = LineDecoder::default();
        let first = decoder.push(b"{\"message\":{\"role\":\"assistant\",\"content\":\"Hi\"},\"done\":false}\n{\"message\":{\"con");
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].as_ref().unwrap(), "Hi");

        let second = decoder.push(b"tent\":\" there\"},\"done\":false}\n");
        assert_eq!(second[0].as_ref().unwrap(), " there");

        let last = decoder.push(b"{\"message\":{\"content\":\"\"},\"done\":true}\n");
        assert!(last.is_empty());
        assert!(decoder.done);
    }

    #[test]
    fn test_decoder_reports_server_error() {
        let mut decoder = LineDecoder::default();
        let items = decoder.push(b"{\"error\":\"model 'phi9' not found\"}\n");
        match &items[0] {
            Err(ChatError::ModelUnavailable(msg)) => assert!(msg.contains("phi9")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_decoder_rejects_garbage() {
        let mut decoder = LineDecoder::default();
        let items = decoder.push(b"not json\n{\"message\":{\"content\":\"x\"}}\n");
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(ChatError::MalformedResponse(_))));
    }

    #[test]
    fn test_decoder_finish_handles_unterminated_line() {
        let mut decoder = LineDecoder::default();
        assert!(decoder.push(b"{\"message\":{\"content\":\"tail\"}}").is_empty());
        assert_eq!(decoder.finish().unwrap().unwrap(), "tail");
    }

    #[tokio::test]
    async fn test_delta_stream_collect() {
        let stream = DeltaStream::from_deltas(["Hi", " there", "!"]);
        assert_eq!(stream.collect().await.unwrap(), "Hi there!");
    }

    #[tokio::test]
    async fn test_delta_stream_stops_at_error() {
        let stream = DeltaStream::from_results(vec![
            Ok("partial".to_string()),
            Err(ChatError::ModelUnavailable("gone".to_string())),
            Ok("never".to_string()),
        ]);
        assert!(stream.collect().await.is_err());
    }

    #[test]
    fn test_message_serializes_lowercase_role() {
        let json = serde_json::to_value(ChatMessage::system("ctx")).unwrap();
        assert_eq!(json, serde_json::json!({ "role": "system", "content": "ctx" }));
    }
}
