//! Conversation orchestration.
//!
//! [`Orchestrator::handle_turn`] runs one user turn end to end: it appends
//! the user turn, dispatches on the [`ChatMode`], streams the answer to a
//! [`DeltaSink`] and appends exactly one assistant turn. On failure that
//! assistant turn carries the error message (marked `failed`) and the error
//! is returned so the caller can flag it.
//!
//! | Mode | Model input |
//! |------|-------------|
//! | `direct` | the full session history |
//! | `rag` | the history plus a system message with the best chunks |
//! | `agent` | the flattened history, answered by the [`ToolAgent`] |

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::agent::ToolAgent;
use crate::config::{Config, RetrievalConfig};
use crate::error::ChatError;
use crate::library::Library;
use crate::llm::{ChatMessage, ChatModel, DeltaStream, ModelSource};
use crate::session::Session;
use crate::tools::ToolContext;

/// Opening assistant message of an agent session.
pub const GREETING: &str = "How can I help you today?";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ChatMode {
    /// Plain chat with the model.
    #[default]
    Direct,
    /// Ground the answer in retrieved document chunks.
    Rag,
    /// Let an agent pick document tools.
    Agent,
}

impl ChatMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatMode::Direct => "direct",
            ChatMode::Rag => "rag",
            ChatMode::Agent => "agent",
        }
    }

    /// A fresh session for this mode. Only agent sessions open with the
    /// assistant [`GREETING`]; the others start with an empty history.
    pub fn start_session(&self, model: impl Into<String>) -> Session {
        match self {
            ChatMode::Agent => Session::with_greeting(model, GREETING),
            ChatMode::Direct | ChatMode::Rag => Session::new(model),
        }
    }

    /// Whether the mode needs indexed documents.
    pub fn uses_documents(&self) -> bool {
        !matches!(self, ChatMode::Direct)
    }
}

impl fmt::Display for ChatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChatMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(ChatMode::Direct),
            "rag" => Ok(ChatMode::Rag),
            "agent" => Ok(ChatMode::Agent),
            other => Err(format!(
                "unknown mode '{}' (expected direct, rag, or agent)",
                other
            )),
        }
    }
}

/// Receives streamed deltas as they arrive.
pub trait DeltaSink: Send {
    fn on_delta(&mut self, delta: &str);

    /// Called once after the last delta of a successful answer.
    fn on_finish(&mut self) {}
}

/// Accumulates the streamed text for display.
#[derive(Debug, Default)]
pub struct DisplayBuffer {
    text: String,
    deltas: usize,
}

impl DisplayBuffer {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn deltas(&self) -> usize {
        self.deltas
    }
}

impl DeltaSink for DisplayBuffer {
    fn on_delta(&mut self, delta: &str) {
        self.text.push_str(delta);
        self.deltas += 1;
    }
}

/// A completed answer.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// Text stored in the session, including the duration line.
    pub text: String,
    /// Seconds from receiving the input to the end of the stream.
    pub duration: f64,
}

pub struct Orchestrator {
    models: Arc<dyn ModelSource>,
    library: Arc<Library>,
    retrieval: RetrievalConfig,
    agent: ToolAgent,
}

impl Orchestrator {
    pub fn new(models: Arc<dyn ModelSource>, library: Arc<Library>, config: &Config) -> Self {
        Self {
            models,
            library,
            retrieval: config.retrieval.clone(),
            agent: ToolAgent::new(&config.agent, config.retrieval.tool_top_k),
        }
    }

    /// Swap in a rebuilt library.
    pub fn set_library(&mut self, library: Arc<Library>) {
        self.library = library;
    }

    /// Process one user turn.
    ///
    /// Modes that need documents fail with [`ChatError::RegistryEmpty`]
    /// before the session is touched when nothing is indexed. Any other
    /// failure is recorded as a failed assistant turn and returned.
    pub async fn handle_turn(
        &self,
        session: &mut Session,
        input: &str,
        mode: ChatMode,
        sink: &mut dyn DeltaSink,
    ) -> Result<Reply, ChatError> {
        let started = Instant::now();

        if mode.uses_documents() && self.library.is_empty() {
            warn!(mode = %mode, "no documents indexed");
            return Err(ChatError::RegistryEmpty);
        }

        session.push_user(input);

        match self.respond(session, input, mode, sink).await {
            Ok(answer) => {
                let duration = started.elapsed().as_secs_f64();
                let text = format!("{}\n\nDuration: {:.2} seconds", answer, duration);
                session.push_assistant(text.clone(), duration);
                info!(
                    session = %session.id(),
                    model = %session.model(),
                    mode = %mode,
                    duration,
                    "turn complete"
                );
                Ok(Reply { text, duration })
            }
            Err(err) => {
                error!(
                    session = %session.id(),
                    model = %session.model(),
                    mode = %mode,
                    error = %err,
                    "turn failed"
                );
                session.push_failure(err.to_string());
                Err(err)
            }
        }
    }

    async fn respond(
        &self,
        session: &Session,
        input: &str,
        mode: ChatMode,
        sink: &mut dyn DeltaSink,
    ) -> Result<String, ChatError> {
        let model = self.models.model(session.model());
        debug!(model = %model.model_id(), mode = %mode, turns = session.len(), "dispatching turn");

        let stream = match mode {
            ChatMode::Direct => model.stream_chat(&history_messages(session)).await?,
            ChatMode::Rag => self.rag_stream(model.as_ref(), session, input).await?,
            ChatMode::Agent => {
                let ctx = ToolContext {
                    model: Arc::clone(&model),
                    embedder: self.library.embedder(),
                    retrieval: self.retrieval.clone(),
                };
                self.agent
                    .run(self.library.registry(), &ctx, &session.history_text(), input)
                    .await?
            }
        };

        drain(stream, sink).await
    }

    async fn rag_stream(
        &self,
        model: &dyn ChatModel,
        session: &Session,
        input: &str,
    ) -> Result<DeltaStream, ChatError> {
        let chunks = self
            .library
            .search_chunks(input, self.retrieval.similarity_top_k)
            .await?;
        debug!(chunks = chunks.len(), "retrieved context");

        let context = chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let mut messages = history_messages(session);
        messages.push(ChatMessage::system(context));
        model.stream_chat(&messages).await
    }
}

fn history_messages(session: &Session) -> Vec<ChatMessage> {
    session.turns().iter().map(ChatMessage::from).collect()
}

async fn drain(mut stream: DeltaStream, sink: &mut dyn DeltaSink) -> Result<String, ChatError> {
    let mut text = String::new();
    while let Some(delta) = stream.next().await {
        let delta = delta?;
        sink.on_delta(&delta);
        text.push_str(&delta);
    }
    sink.on_finish();
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!("RAG".parse::<ChatMode>().unwrap(), ChatMode::Rag);
        assert_eq!(" agent ".parse::<ChatMode>().unwrap(), ChatMode::Agent);
        assert!("search".parse::<ChatMode>().is_err());
        assert_eq!(ChatMode::default(), ChatMode::Direct);
    }

    #[test]
    fn test_only_direct_skips_documents() {
        assert!(!ChatMode::Direct.uses_documents());
        assert!(ChatMode::Rag.uses_documents());
        assert!(ChatMode::Agent.uses_documents());
    }

    #[test]
    fn test_only_agent_sessions_open_with_greeting() {
        assert!(ChatMode::Direct.start_session("phi3").is_empty());
        assert!(ChatMode::Rag.start_session("phi3").is_empty());

        let session = ChatMode::Agent.start_session("phi3");
        assert_eq!(session.len(), 1);
        let greeting = session.last().unwrap();
        assert_eq!(greeting.role, crate::models::Role::Assistant);
        assert_eq!(greeting.content, GREETING);
        assert_eq!(session.model(), "phi3");
    }

    #[tokio::test]
    async fn test_drain_feeds_sink() {
        let mut buffer = DisplayBuffer::default();
        let text = drain(DeltaStream::from_deltas(["Hi", " there", "!"]), &mut buffer)
            .await
            .unwrap();
        assert_eq!(text, "Hi there!");
        assert_eq!(buffer.text(), "Hi there!");
        assert_eq!(buffer.deltas(), 3);
    }
}
