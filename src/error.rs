//! Error kinds surfaced by ingestion, retrieval, and chat dispatch.
//!
//! The orchestrator converts every [`ChatError`] raised while answering a
//! turn into a failed assistant turn, so the `Display` text of each variant
//! is what the user ends up reading in the transcript.

use std::path::PathBuf;

/// Errors from the document pipeline and the conversation loop.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChatError {
    /// A document could not be read, parsed, or yielded no text.
    #[error("failed to ingest {}: {reason}", path.display())]
    Ingestion { path: PathBuf, reason: String },

    /// The model-serving endpoint is unreachable, timed out, or returned an error status.
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    /// The model answered with something that could not be decoded.
    #[error("malformed model response: {0}")]
    MalformedResponse(String),

    /// A search or summary tool failed while answering.
    #[error("tool {tool} failed: {message}")]
    ToolInvocation { tool: String, message: String },

    /// The embedding provider failed.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// A retrieval-backed query was issued with no indexed documents.
    #[error("no documents are indexed; upload documents first")]
    RegistryEmpty,

    /// Two tools were registered under the same name.
    #[error("duplicate tool name: {0}")]
    DuplicateTool(String),
}

impl ChatError {
    pub fn ingestion(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        ChatError::Ingestion {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn tool(tool: impl Into<String>, message: impl ToString) -> Self {
        ChatError::ToolInvocation {
            tool: tool.into(),
            message: message.to_string(),
        }
    }
}
