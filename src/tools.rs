//! Per-document tools the agent can call.
//!
//! Every ingested document yields exactly two tools:
//!
//! | Name | Kind | Behaviour |
//! |------|------|-----------|
//! | `vector_tool_<id>` | [`ToolKind::Search`] | top-k chunk retrieval (optionally page-filtered) + short synthesized answer |
//! | `summary_tool_<id>` | [`ToolKind::Summary`] | tree summarization over the whole document |
//!
//! Tool descriptions mention the document id so the [`ToolRegistry`](crate::registry::ToolRegistry)
//! can tell documents apart when matching a query against them.

use async_trait::async_trait;
use futures::future::try_join_all;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::config::RetrievalConfig;
use crate::embedding::{embed_query, EmbeddingProvider};
use crate::error::ChatError;
use crate::index::VectorIndex;
use crate::ingest::IngestedDocument;
use crate::llm::{ChatMessage, ChatModel};

/// Answer returned by a search tool whose page filter matched nothing.
pub const EMPTY_RESPONSE: &str = "Empty Response";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    Search,
    Summary,
}

impl ToolKind {
    /// Name prefix; the full tool name is `<prefix>_<document-id>`.
    pub fn prefix(&self) -> &'static str {
        match self {
            ToolKind::Search => "vector_tool",
            ToolKind::Summary => "summary_tool",
        }
    }

    pub fn tool_name(&self, document_id: &str) -> String {
        format!("{}_{}", self.prefix(), document_id)
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolKind::Search => f.write_str("search"),
            ToolKind::Summary => f.write_str("summary"),
        }
    }
}

/// Arguments of one tool invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCall {
    pub query: String,
    /// Page labels to restrict a search to; empty means the whole document.
    pub page_numbers: Vec<String>,
}

impl ToolCall {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            page_numbers: Vec::new(),
        }
    }

    pub fn with_pages(mut self, pages: Vec<String>) -> Self {
        self.page_numbers = pages;
        self
    }
}

/// Collaborators a tool needs while executing.
#[derive(Clone)]
pub struct ToolContext {
    pub model: Arc<dyn ChatModel>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub retrieval: RetrievalConfig,
}

/// A named, described capability bound to one document.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name, `<kind>_<document-id>`.
    fn name(&self) -> &str;

    /// One-line description used for retrieval matching and in the agent prompt.
    fn description(&self) -> &str;

    fn kind(&self) -> ToolKind;

    fn document_id(&self) -> &str;

    /// JSON Schema of the accepted arguments, shown to the agent.
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> Result<String, ChatError>;
}

/// The pair of tools built for one document.
pub struct DocumentTools {
    pub search: Arc<VectorSearchTool>,
    pub summary: Arc<SummaryTool>,
}

impl DocumentTools {
    pub fn into_tools(self) -> [Arc<dyn Tool>; 2] {
        let search: Arc<dyn Tool> = self.search;
        let summary: Arc<dyn Tool> = self.summary;
        [search, summary]
    }
}

/// Embed a document's chunks and wrap them in a search tool and a summary tool.
pub async fn build_tools(
    doc: &IngestedDocument,
    embedder: &dyn EmbeddingProvider,
) -> Result<DocumentTools, ChatError> {
    let index = Arc::new(VectorIndex::build(doc.chunks.clone(), embedder).await?);
    let id = doc.id().to_string();

    debug!(document = %id, chunks = index.len(), "built document tools");

    Ok(DocumentTools {
        search: Arc::new(VectorSearchTool::new(&id, Arc::clone(&index))),
        summary: Arc::new(SummaryTool::new(&id, index)),
    })
}

// ============ Search tool ============

/// Filtered semantic search over one document.
pub struct VectorSearchTool {
    name: String,
    description: String,
    document_id: String,
    index: Arc<VectorIndex>,
}

impl VectorSearchTool {
    pub fn new(document_id: &str, index: Arc<VectorIndex>) -> Self {
        Self {
            name: ToolKind::Search.tool_name(document_id),
            description: format!(
                "Useful for specific questions over {}. Leave page_numbers empty unless \
                 a specific page should be searched.",
                document_id
            ),
            document_id: document_id.to_string(),
            index,
        }
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }
}

#[async_trait]
impl Tool for VectorSearchTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Search
    }

    fn document_id(&self) -> &str {
        &self.document_id
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "The question to search for" },
                "page_numbers": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Optional page labels to restrict the search to"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> Result<String, ChatError> {
        let query_vec = embed_query(ctx.embedder.as_ref(), &call.query)
            .await
            .map_err(|e| ChatError::tool(&self.name, e))?;

        let hits = self
            .index
            .search(&query_vec, ctx.retrieval.similarity_top_k, &call.page_numbers);
        if hits.is_empty() {
            return Ok(EMPTY_RESPONSE.to_string());
        }

        let context = hits
            .iter()
            .map(|h| h.chunk.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let messages = [ChatMessage::user(answer_prompt(&context, &call.query))];
        ctx.model
            .complete(&messages)
            .await
            .map_err(|e| ChatError::tool(&self.name, e))
    }
}

// ============ Summary tool ============

/// Whole-document tree summarization.
pub struct SummaryTool {
    name: String,
    description: String,
    document_id: String,
    index: Arc<VectorIndex>,
}

impl SummaryTool {
    pub fn new(document_id: &str, index: Arc<VectorIndex>) -> Self {
        Self {
            name: ToolKind::Summary.tool_name(document_id),
            description: format!("Useful for summarization questions related to {}", document_id),
            document_id: document_id.to_string(),
            index,
        }
    }
}

#[async_trait]
impl Tool for SummaryTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Summary
    }

    fn document_id(&self) -> &str {
        &self.document_id
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "What the summary should focus on" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> Result<String, ChatError> {
        let texts: Vec<String> = self.index.chunks().iter().map(|c| c.text.clone()).collect();
        tree_summarize(
            ctx.model.as_ref(),
            &call.query,
            texts,
            ctx.retrieval.summary_group_chars,
        )
        .await
        .map_err(|e| ChatError::tool(&self.name, e))
    }
}

/// Summarize `texts` bottom-up until a single answer remains.
///
/// Each round packs the current texts into groups of at most `group_chars`
/// characters and summarizes the groups concurrently.
pub async fn tree_summarize(
    model: &dyn ChatModel,
    query: &str,
    texts: Vec<String>,
    group_chars: usize,
) -> Result<String, ChatError> {
    let mut level = texts;
    if level.is_empty() {
        return Ok(EMPTY_RESPONSE.to_string());
    }

    loop {
        let groups = pack_groups(level, group_chars);
        let summaries = try_join_all(groups.iter().map(|group| {
            let messages = vec![ChatMessage::user(answer_prompt(&group.join("\n\n"), query))];
            async move { model.complete(&messages).await }
        }))
        .await?;

        if summaries.len() == 1 {
            return Ok(summaries.into_iter().next().unwrap_or_default());
        }
        level = summaries;
    }
}

/// Greedy packing; any group holds at least two texts while more than one
/// remains, so every round strictly shrinks the level.
fn pack_groups(texts: Vec<String>, group_chars: usize) -> Vec<Vec<String>> {
    let total = texts.len();
    let mut groups: Vec<Vec<String>> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_len = 0usize;

    for text in texts {
        let fits = current_len + text.len() <= group_chars;
        if !current.is_empty() && !fits && current.len() >= 2.min(total) {
            groups.push(std::mem::take(&mut current));
            current_len = 0;
        }
        current_len += text.len();
        current.push(text);
    }
    if !current.is_empty() {
        // A trailing singleton joins the previous group.
        match groups.last_mut() {
            Some(last) if current.len() == 1 => last.append(&mut current),
            _ => groups.push(current),
        }
    }
    groups
}

fn answer_prompt(context: &str, query: &str) -> String {
    format!(
        "Context information is below.\n\
         ---------------------\n\
         {}\n\
         ---------------------\n\
         Given the context information and not prior knowledge, answer the query.\n\
         Query: {}\n\
         Answer: ",
        context, query
    )
}
