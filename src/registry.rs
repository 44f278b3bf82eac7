//! Tool registry and retriever.
//!
//! Holds every tool across all active documents together with an embedding
//! of each tool's description. At query time [`ToolRegistry::retrieve`]
//! ranks the tools by cosine similarity between the query and those
//! descriptions so only the most relevant few are offered to the agent.
//!
//! The registry doubles as the dispatch table: [`ToolRegistry::get`] maps a
//! tool name chosen by the agent back to the statically-typed tool.
//!
//! Indexing is not incremental; the library rebuilds the registry from the
//! full tool set whenever the documents change.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::embedding::{cosine_similarity, embed_query, EmbeddingProvider};
use crate::error::ChatError;
use crate::tools::Tool;

/// A retrieved tool with its similarity score.
#[derive(Clone)]
pub struct ScoredTool {
    pub tool: Arc<dyn Tool>,
    pub score: f32,
}

pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    vectors: Vec<Vec<f32>>,
    by_name: HashMap<String, usize>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl ToolRegistry {
    /// A registry with no tools; every retrieval returns nothing.
    pub fn empty(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            tools: Vec::new(),
            vectors: Vec::new(),
            by_name: HashMap::new(),
            embedder,
        }
    }

    /// Index `tools` by embedding their descriptions.
    ///
    /// Fails with [`ChatError::DuplicateTool`] if two tools share a name.
    pub async fn index(
        tools: Vec<Arc<dyn Tool>>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self, ChatError> {
        let mut by_name = HashMap::with_capacity(tools.len());
        for (i, tool) in tools.iter().enumerate() {
            if by_name.insert(tool.name().to_string(), i).is_some() {
                return Err(ChatError::DuplicateTool(tool.name().to_string()));
            }
        }

        let descriptions: Vec<String> = tools.iter().map(|t| t.description().to_string()).collect();
        let vectors = if descriptions.is_empty() {
            Vec::new()
        } else {
            embedder.embed(&descriptions).await?
        };
        if vectors.len() != tools.len() {
            return Err(ChatError::Embedding(format!(
                "expected {} tool vectors, got {}",
                tools.len(),
                vectors.len()
            )));
        }

        debug!(tools = tools.len(), "indexed tool registry");

        Ok(Self {
            tools,
            vectors,
            by_name,
            embedder,
        })
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn tools(&self) -> &[Arc<dyn Tool>] {
        &self.tools
    }

    /// Look a tool up by its exact name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.by_name.get(name).map(|&i| Arc::clone(&self.tools[i]))
    }

    /// Top `top_k` tools for `query`, best first.
    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<Arc<dyn Tool>>, ChatError> {
        Ok(self
            .retrieve_scored(query, top_k)
            .await?
            .into_iter()
            .map(|s| s.tool)
            .collect())
    }

    /// Like [`retrieve`](Self::retrieve), keeping the scores.
    ///
    /// Scores are non-increasing; equal scores keep registration order.
    pub async fn retrieve_scored(&self, query: &str, top_k: usize) -> Result<Vec<ScoredTool>, ChatError> {
        if self.tools.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let query_vec = embed_query(self.embedder.as_ref(), query).await?;
        let mut scored: Vec<ScoredTool> = self
            .tools
            .iter()
            .zip(self.vectors.iter())
            .map(|(tool, vector)| ScoredTool {
                tool: Arc::clone(tool),
                score: cosine_similarity(&query_vec, vector),
            })
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(top_k);
        Ok(scored)
    }
}
