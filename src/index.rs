//! In-memory similarity ranking over embedded chunks.
//!
//! Brute-force cosine similarity over every stored vector, which is plenty
//! for the handful of documents a chat session works with. Results are
//! sorted by descending score; equal scores keep insertion order.

use crate::embedding::{cosine_similarity, EmbeddingProvider};
use crate::error::ChatError;
use crate::models::Chunk;

/// A chunk paired with its similarity to the query.
#[derive(Debug, Clone)]
pub struct ScoredChunk<'a> {
    pub chunk: &'a Chunk,
    pub score: f32,
}

/// Chunks plus one embedding vector per chunk.
#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    chunks: Vec<Chunk>,
    vectors: Vec<Vec<f32>>,
}

impl VectorIndex {
    /// Embed `chunks` in one batch and index them.
    pub async fn build(
        chunks: Vec<Chunk>,
        embedder: &dyn EmbeddingProvider,
    ) -> Result<Self, ChatError> {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embedder.embed(&texts).await?;
        Self::from_parts(chunks, vectors)
    }

    pub fn from_parts(chunks: Vec<Chunk>, vectors: Vec<Vec<f32>>) -> Result<Self, ChatError> {
        if chunks.len() != vectors.len() {
            return Err(ChatError::Embedding(format!(
                "expected {} vectors, got {}",
                chunks.len(),
                vectors.len()
            )));
        }
        Ok(Self { chunks, vectors })
    }

    /// Merge several indexes, preserving their order.
    pub fn merged<'a>(indexes: impl IntoIterator<Item = &'a VectorIndex>) -> Self {
        let mut out = Self::default();
        for index in indexes {
            out.chunks.extend(index.chunks.iter().cloned());
            out.vectors.extend(index.vectors.iter().cloned());
        }
        out
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Rank chunks against `query_vec` and keep the best `top_k`.
    ///
    /// When `page_labels` is non-empty only chunks whose page label is one
    /// of them are considered (logical OR).
    pub fn search(&self, query_vec: &[f32], top_k: usize, page_labels: &[String]) -> Vec<ScoredChunk<'_>> {
        let mut scored: Vec<ScoredChunk<'_>> = self
            .chunks
            .iter()
            .zip(self.vectors.iter())
            .filter(|(chunk, _)| matches_pages(chunk, page_labels))
            .map(|(chunk, vector)| ScoredChunk {
                chunk,
                score: cosine_similarity(query_vec, vector),
            })
            .collect();

        // sort_by is stable, so ties keep chunk order.
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(top_k);
        scored
    }
}

fn matches_pages(chunk: &Chunk, page_labels: &[String]) -> bool {
    if page_labels.is_empty() {
        return true;
    }
    match &chunk.page_label {
        Some(label) => page_labels.iter().any(|p| p == label),
        None => false,
    }
}
