//! The active document set.
//!
//! A [`Library`] is built from the uploads in one pass:
//!
//! 1. every file is ingested (extract + chunk); failures are collected
//!    per document and never abort the others,
//! 2. each document's chunks are embedded and wrapped in its two tools;
//!    a document that fails to embed is recorded like an ingestion failure,
//! 3. all tools are indexed into one [`ToolRegistry`],
//! 4. the per-document chunk indexes are merged into the pool used by
//!    `rag` mode.
//!
//! The library is immutable; after an upload it is rebuilt from scratch.

use anyhow::Result;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::embedding::{embed_query, EmbeddingProvider};
use crate::error::ChatError;
use crate::index::VectorIndex;
use crate::ingest::{load_document, scan_upload_dir, IngestedDocument};
use crate::models::{Chunk, Document};
use crate::progress::{IndexProgressEvent, IndexProgressReporter};
use crate::registry::ToolRegistry;
use crate::tools::{build_tools, Tool};

/// An indexed document and the names of its tools.
#[derive(Debug, Clone)]
pub struct LibraryEntry {
    pub document: Document,
    pub chunks: usize,
    pub tools: Vec<String>,
}

pub struct Library {
    entries: Vec<LibraryEntry>,
    registry: ToolRegistry,
    pool: VectorIndex,
    errors: Vec<ChatError>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl Library {
    /// A library with no documents.
    pub fn empty(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            entries: Vec::new(),
            registry: ToolRegistry::empty(Arc::clone(&embedder)),
            pool: VectorIndex::default(),
            errors: Vec::new(),
            embedder,
        }
    }

    /// Build from everything in the configured upload directory.
    pub async fn from_upload_dir(
        config: &Config,
        embedder: Arc<dyn EmbeddingProvider>,
        progress: &dyn IndexProgressReporter,
    ) -> Result<Self> {
        let paths = scan_upload_dir(&config.storage)?;
        Ok(Self::build(&paths, config, embedder, progress).await?)
    }

    /// Build from an explicit list of files.
    ///
    /// Per-document ingestion and embedding failures are kept in
    /// [`errors`](Self::errors). Failing to index the tool registry
    /// aborts the build.
    pub async fn build(
        paths: &[PathBuf],
        config: &Config,
        embedder: Arc<dyn EmbeddingProvider>,
        progress: &dyn IndexProgressReporter,
    ) -> Result<Self, ChatError> {
        progress.report(IndexProgressEvent::Scanned { files: paths.len() });

        let mut errors = Vec::new();
        let mut ingested: Vec<IngestedDocument> = Vec::with_capacity(paths.len());
        let mut seen: HashSet<String> = HashSet::new();

        for path in paths {
            match ingest_blocking(path.clone(), config).await {
                Ok(doc) if !seen.insert(doc.id().to_string()) => {
                    let err = ChatError::ingestion(
                        path,
                        format!("duplicate document name: {}", doc.id()),
                    );
                    fail(progress, &err, path);
                    errors.push(err);
                }
                Ok(doc) => ingested.push(doc),
                Err(err) => {
                    fail(progress, &err, path);
                    errors.push(err);
                }
            }
        }

        let total = ingested.len();
        let mut entries = Vec::with_capacity(total);
        let mut tools: Vec<Arc<dyn Tool>> = Vec::with_capacity(total * 2);
        let mut indexes = Vec::with_capacity(total);

        for (i, doc) in ingested.iter().enumerate() {
            let built = match build_tools(doc, embedder.as_ref()).await {
                Ok(built) => built,
                Err(err) => {
                    fail(progress, &err, &doc.document.source_path);
                    errors.push(err);
                    continue;
                }
            };
            indexes.push(Arc::clone(&built.search));

            let pair = built.into_tools();
            entries.push(LibraryEntry {
                document: doc.document.clone(),
                chunks: doc.chunks.len(),
                tools: pair.iter().map(|t| t.name().to_string()).collect(),
            });
            tools.extend(pair);

            progress.report(IndexProgressEvent::Document {
                id: doc.id().to_string(),
                chunks: doc.chunks.len(),
                n: i + 1,
                total,
            });
        }

        let registry = ToolRegistry::index(tools, Arc::clone(&embedder)).await?;
        let pool = VectorIndex::merged(indexes.iter().map(|t| t.index()));

        progress.report(IndexProgressEvent::Indexed {
            documents: entries.len(),
            tools: registry.len(),
        });
        info!(
            documents = entries.len(),
            tools = registry.len(),
            failed = errors.len(),
            "library ready"
        );

        Ok(Self {
            entries,
            registry,
            pool,
            errors,
            embedder,
        })
    }

    pub fn documents(&self) -> &[LibraryEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Documents that failed to ingest during the last build.
    pub fn errors(&self) -> &[ChatError] {
        &self.errors
    }

    pub fn embedder(&self) -> Arc<dyn EmbeddingProvider> {
        Arc::clone(&self.embedder)
    }

    /// Top `top_k` chunks across every document for `query`.
    pub async fn search_chunks(&self, query: &str, top_k: usize) -> Result<Vec<Chunk>, ChatError> {
        if self.pool.is_empty() {
            return Err(ChatError::RegistryEmpty);
        }
        let query_vec = embed_query(self.embedder.as_ref(), query).await?;
        Ok(self
            .pool
            .search(&query_vec, top_k, &[])
            .into_iter()
            .map(|hit| hit.chunk.clone())
            .collect())
    }
}

async fn ingest_blocking(path: PathBuf, config: &Config) -> Result<IngestedDocument, ChatError> {
    let chunking = config.chunking.clone();
    let target = path.clone();
    tokio::task::spawn_blocking(move || load_document(&target, &chunking))
        .await
        .map_err(|e| ChatError::ingestion(path, e))?
}

fn fail(progress: &dyn IndexProgressReporter, err: &ChatError, path: &std::path::Path) {
    warn!(path = %path.display(), error = %err, "skipping document");
    progress.report(IndexProgressEvent::Failed {
        path: path.display().to_string(),
        reason: err.to_string(),
    });
}
