//! Document ingestion and upload-directory storage.
//!
//! Turns a file path into a [`Document`] plus its ordered [`Chunk`]s:
//! detect the content type from the extension, extract pages, chunk them.
//! Uploaded files live flat in `storage.upload_dir`; their file stems are the
//! document identifiers.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::chunk::chunk_pages;
use crate::config::{ChunkingConfig, StorageConfig};
use crate::error::ChatError;
use crate::extract::{content_type_for_path, extract_pages};
use crate::models::{Chunk, Document};

/// A document together with the chunks produced from it.
#[derive(Debug, Clone)]
pub struct IngestedDocument {
    pub document: Document,
    pub chunks: Vec<Chunk>,
}

impl IngestedDocument {
    pub fn id(&self) -> &str {
        &self.document.id
    }
}

/// Derive the document identifier from a path (its file stem).
pub fn document_id(path: &Path) -> Option<String> {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .filter(|s| !s.is_empty())
}

/// Read, extract, and chunk one document.
///
/// Every failure is reported as [`ChatError::Ingestion`] naming the path;
/// a document that produces no text is a failure too.
pub fn load_document(path: &Path, chunking: &ChunkingConfig) -> Result<IngestedDocument, ChatError> {
    let id = document_id(path)
        .ok_or_else(|| ChatError::ingestion(path, "cannot derive a document name"))?;

    let content_type = content_type_for_path(path).ok_or_else(|| {
        let ext = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_else(|| "(none)".to_string());
        ChatError::ingestion(path, format!("unsupported file type: {}", ext))
    })?;

    let bytes = std::fs::read(path).map_err(|e| ChatError::ingestion(path, e))?;
    let pages = extract_pages(&bytes, content_type).map_err(|e| ChatError::ingestion(path, e))?;
    let chunks = chunk_pages(&id, &pages, chunking.max_tokens);

    if chunks.is_empty() {
        return Err(ChatError::ingestion(path, "document contains no text"));
    }

    debug!(
        document = %id,
        pages = pages.len(),
        chunks = chunks.len(),
        "ingested document"
    );

    Ok(IngestedDocument {
        document: Document {
            id,
            source_path: path.to_path_buf(),
            content_type: content_type.to_string(),
        },
        chunks,
    })
}

/// Copy `src` into the upload directory, replacing a same-named file.
pub fn store_upload(upload_dir: &Path, src: &Path) -> Result<PathBuf> {
    let file_name = src
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("Not a file: {}", src.display()))?;
    if !src.is_file() {
        bail!("Not a file: {}", src.display());
    }

    std::fs::create_dir_all(upload_dir).with_context(|| {
        format!("Failed to create upload directory: {}", upload_dir.display())
    })?;

    let dest = upload_dir.join(file_name);
    std::fs::copy(src, &dest)
        .with_context(|| format!("Failed to copy {} to {}", src.display(), dest.display()))?;

    info!(src = %src.display(), dest = %dest.display(), "stored upload");
    Ok(dest)
}

/// List uploaded files matching `include_globs`, sorted by path.
///
/// A missing upload directory is an empty upload set.
pub fn scan_upload_dir(storage: &StorageConfig) -> Result<Vec<PathBuf>> {
    let root = &storage.upload_dir;
    if !root.exists() {
        return Ok(Vec::new());
    }

    let include_set = build_globset(&storage.include_globs)?;

    let mut paths = Vec::new();
    for entry in WalkDir::new(root).max_depth(1) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        if include_set.is_match(relative) || include_set.is_match(path) {
            paths.push(path.to_path_buf());
        }
    }

    paths.sort();
    Ok(paths)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_document_id_is_stem() {
        assert_eq!(document_id(Path::new("data/report.pdf")).as_deref(), Some("report"));
        assert_eq!(
            document_id(Path::new("q3.summary.txt")).as_deref(),
            Some("q3.summary")
        );
    }

    #[test]
    fn test_load_text_document() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("notes.txt");
        std::fs::write(&path, "First point.\n\nSecond point.").unwrap();

        let doc = load_document(&path, &ChunkingConfig::default()).unwrap();
        assert_eq!(doc.id(), "notes");
        assert_eq!(doc.document.content_type, "text/plain");
        assert_eq!(doc.chunks.len(), 1);
        assert!(doc.chunks[0].text.contains("Second point."));
    }

    #[test]
    fn test_unsupported_extension_is_ingestion_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("tool.exe");
        std::fs::write(&path, "MZ").unwrap();

        let err = load_document(&path, &ChunkingConfig::default()).unwrap_err();
        assert!(matches!(err, ChatError::Ingestion { .. }));
        assert!(err.to_string().contains("unsupported file type: .exe"));
    }

    #[test]
    fn test_missing_file_is_ingestion_error() {
        let err = load_document(Path::new("/nonexistent/nowhere.md"), &ChunkingConfig::default())
            .unwrap_err();
        assert!(matches!(err, ChatError::Ingestion { .. }));
    }

    #[test]
    fn test_empty_document_is_ingestion_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("blank.md");
        std::fs::write(&path, "\n\n   \n").unwrap();

        let err = load_document(&path, &ChunkingConfig::default()).unwrap_err();
        assert!(err.to_string().contains("no text"));
    }

    #[test]
    fn test_store_upload_overwrites() {
        let tmp = TempDir::new().unwrap();
        let upload_dir = tmp.path().join("data");
        let src = tmp.path().join("report.txt");

        std::fs::write(&src, "v1").unwrap();
        let dest = store_upload(&upload_dir, &src).unwrap();
        std::fs::write(&src, "v2").unwrap();
        store_upload(&upload_dir, &src).unwrap();

        assert_eq!(std::fs::read_to_string(dest).unwrap(), "v2");
    }

    #[test]
    fn test_scan_upload_dir_filters_and_sorts() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("b.md"), "b").unwrap();
        std::fs::write(tmp.path().join("a.txt"), "a").unwrap();
        std::fs::write(tmp.path().join("c.bin"), "c").unwrap();

        let storage = StorageConfig {
            upload_dir: tmp.path().to_path_buf(),
            ..StorageConfig::default()
        };
        let paths = scan_upload_dir(&storage).unwrap();
        let names: Vec<String> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.txt", "b.md"]);
    }

    #[test]
    fn test_scan_missing_dir_is_empty() {
        let storage = StorageConfig {
            upload_dir: PathBuf::from("/nonexistent/uploads"),
            ..StorageConfig::default()
        };
        assert!(scan_upload_dir(&storage).unwrap().is_empty());
    }
}
