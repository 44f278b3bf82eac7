//! Library indexing progress.
//!
//! Building the document library reads every upload, embeds its chunks and
//! then indexes the tool descriptions, which can take a while with a local
//! embedding model. Progress goes to **stderr** so stdout stays clean for
//! answers.

use std::io::Write;

/// A single progress event emitted while the library is (re)built.
#[derive(Clone, Debug)]
pub enum IndexProgressEvent {
    /// Uploads found in the upload directory.
    Scanned { files: usize },
    /// Document `n` of `total` was ingested and its tools built.
    Document {
        id: String,
        chunks: usize,
        n: usize,
        total: usize,
    },
    /// A document could not be ingested; the rest continue.
    Failed { path: String, reason: String },
    /// Tool registry indexed.
    Indexed { documents: usize, tools: usize },
}

pub trait IndexProgressReporter: Send + Sync {
    fn report(&self, event: IndexProgressEvent);
}

/// Human-friendly lines: `index  2 / 5  report (14 chunks)`.
pub struct StderrProgress;

impl IndexProgressReporter for StderrProgress {
    fn report(&self, event: IndexProgressEvent) {
        let line = match &event {
            IndexProgressEvent::Scanned { files } => {
                format!("index  found {} upload(s)\n", files)
            }
            IndexProgressEvent::Document {
                id,
                chunks,
                n,
                total,
            } => format!(
                "index  {} / {}  {} ({} chunk{})\n",
                n,
                total,
                id,
                chunks,
                if *chunks == 1 { "" } else { "s" }
            ),
            IndexProgressEvent::Failed { path, reason } => {
                format!("index  skipped {}: {}\n", path, reason)
            }
            IndexProgressEvent::Indexed { documents, tools } => {
                format!("index  ready: {} document(s), {} tool(s)\n", documents, tools)
            }
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// One JSON object per line.
pub struct JsonProgress;

impl IndexProgressReporter for JsonProgress {
    fn report(&self, event: IndexProgressEvent) {
        let obj = match &event {
            IndexProgressEvent::Scanned { files } => serde_json::json!({
                "event": "scanned",
                "files": files
            }),
            IndexProgressEvent::Document {
                id,
                chunks,
                n,
                total,
            } => serde_json::json!({
                "event": "document",
                "id": id,
                "chunks": chunks,
                "n": n,
                "total": total
            }),
            IndexProgressEvent::Failed { path, reason } => serde_json::json!({
                "event": "failed",
                "path": path,
                "reason": reason
            }),
            IndexProgressEvent::Indexed { documents, tools } => serde_json::json!({
                "event": "indexed",
                "documents": documents,
                "tools": tools
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

pub struct NoProgress;

impl IndexProgressReporter for NoProgress {
    fn report(&self, _event: IndexProgressEvent) {}
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn IndexProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
