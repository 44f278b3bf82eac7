//! # ragchat
//!
//! Local-first chat over documents with locally served language models.
//!
//! Uploaded documents are chunked and embedded; each document becomes a
//! search tool and a summary tool. A tool registry exposes only the most
//! relevant tools to an agent per turn, and every turn is streamed into a
//! per-session history with duration accounting.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌─────────────┐   ┌──────────────┐
//! │ uploads  │──▶│ ingest   │──▶│ tools       │──▶│ registry     │
//! │ pdf/docx │   │ extract+ │   │ vector_tool │   │ top-K by     │
//! │ pptx/txt │   │ chunk    │   │ summary_tool│   │ description  │
//! └──────────┘   └──────────┘   └─────────────┘   └──────┬───────┘
//!                                                        ▼
//!              ┌─────────┐   ┌──────────────┐   ┌──────────────┐
//!              │ Session │◀──│ Orchestrator │──▶│ ChatModel    │
//!              │ turns   │   │ direct/rag/  │   │ (Ollama)     │
//!              └─────────┘   │ agent        │   └──────────────┘
//!                            └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Domain error kinds |
//! | [`models`] | Core data types |
//! | [`extract`] | Per-page text extraction (PDF, DOCX, PPTX, text) |
//! | [`chunk`] | Paragraph-boundary chunking |
//! | [`ingest`] | Document loading and upload storage |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | In-memory similarity ranking |
//! | [`llm`] | Streaming chat model client |
//! | [`tools`] | Per-document search and summary tools |
//! | [`registry`] | Tool registry and retriever |
//! | [`agent`] | Tool-selecting agent |
//! | [`library`] | The active document set |
//! | [`session`] | Per-session turn history |
//! | [`orchestrator`] | Turn handling per chat mode |
//! | [`progress`] | Indexing progress on stderr |

pub mod agent;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod index;
pub mod ingest;
pub mod library;
pub mod llm;
pub mod models;
pub mod orchestrator;
pub mod progress;
pub mod registry;
pub mod session;
pub mod tools;
