//! Scripted fakes shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use ragchat::config::Config;
use ragchat::embedding::EmbeddingProvider;
use ragchat::error::ChatError;
use ragchat::library::Library;
use ragchat::llm::{ChatMessage, ChatModel, DeltaStream, ModelSource};
use ragchat::progress::NoProgress;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

// ─── Embedder ───────────────────────────────────────────────────────

pub const DIMS: usize = 64;

/// Bag-of-words embedder: each lowercase word is hashed into one of
/// [`DIMS`] buckets, then the vector is L2-normalized.
pub struct FakeEmbedder;

fn bucket(word: &str) -> usize {
    // FNV-1a
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in word.bytes() {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    (hash % DIMS as u64) as usize
}

pub fn bag_of_words(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        v[bucket(&word.to_lowercase())] += 1.0;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

#[async_trait]
impl EmbeddingProvider for FakeEmbedder {
    fn model_name(&self) -> &str {
        "fake-bow"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ChatError> {
        Ok(texts.iter().map(|t| bag_of_words(t)).collect())
    }
}

// ─── Chat model ─────────────────────────────────────────────────────

/// One scripted model response.
pub enum Script {
    /// Stream these deltas.
    Deltas(Vec<String>),
    /// Fail before any delta.
    Fail(ChatError),
    /// Stream some deltas, then fail.
    FailAfter(Vec<String>, ChatError),
}

impl Script {
    pub fn text(s: &str) -> Self {
        Script::Deltas(vec![s.to_string()])
    }

    pub fn deltas(parts: &[&str]) -> Self {
        Script::Deltas(parts.iter().map(|p| p.to_string()).collect())
    }
}

#[derive(Default)]
struct State {
    scripts: VecDeque<Script>,
    calls: Vec<(String, Vec<ChatMessage>)>,
}

/// A model that replays scripted responses in order and records every call.
/// Once the script runs out it answers `"ok"`.
#[derive(Clone)]
pub struct FakeModel {
    id: String,
    state: Arc<Mutex<State>>,
}

impl FakeModel {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            id: "llama3.1".to_string(),
            state: Arc::new(Mutex::new(State {
                scripts: scripts.into(),
                calls: Vec::new(),
            })),
        }
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().unwrap().calls.len()
    }

    /// `(model id, messages)` of every call, in order.
    pub fn calls(&self) -> Vec<(String, Vec<ChatMessage>)> {
        self.state.lock().unwrap().calls.clone()
    }
}

#[async_trait]
impl ChatModel for FakeModel {
    fn model_id(&self) -> &str {
        &self.id
    }

    async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<DeltaStream, ChatError> {
        let script = {
            let mut state = self.state.lock().unwrap();
            state.calls.push((self.id.clone(), messages.to_vec()));
            state.scripts.pop_front()
        };
        match script.unwrap_or_else(|| Script::text("ok")) {
            Script::Deltas(deltas) => Ok(DeltaStream::from_deltas(deltas)),
            Script::Fail(err) => Err(err),
            Script::FailAfter(deltas, err) => {
                let mut items: Vec<Result<String, ChatError>> =
                    deltas.into_iter().map(Ok).collect();
                items.push(Err(err));
                Ok(DeltaStream::from_results(items))
            }
        }
    }
}

impl ModelSource for FakeModel {
    fn model(&self, id: &str) -> Arc<dyn ChatModel> {
        Arc::new(FakeModel {
            id: id.to_string(),
            state: Arc::clone(&self.state),
        })
    }
}

// ─── Fixtures ───────────────────────────────────────────────────────

pub fn write_doc(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    path
}

pub fn test_config(upload_dir: &Path) -> Config {
    let mut config = Config::minimal();
    config.storage.upload_dir = upload_dir.to_path_buf();
    config
}

pub async fn library_for(paths: &[PathBuf], config: &Config) -> Library {
    Library::build(paths, config, Arc::new(FakeEmbedder), &NoProgress)
        .await
        .unwrap()
}
