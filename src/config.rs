use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::agent::DEFAULT_SYSTEM_PROMPT;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            include_globs: default_include_globs(),
        }
    }
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_include_globs() -> Vec<String> {
    ["pdf", "docx", "pptx", "txt", "md", "markdown"]
        .iter()
        .map(|ext| format!("**/*.{}", ext))
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Chunks returned by a search tool and by rag mode.
    #[serde(default = "default_similarity_top_k")]
    pub similarity_top_k: usize,
    /// Tools exposed to the agent per turn.
    #[serde(default = "default_tool_top_k")]
    pub tool_top_k: usize,
    /// Character budget of one group in tree summarization.
    #[serde(default = "default_summary_group_chars")]
    pub summary_group_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            similarity_top_k: default_similarity_top_k(),
            tool_top_k: default_tool_top_k(),
            summary_group_chars: default_summary_group_chars(),
        }
    }
}

fn default_similarity_top_k() -> usize {
    2
}
fn default_tool_top_k() -> usize {
    3
}
fn default_summary_group_chars() -> usize {
    6000
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_url")]
    pub url: String,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_models")]
    pub models: Vec<String>,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            url: default_llm_url(),
            default_model: default_model(),
            models: default_models(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

impl LlmConfig {
    /// Check a model id against the configured selection.
    pub fn validate_model(&self, model: &str) -> Result<()> {
        if !self.models.iter().any(|m| m == model) {
            bail!(
                "Unknown model: '{}'. Choose one of: {}",
                model,
                self.models.join(", ")
            );
        }
        Ok(())
    }
}

fn default_llm_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_model() -> String {
    "llama3.1".to_string()
}
fn default_models() -> Vec<String> {
    vec![
        "llama3.1".to_string(),
        "phi3".to_string(),
        "mistral".to_string(),
    ]
}
fn default_llm_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Ollama base URL; falls back to `llm.url` when unset.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            max_tool_calls: default_max_tool_calls(),
        }
    }
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}
fn default_max_tool_calls() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// `tracing` filter directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Config {
    /// Built-in defaults, used when no config file exists.
    pub fn minimal() -> Self {
        Self {
            storage: StorageConfig::default(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            llm: LlmConfig::default(),
            embedding: EmbeddingConfig::default(),
            agent: AgentConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.chunking.max_tokens == 0 {
            bail!("chunking.max_tokens must be > 0");
        }

        if self.retrieval.similarity_top_k == 0 {
            bail!("retrieval.similarity_top_k must be >= 1");
        }
        if self.retrieval.tool_top_k == 0 {
            bail!("retrieval.tool_top_k must be >= 1");
        }
        if self.retrieval.summary_group_chars == 0 {
            bail!("retrieval.summary_group_chars must be > 0");
        }

        if self.llm.models.is_empty() {
            bail!("llm.models must list at least one model");
        }
        self.llm
            .validate_model(&self.llm.default_model)
            .context("llm.default_model must be one of llm.models")?;
        if self.llm.timeout_secs == 0 {
            bail!("llm.timeout_secs must be > 0");
        }

        if self.embedding.dims == Some(0) {
            bail!("embedding.dims must be > 0 when set");
        }
        match self.embedding.provider.as_str() {
            "disabled" | "ollama" | "local" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be disabled, ollama, or local.",
                other
            ),
        }
        if self.embedding.provider == "ollama" && self.embedding.model.is_none() {
            bail!("embedding.model must be specified when provider is 'ollama'");
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}

/// Load `path` when it exists, otherwise fall back to [`Config::minimal`].
pub fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        Ok(Config::minimal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        config.validate().unwrap();
        assert_eq!(config.storage.upload_dir, PathBuf::from("./data"));
        assert_eq!(config.chunking.max_tokens, 1024);
        assert_eq!(config.retrieval.similarity_top_k, 2);
        assert_eq!(config.retrieval.tool_top_k, 3);
        assert_eq!(config.llm.models, vec!["llama3.1", "phi3", "mistral"]);
        assert_eq!(config.llm.timeout_secs, 300);
        assert_eq!(config.embedding.provider, "local");
    }

    #[test]
    fn test_overrides() {
        let config: Config = toml::from_str(
            r#"
[storage]
upload_dir = "/tmp/uploads"

[llm]
default_model = "phi3"
models = ["phi3"]

[embedding]
provider = "ollama"
model = "nomic-embed-text"
"#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.storage.upload_dir, PathBuf::from("/tmp/uploads"));
        assert_eq!(config.llm.default_model, "phi3");
        assert_eq!(config.embedding.model.as_deref(), Some("nomic-embed-text"));
    }

    #[test]
    fn test_rejects_unknown_default_model() {
        let config: Config = toml::from_str(
            r#"
[llm]
default_model = "gpt-4"
"#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_chunk_size() {
        let config: Config = toml::from_str("[chunking]\nmax_tokens = 0\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_tokens"));
    }

    #[test]
    fn test_rejects_unknown_provider() {
        let config: Config = toml::from_str("[embedding]\nprovider = \"openai\"\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_example_config_is_valid() {
        let config: Config =
            toml::from_str(include_str!("../config/ragchat.example.toml")).unwrap();
        config.validate().unwrap();
        assert_eq!(config.storage.include_globs, default_include_globs());
        assert_eq!(config.agent.system_prompt, DEFAULT_SYSTEM_PROMPT);
    }

    #[test]
    fn test_validate_model() {
        let llm = LlmConfig::default();
        assert!(llm.validate_model("mistral").is_ok());
        assert!(llm.validate_model("llama2").is_err());
    }
}
