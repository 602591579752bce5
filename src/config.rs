//! TOML configuration.
//!
//! Every section except `[db]` and `[server]` is optional and falls back to
//! defaults tuned for the grocery support deployment (500-char chunks with a
//! 50-char overlap, top-5 retrieval, 60s completion timeout, 30s function
//! timeout).

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Target window length in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks.
    #[serde(default = "default_overlap")]
    pub overlap: usize,
    /// How far back from a window's right edge to look for a sentence break.
    #[serde(default = "default_lookback")]
    pub lookback: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
            lookback: default_lookback(),
        }
    }
}

fn default_chunk_size() -> usize {
    500
}
fn default_overlap() -> usize {
    50
}
fn default_lookback() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Expected vector length. Provider responses of any other length are
    /// discarded as unavailable.
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (Ollama, or an OpenAI-compatible gateway).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            max_retries: default_max_retries(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_embedding_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// `"local"` searches this service's store; `"remote"` delegates to
    /// another service's retrieval endpoint.
    #[serde(default = "default_retrieval_mode")]
    pub mode: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Hits scoring below this are dropped before building context.
    #[serde(default)]
    pub min_similarity: f32,
    #[serde(default)]
    pub remote_url: Option<String>,
    #[serde(default = "default_completion_timeout")]
    pub timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            mode: default_retrieval_mode(),
            top_k: default_top_k(),
            min_similarity: 0.0,
            remote_url: None,
            timeout_secs: default_completion_timeout(),
        }
    }
}

fn default_retrieval_mode() -> String {
    "local".to_string()
}
fn default_top_k() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    #[serde(default)]
    pub enabled: bool,
    /// OpenAI-compatible base URL; `/chat/completions` is appended.
    #[serde(default = "default_completion_url")]
    pub url: String,
    #[serde(default = "default_completion_model")]
    pub model: String,
    /// Environment variable holding the bearer token.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_completion_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_function_timeout")]
    pub function_timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_completion_url(),
            model: default_completion_model(),
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_completion_timeout(),
            function_timeout_secs: default_function_timeout(),
        }
    }
}

fn default_completion_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_completion_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_temperature() -> f32 {
    0.3
}
fn default_max_tokens() -> u32 {
    800
}
fn default_completion_timeout() -> u64 {
    60
}
fn default_function_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    /// Most recent messages fed to the model as history.
    #[serde(default = "default_history_limit")]
    pub history_limit: i64,
    #[serde(default = "default_fallback_message")]
    pub fallback_message: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            fallback_message: default_fallback_message(),
        }
    }
}

fn default_history_limit() -> i64 {
    20
}

pub fn default_fallback_message() -> String {
    "Thanks for reaching out! A member of our support team will get back to you shortly. \
     In the meantime you can browse our products, check your orders, or ask about delivery, \
     payment and promotions."
        .to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.overlap must be smaller than chunking.chunk_size");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if config.embedding.is_enabled() && config.embedding.model.is_none() {
        anyhow::bail!(
            "embedding.model must be specified when provider is '{}'",
            config.embedding.provider
        );
    }

    if config.embedding.dims == Some(0) {
        anyhow::bail!("embedding.dims must be > 0 when set");
    }

    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    match config.retrieval.mode.as_str() {
        "local" => {}
        "remote" => {
            if config.retrieval.remote_url.is_none() {
                anyhow::bail!("retrieval.remote_url is required when retrieval.mode = 'remote'");
            }
        }
        other => anyhow::bail!(
            "Unknown retrieval mode: '{}'. Must be local or remote.",
            other
        ),
    }

    if config.chat.fallback_message.trim().is_empty() {
        anyhow::bail!("chat.fallback_message must not be empty");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src)?;
        validate(&config)?;
        Ok(config)
    }

    const MINIMAL: &str = r#"
[db]
path = "./data/support.sqlite"

[server]
bind = "127.0.0.1:8088"
"#;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse(MINIMAL).unwrap();
        assert_eq!(config.chunking.chunk_size, 500);
        assert_eq!(config.chunking.overlap, 50);
        assert_eq!(config.chunking.lookback, 100);
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.retrieval.mode, "local");
        assert!(!config.embedding.is_enabled());
        assert!(!config.completion.enabled);
        assert_eq!(config.completion.timeout_secs, 60);
        assert_eq!(config.completion.function_timeout_secs, 30);
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk() {
        let src = format!("{}\n[chunking]\nchunk_size = 50\noverlap = 50\n", MINIMAL);
        let err = parse(&src).unwrap_err();
        assert!(err.to_string().contains("overlap"));
    }

    #[test]
    fn remote_retrieval_requires_url() {
        let src = format!("{}\n[retrieval]\nmode = \"remote\"\n", MINIMAL);
        let err = parse(&src).unwrap_err();
        assert!(err.to_string().contains("remote_url"));
    }

    #[test]
    fn unknown_embedding_provider_rejected() {
        let src = format!("{}\n[embedding]\nprovider = \"magic\"\nmodel = \"m\"\n", MINIMAL);
        let err = parse(&src).unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn zero_embedding_dims_rejected() {
        let src = format!(
            "{}\n[embedding]\nprovider = \"ollama\"\nmodel = \"nomic-embed-text\"\ndims = 0\n",
            MINIMAL
        );
        let err = parse(&src).unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));

        let src = format!(
            "{}\n[embedding]\nprovider = \"ollama\"\nmodel = \"nomic-embed-text\"\ndims = 768\n",
            MINIMAL
        );
        assert_eq!(parse(&src).unwrap().embedding.dims, Some(768));
    }
}
