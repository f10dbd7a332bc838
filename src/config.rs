use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Knowledge base variant: `"local"` or `"remote"`.
    #[serde(default = "default_provider")]
    pub provider: String,
    pub vault: VaultConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
}

fn default_provider() -> String {
    "local".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct VaultConfig {
    pub root: PathBuf,
    /// Folder prefixes excluded from syncing (vault-relative).
    #[serde(default)]
    pub excluded_folders: Vec<String>,
    /// File extensions excluded from syncing, without the leading dot.
    #[serde(default)]
    pub excluded_extensions: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Cadence of the periodic sync tick, in seconds.
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
    /// Cadence of the in-flight job status poll, in seconds.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Items per batched upload/delete transfer to a remote backend.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_interval_secs: default_sync_interval_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_sync_interval_secs() -> u64 {
    3600
}
fn default_poll_interval_secs() -> u64 {
    10
}
fn default_batch_size() -> usize {
    25
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Maximum characters per chunk.
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Number of chunks retrieved per query turn.
    #[serde(default = "default_number_of_results")]
    pub number_of_results: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            number_of_results: default_number_of_results(),
        }
    }
}

fn default_number_of_results() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_ollama_url")]
    pub url: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            url: default_ollama_url(),
            dims: default_dims(),
            max_retries: default_max_retries(),
            timeout_secs: default_embed_timeout_secs(),
        }
    }
}

fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_dims() -> usize {
    768
}
fn default_max_retries() -> u32 {
    5
}
fn default_embed_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default = "default_ollama_url")]
    pub url: String,
    #[serde(default = "default_generate_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: default_generation_model(),
            url: default_ollama_url(),
            timeout_secs: default_generate_timeout_secs(),
        }
    }
}

fn default_generation_model() -> String {
    "llama3.2".to_string()
}
fn default_generate_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RemoteConfig {
    /// Base URL of the managed search service.
    pub endpoint: Option<String>,
    /// Identifier of the knowledge base on the service.
    pub knowledge_base_id: Option<String>,
    /// Environment variable holding the bearer token, read at acquire time.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_remote_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_token_env() -> String {
    "VAULT_KB_TOKEN".to_string()
}
fn default_remote_timeout_secs() -> u64 {
    60
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    match config.provider.as_str() {
        "local" => {}
        "remote" => {
            if config.remote.endpoint.is_none() {
                anyhow::bail!("remote.endpoint must be set when provider is 'remote'");
            }
            if config.remote.knowledge_base_id.is_none() {
                anyhow::bail!("remote.knowledge_base_id must be set when provider is 'remote'");
            }
        }
        other => anyhow::bail!(
            "Unknown knowledge base provider: '{}'. Must be local or remote.",
            other
        ),
    }

    if config.chunking.max_chars == 0 {
        anyhow::bail!("chunking.max_chars must be > 0");
    }

    if config.retrieval.number_of_results == 0 {
        anyhow::bail!("retrieval.number_of_results must be >= 1");
    }

    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_minimal_local_config() {
        let file = write_config("[vault]\nroot = \"/tmp/vault\"\n");
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.provider, "local");
        assert_eq!(config.retrieval.number_of_results, 3);
        assert_eq!(config.sync.poll_interval_secs, 10);
        assert_eq!(config.embedding.dims, 768);
    }

    #[test]
    fn test_remote_requires_endpoint() {
        let file = write_config("provider = \"remote\"\n[vault]\nroot = \"/tmp/vault\"\n");
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("remote.endpoint"));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let file = write_config("provider = \"chroma\"\n[vault]\nroot = \"/tmp/vault\"\n");
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("Unknown knowledge base provider"));
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let file = write_config("[vault]\nroot = \"/tmp\"\n[chunking]\nmax_chars = 0\n");
        assert!(load_config(file.path()).is_err());
    }
}
