//! Configuration loading.
//!
//! Non-secret settings come from a TOML file (see `config/docquery.example.toml`).
//! Secrets (OAuth client credentials, signing key, API keys) are read from the
//! environment by [`Secrets::from_env`]; a missing required secret is a fatal
//! startup error.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::models::SourceTag;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub reranker: RerankerConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    /// Externally reachable base URL, used to build the OAuth redirect URI.
    #[serde(default = "default_public_url")]
    pub public_url: String,
    #[serde(default = "default_max_request_bytes")]
    pub max_request_bytes: usize,
}

fn default_public_url() -> String {
    "http://127.0.0.1:8000".to_string()
}
fn default_max_request_bytes() -> usize {
    50 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
    #[serde(default = "default_min_chunk_chars")]
    pub min_chunk_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
            min_chunk_chars: default_min_chunk_chars(),
        }
    }
}

fn default_chunk_size() -> usize {
    500
}
fn default_overlap() -> usize {
    50
}
fn default_min_chunk_chars() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Candidates fetched from the vector store before reranking.
    #[serde(default = "default_candidate_k")]
    pub candidate_k: usize,
    /// Chunks kept after reranking.
    #[serde(default = "default_final_k")]
    pub final_k: usize,
    /// Prefix each context chunk with its originating filename.
    #[serde(default = "default_label_sources")]
    pub label_sources: bool,
    #[serde(default)]
    pub default_source: SourceTag,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            candidate_k: default_candidate_k(),
            final_k: default_final_k(),
            label_sources: default_label_sources(),
            default_source: SourceTag::default(),
        }
    }
}

fn default_candidate_k() -> usize {
    10
}
fn default_final_k() -> usize {
    3
}
fn default_label_sources() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

fn default_max_file_bytes() -> usize {
    10 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Base URL for the `ollama` provider.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            url: None,
        }
    }
}

fn default_embedding_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    32
}

#[derive(Debug, Deserialize, Clone)]
pub struct RerankerConfig {
    #[serde(default = "default_reranker_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            provider: default_reranker_provider(),
            model: None,
        }
    }
}

fn default_reranker_provider() -> String {
    "local".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorStoreConfig {
    #[serde(default = "default_vector_backend")]
    pub backend: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_vector_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_upsert_batch_size")]
    pub upsert_batch_size: usize,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            backend: default_vector_backend(),
            collection: default_collection(),
            timeout_secs: default_vector_timeout_secs(),
            upsert_batch_size: default_upsert_batch_size(),
        }
    }
}

fn default_vector_backend() -> String {
    "qdrant".to_string()
}
fn default_collection() -> String {
    "medical_docs".to_string()
}
fn default_vector_timeout_secs() -> u64 {
    60
}
fn default_upsert_batch_size() -> usize {
    64
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_llm_model(),
            base_url: default_llm_base_url(),
        }
    }
}

fn default_llm_model() -> String {
    "gemini-1.5-flash".to_string()
}
fn default_llm_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: i64,
    #[serde(default = "default_state_ttl_secs")]
    pub state_ttl_secs: i64,
    #[serde(default = "default_google_auth_url")]
    pub google_auth_url: String,
    #[serde(default = "default_google_token_url")]
    pub google_token_url: String,
    #[serde(default = "default_google_userinfo_url")]
    pub google_userinfo_url: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_ttl_hours: default_token_ttl_hours(),
            state_ttl_secs: default_state_ttl_secs(),
            google_auth_url: default_google_auth_url(),
            google_token_url: default_google_token_url(),
            google_userinfo_url: default_google_userinfo_url(),
        }
    }
}

/// One year.
const MAX_TOKEN_TTL_HOURS: i64 = 8760;

fn default_token_ttl_hours() -> i64 {
    24
}
fn default_state_ttl_secs() -> i64 {
    600
}
fn default_google_auth_url() -> String {
    "https://accounts.google.com/o/oauth2/v2/auth".to_string()
}
fn default_google_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}
fn default_google_userinfo_url() -> String {
    "https://openidconnect.googleapis.com/v1/userinfo".to_string()
}

impl Config {
    /// Redirect URI registered with the identity provider.
    pub fn oauth_redirect_uri(&self) -> String {
        format!(
            "{}/auth/google/callback",
            self.server.public_url.trim_end_matches('/')
        )
    }
}

/// Secrets and deployment-specific endpoints read from the environment.
#[derive(Clone)]
pub struct Secrets {
    pub google_client_id: String,
    pub google_client_secret: String,
    pub secret_key: String,
    pub gemini_api_key: String,
    pub qdrant_url: Option<String>,
    pub qdrant_api_key: Option<String>,
    pub frontend_redirect_url: String,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("google_client_id", &self.google_client_id)
            .field("qdrant_url", &self.qdrant_url)
            .field("frontend_redirect_url", &self.frontend_redirect_url)
            .finish_non_exhaustive()
    }
}

impl Secrets {
    /// Read secrets from the process environment.
    ///
    /// `QDRANT_URL` is only required when the Qdrant backend is selected.
    pub fn from_env(config: &Config) -> Result<Self> {
        Self::from_lookup(config, |key| std::env::var(key).ok())
    }

    /// Read secrets through an arbitrary lookup function.
    pub fn from_lookup<F>(config: &Config, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<String> {
            match lookup(key) {
                Some(v) if !v.trim().is_empty() => Ok(v),
                _ => bail!("{} environment variable not set", key),
            }
        };
        let optional = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let qdrant_url = optional("QDRANT_URL");
        if config.vector_store.backend == "qdrant" && qdrant_url.is_none() {
            bail!("QDRANT_URL environment variable not set (required for the qdrant backend)");
        }

        Ok(Self {
            google_client_id: required("GOOGLE_CLIENT_ID")?,
            google_client_secret: required("GOOGLE_CLIENT_SECRET")?,
            secret_key: required("SECRET_KEY")?,
            gemini_api_key: required("GEMINI_API_KEY")?,
            qdrant_url,
            qdrant_api_key: optional("QDRANT_API_KEY"),
            frontend_redirect_url: required("FRONTEND_REDIRECT_URL")?,
        })
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    if config.chunking.chunk_size == 0 {
        bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.chunk_size {
        bail!("chunking.overlap must be smaller than chunking.chunk_size");
    }

    // Validate retrieval
    if config.retrieval.final_k == 0 {
        bail!("retrieval.final_k must be >= 1");
    }
    if config.retrieval.candidate_k < config.retrieval.final_k {
        bail!("retrieval.candidate_k must be >= retrieval.final_k");
    }

    if config.upload.max_file_bytes == 0 {
        bail!("upload.max_file_bytes must be > 0");
    }

    // Validate embedding
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }
    match config.embedding.provider.as_str() {
        "local" => {}
        "ollama" => {
            if config.embedding.model.is_none() {
                bail!("embedding.model must be specified when provider is 'ollama'");
            }
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                bail!("embedding.dims must be > 0 when provider is 'ollama'");
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be local or ollama.",
            other
        ),
    }

    match config.reranker.provider.as_str() {
        "local" | "disabled" => {}
        other => bail!(
            "Unknown reranker provider: '{}'. Must be local or disabled.",
            other
        ),
    }

    match config.vector_store.backend.as_str() {
        "qdrant" | "memory" => {}
        other => bail!(
            "Unknown vector_store.backend: '{}'. Must be qdrant or memory.",
            other
        ),
    }
    if config.vector_store.upsert_batch_size == 0 {
        bail!("vector_store.upsert_batch_size must be > 0");
    }

    if !(1..=MAX_TOKEN_TTL_HOURS).contains(&config.auth.token_ttl_hours) {
        bail!(
            "auth.token_ttl_hours must be between 1 and {}",
            MAX_TOKEN_TTL_HOURS
        );
    }

    Ok(())
}
