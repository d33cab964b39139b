//! Application configuration for SiteKB.
//!
//! User config lives at `~/.sitekb/sitekb.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SiteKbError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "sitekb.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".sitekb";

// ---------------------------------------------------------------------------
// Config structs (matching sitekb.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP server bind settings.
    #[serde(default)]
    pub server: ServerSettings,

    /// Crawl defaults and backend selection.
    #[serde(default)]
    pub crawl: CrawlSettings,

    /// Vector index location and namespace.
    #[serde(default)]
    pub index: IndexSettings,

    /// Embedding and generation provider.
    #[serde(default)]
    pub provider: ProviderSettings,

    /// Retrieval parameters.
    #[serde(default)]
    pub query: QuerySettings,
}

/// `[server]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8000
}

/// Which page fetcher a crawl job uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlBackend {
    /// Fetch HTML directly and convert it locally.
    #[default]
    Http,
    /// Delegate fetching and conversion to an external crawl service.
    Service,
}

/// `[crawl]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlSettings {
    /// Root under which per-job output directories and archives are written.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Page budget used when a request does not name one.
    #[serde(default = "default_limit")]
    pub default_limit: usize,

    /// Largest page budget a request may ask for.
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,

    /// Per-request timeout for page fetches.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub backend: CrawlBackend,

    /// Endpoint of the external crawl service (used when `backend = "service"`).
    #[serde(default = "default_service_url")]
    pub service_url: String,

    /// Permit fetching localhost and private-network addresses.
    #[serde(default)]
    pub allow_private_hosts: bool,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            default_limit: default_limit(),
            max_limit: default_max_limit(),
            request_timeout_secs: default_request_timeout(),
            backend: CrawlBackend::default(),
            service_url: default_service_url(),
            allow_private_hosts: false,
        }
    }
}

fn default_output_dir() -> String {
    "output".into()
}
fn default_limit() -> usize {
    1
}
fn default_max_limit() -> usize {
    500
}
fn default_request_timeout() -> u64 {
    30
}
fn default_service_url() -> String {
    "http://127.0.0.1:11235/crawl".into()
}

/// `[index]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSettings {
    /// libSQL database file holding the chunk index.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Partition of the index that crawled documents are written to.
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            namespace: default_namespace(),
        }
    }
}

fn default_database_path() -> String {
    "sitekb.db".into()
}
fn default_namespace() -> String {
    "crawl_docs".into()
}

/// `[provider]` section: an OpenAI-compatible API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[serde(default = "default_chat_model")]
    pub chat_model: String,

    #[serde(default)]
    pub temperature: f32,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            embedding_model: default_embedding_model(),
            chat_model: default_chat_model(),
            temperature: 0.0,
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}
fn default_chat_model() -> String {
    "gpt-4o-mini".into()
}

/// `[query]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuerySettings {
    /// Neighbors returned by the raw nearest-neighbor lookup.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Documents handed to the generator as context.
    #[serde(default = "default_retriever_k")]
    pub retriever_k: usize,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            retriever_k: default_retriever_k(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_retriever_k() -> usize {
    4
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.sitekb/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| SiteKbError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.sitekb/sitekb.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| SiteKbError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| SiteKbError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| SiteKbError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| SiteKbError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| SiteKbError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the provider API key from the env var named in config.
pub fn resolve_api_key(settings: &ProviderSettings) -> Result<String> {
    let var_name = &settings.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(SiteKbError::config(format!(
            "provider API key not found. Set the {var_name} environment variable."
        ))),
    }
}
