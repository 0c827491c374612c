//! Configuration management
//!
//! TOML file in the platform config directory, created with defaults on
//! first load. API keys are never stored here; `llm.api_key_env` names the
//! environment variable that holds the key.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::store::ReviewScope;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub evaluator: EvaluatorConfig,
    #[serde(default)]
    pub review: ReviewConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite interaction log
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// Intent dataset JSON document
    #[serde(default = "default_intents_path")]
    pub intents_path: PathBuf,
}

fn default_database_path() -> PathBuf {
    data_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("logs.db")
}

fn default_intents_path() -> PathBuf {
    data_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("intents.json")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            intents_path: default_intents_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Minimum classifier probability for the template-response path
    #[serde(default = "default_threshold")]
    pub acceptance_threshold: f64,
    /// Prior exchanges handed to the retrieval fallback
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    /// Tag whose templates get the live product listing
    #[serde(default = "default_catalog_tag")]
    pub catalog_tag: String,
    #[serde(default = "default_catalog_placeholder")]
    pub catalog_placeholder: String,
    /// Fixed seed for response selection; random when unset
    #[serde(default)]
    pub rng_seed: Option<u64>,
}

fn default_threshold() -> f64 {
    0.95
}

fn default_history_window() -> usize {
    2
}

fn default_catalog_tag() -> String {
    "list_products".to_string()
}

fn default_catalog_placeholder() -> String {
    "{product_list}".to_string()
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            acceptance_threshold: default_threshold(),
            history_window: default_history_window(),
            catalog_tag: default_catalog_tag(),
            catalog_placeholder: default_catalog_placeholder(),
            rng_seed: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default = "default_classifier_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_classifier_endpoint() -> String {
    "http://127.0.0.1:5001/predict".to_string()
}

fn default_timeout() -> u64 {
    30
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            endpoint: default_classifier_endpoint(),
            timeout_secs: default_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// OpenAI-compatible API base URL
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_llm_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta/openai".to_string()
}

fn default_llm_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}

fn default_max_tokens() -> u32 {
    1024
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            api_key_env: default_api_key_env(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    /// Context documents per query
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_embedding_model() -> String {
    "text-embedding-004".to_string()
}

fn default_top_k() -> usize {
    3
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            embedding_model: default_embedding_model(),
            top_k: default_top_k(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_products_url")]
    pub products_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_products_url() -> String {
    "http://localhost:8080/api/products/get-all-products-for-chatbot".to_string()
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            products_url: default_products_url(),
            timeout_secs: default_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Run a batch periodically inside `serve`; disabled when unset
    #[serde(default)]
    pub interval_secs: Option<u64>,
}

fn default_batch_size() -> usize {
    20
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            interval_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReviewConfig {
    /// Which uncorrected rows the general review queue shows
    #[serde(default)]
    pub general_queue: ReviewScope,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, writing defaults if absent
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path()?)
    }

    /// Load configuration from an explicit path, writing defaults if absent
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save configuration to the given path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let parent = path.parent().context("Config path has no parent")?;
        std::fs::create_dir_all(parent).context("Failed to create config directory")?;

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }
}

/// Get the configuration file path
pub fn config_path() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "intent-desk", "intent-desk")
        .context("Failed to get project directories")?;
    Ok(base.config_dir().join("config.toml"))
}

/// Get the data directory path
pub fn data_dir() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "intent-desk", "intent-desk")
        .context("Failed to get project directories")?;
    Ok(base.data_dir().to_path_buf())
}

/// Get default configuration as TOML string
pub fn default_config_toml() -> String {
    let config = Config::default();
    toml::to_string_pretty(&config).unwrap_or_else(|_| "# Default configuration\n".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [router]
            acceptance_threshold = 0.9

            [review]
            general_queue = "not_flagged"
            "#,
        )
        .unwrap();

        assert_eq!(config.router.acceptance_threshold, 0.9);
        assert_eq!(config.router.history_window, 2);
        assert_eq!(config.router.catalog_tag, "list_products");
        assert_eq!(config.review.general_queue, ReviewScope::NotFlagged);
        assert_eq!(config.evaluator.batch_size, 20);
        assert_eq!(config.llm.model, "gemini-2.0-flash");
    }

    #[test]
    fn test_load_from_missing_file_writes_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.server.port, 5000);

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.router.catalog_placeholder, "{product_list}");
    }
}
