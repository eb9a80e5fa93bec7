//! Application configuration for Longform.
//!
//! User config lives at `~/.longform/longform.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LongformError, Result};
use crate::types::ResearchDepth;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "longform.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".longform";

// ---------------------------------------------------------------------------
// Config structs (matching longform.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Generation defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Completion service settings.
    #[serde(default)]
    pub completion: CompletionConfig,

    /// Research tool settings.
    #[serde(default)]
    pub research: ResearchConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Target length of the whole document.
    #[serde(default = "default_target_words")]
    pub target_words: u32,

    /// Maximum sections written at the same time.
    #[serde(default = "default_max_writers")]
    pub max_writers: usize,

    /// Number of writer roles the pool rotates over.
    #[serde(default = "default_writer_pool_size")]
    pub writer_pool_size: usize,

    /// Whole-run timeout in minutes.
    #[serde(default = "default_timeout_mins")]
    pub timeout_mins: u64,

    #[serde(default)]
    pub research_depth: ResearchDepth,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            target_words: default_target_words(),
            max_writers: default_max_writers(),
            writer_pool_size: default_writer_pool_size(),
            timeout_mins: default_timeout_mins(),
            research_depth: ResearchDepth::default(),
        }
    }
}

fn default_target_words() -> u32 {
    1500
}
fn default_max_writers() -> usize {
    3
}
fn default_writer_pool_size() -> usize {
    3
}
fn default_timeout_mins() -> u64 {
    30
}

/// `[completion]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    /// OpenAI-compatible API base URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Retries on transport errors, 429 and 5xx.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff delay; doubles on each retry.
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,

    /// Completion rounds allowed per role task (tool calls included).
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Requests started per minute across all roles; 0 disables pacing.
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,

    /// Consecutive failures that open the circuit breaker.
    #[serde(default = "default_breaker_threshold")]
    pub breaker_threshold: u32,

    /// Seconds the breaker stays open before a trial request.
    #[serde(default = "default_breaker_reset_secs")]
    pub breaker_reset_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            model: default_model(),
            temperature: default_temperature(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay(),
            max_iterations: default_max_iterations(),
            requests_per_minute: default_requests_per_minute(),
            breaker_threshold: default_breaker_threshold(),
            breaker_reset_secs: default_breaker_reset_secs(),
        }
    }
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_model() -> String {
    "moonshotai/kimi-k2.5".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_delay() -> u64 {
    1000
}
fn default_max_iterations() -> usize {
    6
}
fn default_requests_per_minute() -> u32 {
    30
}
fn default_breaker_threshold() -> u32 {
    5
}
fn default_breaker_reset_secs() -> u64 {
    5
}

/// `[research]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    /// Characters of scraped page text returned to the model.
    #[serde(default = "default_scrape_max_chars")]
    pub scrape_max_chars: usize,

    /// Web search results returned per query.
    #[serde(default = "default_search_results")]
    pub search_results: usize,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            scrape_max_chars: default_scrape_max_chars(),
            search_results: default_search_results(),
        }
    }
}

fn default_scrape_max_chars() -> usize {
    12_000
}
fn default_search_results() -> usize {
    8
}

// ---------------------------------------------------------------------------
// Generation options (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime options for one generation run.
#[derive(Debug, Clone)]
pub struct GenerationOptions {
    /// Upper bound on concurrently written sections. Must be at least 1.
    pub max_concurrent_writers: usize,
    /// Whole-run deadline.
    pub timeout: Duration,
    pub target_word_count: u32,
    pub research_depth: ResearchDepth,
    pub style_guidelines: Option<String>,
    pub additional_context: Option<String>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for GenerationOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_concurrent_writers: config.defaults.max_writers,
            timeout: Duration::from_secs(config.defaults.timeout_mins.saturating_mul(60)),
            target_word_count: config.defaults.target_words,
            research_depth: config.defaults.research_depth,
            style_guidelines: None,
            additional_context: None,
        }
    }
}

impl GenerationOptions {
    /// Reject options a run cannot proceed with.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_writers == 0 {
            return Err(LongformError::validation(
                "max concurrent writers must be at least 1",
            ));
        }
        if self.target_word_count == 0 {
            return Err(LongformError::validation(
                "target word count must be positive",
            ));
        }
        if self.timeout.is_zero() {
            return Err(LongformError::validation("timeout must be positive"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.longform/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| LongformError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.longform/longform.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| LongformError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| LongformError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| LongformError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let content = toml::to_string_pretty(&AppConfig::default())
        .map_err(|e| LongformError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| LongformError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Return the completion API key from the env var the config names.
pub fn validate_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.completion.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(LongformError::config(format!(
            "completion API key not found. Set the {var_name} environment variable."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let toml_str = toml::to_string_pretty(&AppConfig::default()).expect("serialize");
        assert!(toml_str.contains("target_words"));
        assert!(toml_str.contains("OPENROUTER_API_KEY"));
        assert!(toml_str.contains("research_depth = \"deep\""));
    }

    #[test]
    fn partial_config_falls_back_to_defaults() {
        let toml_str = r#"
[defaults]
max_writers = 5
research_depth = "academic"

[completion]
model = "openai/gpt-4o-mini"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.defaults.max_writers, 5);
        assert_eq!(config.defaults.target_words, 1500);
        assert_eq!(config.defaults.research_depth, ResearchDepth::Academic);
        assert_eq!(config.completion.model, "openai/gpt-4o-mini");
        assert_eq!(config.completion.max_retries, 3);
        assert_eq!(config.research.search_results, 8);
    }

    #[test]
    fn generation_options_from_config() {
        let options = GenerationOptions::from(&AppConfig::default());
        assert_eq!(options.max_concurrent_writers, 3);
        assert_eq!(options.timeout, Duration::from_secs(30 * 60));
        assert_eq!(options.target_word_count, 1500);
        assert_eq!(options.research_depth, ResearchDepth::Deep);
        options.validate().expect("defaults are valid");
    }

    #[test]
    fn huge_timeout_saturates() {
        let mut config = AppConfig::default();
        config.defaults.timeout_mins = u64::MAX;
        let options = GenerationOptions::from(&config);
        assert_eq!(options.timeout, Duration::from_secs(u64::MAX));
        options.validate().expect("still valid");
    }

    #[test]
    fn generation_options_rejects_zero_writers() {
        let options = GenerationOptions {
            max_concurrent_writers: 0,
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn load_config_from_file() {
        let path = std::env::temp_dir().join(format!("lf_cfg_{}.toml", uuid::Uuid::now_v7()));
        std::fs::write(&path, "[defaults]\ntarget_words = 800\n").expect("write");
        let config = load_config_from(&path).expect("load");
        assert_eq!(config.defaults.target_words, 800);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn api_key_validation() {
        let mut config = AppConfig::default();
        config.completion.api_key_env = "LF_TEST_NONEXISTENT_KEY_12345".into();
        let result = validate_api_key(&config);
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }
}
