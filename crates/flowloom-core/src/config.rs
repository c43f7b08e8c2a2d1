use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{FlowError, Result};

/// Top-level flowloom configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub fallback_models: Vec<ModelConfig>,
    #[serde(default)]
    pub suspension: SuspensionConfig,
    #[serde(default)]
    pub delegation: Option<DelegationConfig>,
    #[serde(default)]
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Max characters of a node output kept in trace previews.
    #[serde(default = "default_output_preview_chars")]
    pub output_preview_chars: usize,
    /// Directory for JSONL run logs. Disabled when unset.
    #[serde(default)]
    pub log_dir: Option<String>,
    /// Publish engine events on the event bus.
    #[serde(default = "default_log_events")]
    pub log_events: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            output_preview_chars: default_output_preview_chars(),
            log_dir: None,
            log_events: default_log_events(),
        }
    }
}

fn default_output_preview_chars() -> usize { 200 }
fn default_log_events() -> bool { true }

/// LLM provider configuration used by `llm` nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model_id")]
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub azure_resource: Option<String>,
    #[serde(default)]
    pub azure_deployment: Option<String>,
    #[serde(default)]
    pub azure_api_version: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model_id: default_model_id(),
            api_key: None,
            base_url: None,
            azure_resource: None,
            azure_deployment: None,
            azure_api_version: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            retry: None,
        }
    }
}

fn default_provider() -> String { "offline".to_string() }
fn default_model_id() -> String { "gpt-3.5-turbo".to_string() }
fn default_max_tokens() -> u32 { 2048 }
fn default_temperature() -> f32 { 0.7 }

/// Retry configuration for LLM requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

/// Where suspended runs are kept between `run` and `resume`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspensionConfig {
    #[serde(default = "default_suspension_enabled")]
    pub enabled: bool,
    #[serde(default = "default_suspension_db")]
    pub db_path: String,
}

impl Default for SuspensionConfig {
    fn default() -> Self {
        Self {
            enabled: default_suspension_enabled(),
            db_path: default_suspension_db(),
        }
    }
}

fn default_suspension_enabled() -> bool { true }
fn default_suspension_db() -> String { "flowloom-suspended.db".to_string() }

/// External chat-flow platform used as an alternative execution backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationConfig {
    #[serde(default = "default_delegation_enabled")]
    pub enabled: bool,
    #[serde(default = "default_delegation_url")]
    pub api_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_delegation_timeout")]
    pub timeout_secs: u64,
}

impl Default for DelegationConfig {
    fn default() -> Self {
        Self {
            enabled: default_delegation_enabled(),
            api_url: default_delegation_url(),
            api_key: None,
            timeout_secs: default_delegation_timeout(),
        }
    }
}

fn default_delegation_enabled() -> bool { true }
fn default_delegation_url() -> String { "http://localhost:3000".to_string() }
fn default_delegation_timeout() -> u64 { 120 }

/// Limits for the built-in tool-like node kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
    #[serde(default = "default_code_timeout")]
    pub code_timeout_secs: u64,
    #[serde(default = "default_document_max_length")]
    pub document_max_length: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            http_timeout_secs: default_http_timeout(),
            code_timeout_secs: default_code_timeout(),
            document_max_length: default_document_max_length(),
        }
    }
}

fn default_http_timeout() -> u64 { 30 }
fn default_code_timeout() -> u64 { 30 }
fn default_document_max_length() -> usize { 30_000 }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| FlowError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        let config = toml::from_str(&expanded).map_err(|e| FlowError::Config(e.to_string()))?;
        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Load the config if the file exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            warn!(path = %path.display(), "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Resolve the suspension database path (expand ~).
    pub fn suspension_db_path(&self) -> PathBuf {
        expand_home(&self.suspension.db_path)
    }

    /// Resolve the run log directory (expand ~).
    pub fn log_dir(&self) -> Option<PathBuf> {
        self.engine.log_dir.as_deref().map(expand_home)
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_home() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    warn!(var = %var_name, "Config references an unset environment variable");
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
