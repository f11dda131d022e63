//! Configuration management
//!
//! This module handles loading, validation, and management of the Loom
//! configuration. Configuration is stored in TOML format at
//! ~/.loom/config.toml; every field has a documented default so an empty file
//! is valid.
//!
//! # Configuration Sections
//!
//! - **core**: Memory root path, log level
//! - **llm**: Chat-completion endpoint and model for the agent roster
//! - **limits**: Every timeout, cap, and ceiling the orchestrator enforces
//!
//! # Memory root resolution
//!
//! The memory root is resolved in priority order:
//! 1. `--memory` CLI flag
//! 2. `MEMORY_PATH` environment variable
//! 3. a `.memory_path` file in the working directory (sole contents: the
//!    absolute path)
//! 4. `core.memory_path` from the config file
//!
//! A missing root is a startup error (`ConfigMissing`, exit code 4).
//!
//! # Path Expansion
//!
//! Paths support `~` expansion to the user's home directory.

use sdk::errors::CoreError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable holding the LM transport credential
pub const CREDENTIAL_ENV: &str = "LOOM_API_KEY";

/// Environment variable overriding the memory root
pub const MEMORY_PATH_ENV: &str = "MEMORY_PATH";

/// Bootstrap file naming the memory root
pub const MEMORY_PATH_FILE: &str = ".memory_path";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Core settings
    #[serde(default)]
    pub core: CoreConfig,

    /// LM transport configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// Orchestrator limits and ceilings
    #[serde(default)]
    pub limits: Limits,
}

/// Core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Memory root directory (lowest-priority source; see module docs)
    #[serde(default)]
    pub memory_path: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            memory_path: None,
            log_level: default_log_level(),
        }
    }
}

/// LM transport configuration
///
/// The transport itself is an external collaborator; the engine only needs an
/// endpoint, a model name, and the name of the credential variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Chat-completions base URL
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    /// Model identifier sent with each request
    #[serde(default = "default_llm_model")]
    pub model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
        }
    }
}

/// Every limit the orchestrator enforces, with documented defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limits {
    /// Aggregate memory coverage below which research fires
    #[serde(default = "default_coverage_threshold")]
    pub coverage_threshold: f64,

    /// Maximum web searches per research pass
    #[serde(default = "default_max_research_queries")]
    pub max_research_queries: u32,

    /// Per-research-query timeout in seconds
    #[serde(default = "default_research_timeout_secs")]
    pub research_timeout_secs: u64,

    /// Per-agent-call timeout in seconds
    #[serde(default = "default_agent_timeout_secs")]
    pub agent_timeout_secs: u64,

    /// Per-gate timeout in seconds
    #[serde(default = "default_gate_timeout_secs")]
    pub gate_timeout_secs: u64,

    /// Iteration cap; exceeding it aborts the session
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Context bundle byte ceiling
    #[serde(default = "default_context_ceiling_bytes")]
    pub context_ceiling_bytes: usize,

    /// Tool calls allowed per iteration
    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls_per_iteration: u32,

    /// Byte cap for a single learning-log append
    #[serde(default = "default_learning_append_bytes")]
    pub learning_append_bytes: usize,

    /// Learning entries injected at session start
    #[serde(default = "default_recall_limit")]
    pub recall_limit: usize,

    /// Retries for a retryable agent failure (identical inputs)
    #[serde(default = "default_agent_retries")]
    pub agent_retries: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            coverage_threshold: default_coverage_threshold(),
            max_research_queries: default_max_research_queries(),
            research_timeout_secs: default_research_timeout_secs(),
            agent_timeout_secs: default_agent_timeout_secs(),
            gate_timeout_secs: default_gate_timeout_secs(),
            max_iterations: default_max_iterations(),
            context_ceiling_bytes: default_context_ceiling_bytes(),
            max_tool_calls_per_iteration: default_max_tool_calls(),
            learning_append_bytes: default_learning_append_bytes(),
            recall_limit: default_recall_limit(),
            agent_retries: default_agent_retries(),
        }
    }
}

impl Limits {
    /// Research query timeout as a `Duration`
    pub fn research_timeout(&self) -> Duration {
        Duration::from_secs(self.research_timeout_secs)
    }

    /// Agent call timeout as a `Duration`
    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_secs)
    }

    /// Gate timeout as a `Duration`
    pub fn gate_timeout(&self) -> Duration {
        Duration::from_secs(self.gate_timeout_secs)
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_coverage_threshold() -> f64 {
    0.6
}

fn default_max_research_queries() -> u32 {
    8
}

fn default_research_timeout_secs() -> u64 {
    20
}

fn default_agent_timeout_secs() -> u64 {
    120
}

fn default_gate_timeout_secs() -> u64 {
    30 * 60
}

fn default_max_iterations() -> u32 {
    10
}

fn default_context_ceiling_bytes() -> usize {
    32 * 1024
}

fn default_max_tool_calls() -> u32 {
    40
}

fn default_learning_append_bytes() -> usize {
    8 * 1024
}

fn default_recall_limit() -> usize {
    20
}

fn default_agent_retries() -> u32 {
    2
}

impl Config {
    /// Load configuration from the default location (~/.loom/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a commented default.
    pub fn load_or_create() -> Result<Self, CoreError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, CoreError> {
        let contents = fs::read_to_string(path).map_err(|e| {
            CoreError::ConfigMissing(format!("failed to read config file: {}", e))
        })?;

        let mut config: Config = toml::from_str(&contents)
            .map_err(|e| CoreError::ConfigMissing(format!("failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration file and return the defaults
    fn create_default(path: &Path) -> Result<Self, CoreError> {
        let config = Config::default();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let header = "# Loom configuration. Every field is optional; the\n\
                      # values below are the engine defaults.\n\n";
        let body = toml::to_string_pretty(&config)
            .map_err(|e| CoreError::ConfigMissing(format!("failed to render defaults: {}", e)))?;
        fs::write(path, format!("{}{}", header, body))?;

        tracing::info!("Created default config at {}", path.display());
        Ok(config)
    }

    /// Default config file location: ~/.loom/config.toml
    pub fn default_config_path() -> Result<PathBuf, CoreError> {
        let home = dirs::home_dir()
            .ok_or_else(|| CoreError::ConfigMissing("cannot determine home directory".into()))?;
        Ok(home.join(".loom").join("config.toml"))
    }

    /// Validate limit values that have no meaningful zero
    pub fn validate(&mut self) -> Result<(), CoreError> {
        if !(0.0..=1.0).contains(&self.limits.coverage_threshold) {
            return Err(CoreError::ConfigMissing(format!(
                "coverage_threshold must be within [0, 1], got {}",
                self.limits.coverage_threshold
            )));
        }
        if self.limits.max_iterations == 0 {
            return Err(CoreError::ConfigMissing(
                "max_iterations must be at least 1".into(),
            ));
        }
        if self.limits.context_ceiling_bytes == 0 {
            return Err(CoreError::ConfigMissing(
                "context_ceiling_bytes must be nonzero".into(),
            ));
        }
        Ok(())
    }

    /// Resolve the memory root (see module docs for priority order).
    ///
    /// The resolved directory must exist; a missing root is a startup error.
    pub fn resolve_memory_root(&self, cli_override: Option<&Path>) -> Result<PathBuf, CoreError> {
        let candidate = if let Some(path) = cli_override {
            Some(path.to_path_buf())
        } else if let Ok(env_path) = std::env::var(MEMORY_PATH_ENV) {
            Some(PathBuf::from(env_path.trim()))
        } else if let Ok(contents) = fs::read_to_string(MEMORY_PATH_FILE) {
            let trimmed = contents.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(PathBuf::from(trimmed))
            }
        } else {
            self.core.memory_path.clone()
        };

        let root = candidate.ok_or_else(|| {
            CoreError::ConfigMissing(
                "no memory root configured (--memory, MEMORY_PATH, .memory_path, or config)"
                    .into(),
            )
        })?;

        let root = expand_home(&root);
        if !root.is_dir() {
            return Err(CoreError::ConfigMissing(format!(
                "memory root is not a directory: {}",
                root.display()
            )));
        }
        Ok(root)
    }

    /// Read the LM credential from the environment
    pub fn credential(&self) -> Result<String, CoreError> {
        std::env::var(CREDENTIAL_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| CoreError::CredentialMissing(CREDENTIAL_ENV.into()))
    }
}

/// Expand a leading `~/` to the user's home directory
pub fn expand_home(path: &Path) -> PathBuf {
    let Some(s) = path.to_str() else {
        return path.to_path_buf();
    };
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
