//! Configuration management
//!
//! This module handles loading, validation, and management of the dossier
//! configuration. Configuration is stored in TOML format at
//! ~/.dossier/config.toml, or at the path given with `--config`.
//!
//! # Configuration Sections
//!
//! - **core**: Log level and the directory runs are written to
//! - **run**: Scenario path and branch label
//! - **target**: Target model used for generated turns during a live replay
//! - **judge**: Judge model, sampling and timeout
//! - **llm**: Backend endpoints (`[llm.openai]`, `[llm.ollama]`)
//! - **rules**: The versioned combination rule
//!
//! Every section has defaults, so a partial file (or no file) is valid.
//!
//! # Environment Overrides
//!
//! `TARGET_MODEL`, `TEMPERATURE_TARGET`, `BRANCH_LABEL`, `JUDGE_MODEL`,
//! `TEMPERATURE_JUDGE` and `SCENARIO_PATH` override the file. They are applied
//! through [`Config::apply_env_overrides`], which takes the lookup function as
//! an argument so the core never reads the process environment itself.
//!
//! # Examples
//!
//! ```no_run
//! use dossier_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = Config::load_or_create()?;
//! config.apply_env_overrides(|key| std::env::var(key).ok())?;
//!
//! println!("Judge: {}", config.judge.model);
//! # Ok(())
//! # }
//! ```

use crate::llm::split_model_id;
use crate::rules::CombinationRule;
use dossier_sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub core: CoreConfig,

    #[serde(default)]
    pub run: RunConfig,

    #[serde(default)]
    pub target: TargetSettings,

    #[serde(default)]
    pub judge: JudgeSettings,

    #[serde(default)]
    pub llm: LLMConfig,

    #[serde(default)]
    pub rules: CombinationRule,
}

/// Core settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory that receives one sub-directory per run (supports ~ expansion)
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

/// What to run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunConfig {
    /// Scenario definition (supports ~ expansion)
    #[serde(default = "default_scenario_path")]
    pub scenario_path: PathBuf,

    /// Branch label; absent or empty means the default path
    #[serde(default = "default_branch_label")]
    pub branch_label: Option<String>,
}

/// Target model settings, used only for `generated` scenario nodes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetSettings {
    /// Model id in `provider/model` form
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default)]
    pub temperature: f64,

    #[serde(default)]
    pub max_tokens: Option<u32>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// System prompt sent ahead of the replayed conversation
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

/// Judge model settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JudgeSettings {
    /// Model id in `provider/model` form
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default)]
    pub temperature: f64,

    #[serde(default = "default_judge_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// LLM backend configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LLMConfig {
    #[serde(default)]
    pub openai: OpenAIConfig,

    #[serde(default)]
    pub ollama: OllamaConfig,
}

/// OpenAI-compatible endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OpenAIConfig {
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    /// Name of the environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

/// Ollama endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("outputs")
}

fn default_scenario_path() -> PathBuf {
    PathBuf::from("scenarios/a6_landlord_tenant.yaml")
}

fn default_branch_label() -> Option<String> {
    Some("ask_for_guidance".to_string())
}

fn default_model() -> String {
    "openai/gpt-4.1".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_judge_max_tokens() -> u32 {
    400
}

fn default_system_prompt() -> String {
    "You are a helpful assistant. Provide general information, not legal advice.".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            output_dir: default_output_dir(),
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            scenario_path: default_scenario_path(),
            branch_label: default_branch_label(),
        }
    }
}

impl Default for TargetSettings {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: 0.0,
            max_tokens: None,
            timeout_secs: default_timeout_secs(),
            system_prompt: default_system_prompt(),
        }
    }
}

impl Default for JudgeSettings {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: 0.0,
            max_tokens: default_judge_max_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            base_url: default_openai_base_url(),
            api_key_env: default_api_key_env(),
        }
    }
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_base_url(),
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.dossier/config.toml)
    ///
    /// If the configuration file doesn't exist, writes the defaults there.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or written, TOML parsing
    /// fails, or validation fails.
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration text
    pub fn from_toml_str(contents: &str) -> Result<Self, EngineError> {
        let mut config: Config = toml::from_str(contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let mut config = Self::default();

        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.dossier/config.toml)
    fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".dossier").join("config.toml"))
    }

    /// Apply environment overrides through `lookup`, then re-validate
    ///
    /// An empty `BRANCH_LABEL` selects the default path.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), EngineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(model) = lookup("TARGET_MODEL") {
            self.target.model = model;
        }
        if let Some(value) = lookup("TEMPERATURE_TARGET") {
            self.target.temperature = parse_temperature("TEMPERATURE_TARGET", &value)?;
        }
        if let Some(label) = lookup("BRANCH_LABEL") {
            let label = label.trim().to_string();
            self.run.branch_label = if label.is_empty() { None } else { Some(label) };
        }
        if let Some(model) = lookup("JUDGE_MODEL") {
            self.judge.model = model;
        }
        if let Some(value) = lookup("TEMPERATURE_JUDGE") {
            self.judge.temperature = parse_temperature("TEMPERATURE_JUDGE", &value)?;
        }
        if let Some(path) = lookup("SCENARIO_PATH") {
            self.run.scenario_path = PathBuf::from(path);
        }

        self.validate_and_process()
    }

    /// Validate and process configuration
    ///
    /// Checks the log level, model ids, temperatures, timeouts and the rule,
    /// and expands ~ in paths.
    fn validate_and_process(&mut self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        split_model_id(&self.target.model)?;
        split_model_id(&self.judge.model)?;

        check_temperature("target.temperature", self.target.temperature)?;
        check_temperature("judge.temperature", self.judge.temperature)?;

        if self.target.timeout_secs == 0 || self.judge.timeout_secs == 0 {
            return Err(EngineError::Config(
                "timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.judge.max_tokens == 0 {
            return Err(EngineError::Config(
                "judge.max_tokens must be greater than 0".to_string(),
            ));
        }

        self.rules.validate()?;

        if self
            .run
            .branch_label
            .as_deref()
            .is_some_and(|l| l.trim().is_empty())
        {
            self.run.branch_label = None;
        }

        self.core.output_dir = expand_path(&self.core.output_dir)?;
        self.run.scenario_path = expand_path(&self.run.scenario_path)?;

        Ok(())
    }
}

fn parse_temperature(key: &str, value: &str) -> Result<f64, EngineError> {
    value
        .trim()
        .parse::<f64>()
        .map_err(|_| EngineError::Config(format!("{} must be a number, got '{}'", key, value)))
}

fn check_temperature(key: &str, value: f64) -> Result<(), EngineError> {
    if !(0.0..=2.0).contains(&value) {
        return Err(EngineError::Config(format!(
            "{} must be between 0.0 and 2.0",
            key
        )));
    }
    Ok(())
}

/// Directory the bundled `scenarios/` folder lives in
pub const BUNDLED_SCENARIO_ROOT: &str = env!("CARGO_MANIFEST_DIR");

/// Resolve a scenario path for loading
///
/// Absolute paths and relative paths that exist under the working directory
/// are used as given. Other relative paths are looked up under
/// [`BUNDLED_SCENARIO_ROOT`], so the default `scenarios/...` path also works
/// from the workspace root. A path found nowhere is returned unchanged and
/// fails on load with the original name.
pub fn resolve_scenario_path(path: &Path) -> PathBuf {
    resolve_against(path, Path::new(BUNDLED_SCENARIO_ROOT))
}

fn resolve_against(path: &Path, root: &Path) -> PathBuf {
    if path.is_absolute() || path.exists() {
        return path.to_path_buf();
    }
    let anchored = root.join(path);
    if anchored.exists() {
        tracing::debug!(path = %anchored.display(), "Resolved scenario under bundled root");
        anchored
    } else {
        path.to_path_buf()
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}
