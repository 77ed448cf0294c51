//! Configuration management for goalforge
//!
//! Stores settings in ~/.config/goalforge/config.json. Environment variables prefixed with
//! `GOALFORGE_` override the file; CLI flags override both.

use goalforge_core::attempts::AttemptSpec;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

const ENV_PREFIX: &str = "GOALFORGE_";
const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Invalid api_base_url {0:?}: must be an absolute http(s) URL")]
    InvalidApiUrl(String),

    #[error("Invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the backend serving the file, branch, LLM and goal endpoints.
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    pub llm_max_tokens: u32,
    pub llm_temperature: f32,
    /// Per-stage attempt budget, either a count or an explicit list.
    pub attempts: AttemptSpec,
    pub allow_empty_stage: bool,
    pub force_implementation: bool,
    pub pause_poll_interval_ms: u64,
    /// `source` value sent with every staging request.
    pub stage_source: String,
    pub max_context_file_chars: usize,
    pub max_context_files: usize,
    pub log_level: String,
    pub log_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:3000/api".to_string(),
            request_timeout_secs: 120,
            llm_max_tokens: 4096,
            llm_temperature: 0.2,
            attempts: AttemptSpec::default(),
            allow_empty_stage: false,
            force_implementation: false,
            pause_poll_interval_ms: 500,
            stage_source: "ai".to_string(),
            max_context_file_chars: 12_000,
            max_context_files: 6,
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

impl Config {
    fn sanitize(&mut self) {
        self.api_base_url = self.api_base_url.trim().trim_end_matches('/').to_string();
        self.log_level = self.log_level.trim().to_ascii_lowercase();
        if self.stage_source.trim().is_empty() {
            self.stage_source = Self::default().stage_source;
        }
        if self.max_context_files == 0 {
            self.max_context_files = Self::default().max_context_files;
        }
    }

    /// Get the config directory path
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("goalforge"))
    }

    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load config from disk, or return default
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load config from `path`. A corrupt file is moved aside and defaults are returned.
    pub fn load_from(path: &Path) -> Self {
        let Ok(content) = fs::read_to_string(path) else {
            return Self::default();
        };
        match serde_json::from_str::<Config>(&content) {
            Ok(mut config) => {
                config.sanitize();
                config
            }
            Err(err) => {
                preserve_corrupt_config(path, &content);
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "config file was corrupted; a backup was saved and defaults were loaded"
                );
                Self::default()
            }
        }
    }

    /// Save config to disk
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = Self::config_path().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let mut sanitized = self.clone();
        sanitized.sanitize();

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Err(e) = fs::set_permissions(dir, fs::Permissions::from_mode(0o700)) {
                    tracing::debug!(error = %e, "failed to set config directory permissions");
                }
            }
        }

        let content = serde_json::to_string_pretty(&sanitized)?;

        #[cfg(unix)]
        {
            write_config_atomic(path, &content)?;
        }

        #[cfg(not(unix))]
        {
            fs::write(path, content)?;
        }

        Ok(())
    }

    /// Apply `GOALFORGE_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup; unparsable values are ignored with a warning.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(&format!("{}{}", ENV_PREFIX, name))
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(url) = get("API_URL") {
            self.api_base_url = url;
        }
        if let Some(raw) = get("ATTEMPTS") {
            match AttemptSpec::parse(&raw) {
                Some(spec) => self.attempts = spec,
                None => tracing::warn!(value = %raw, "ignoring unparsable GOALFORGE_ATTEMPTS"),
            }
        }
        if let Some(raw) = get("ALLOW_EMPTY_STAGE") {
            override_parsed(&mut self.allow_empty_stage, "ALLOW_EMPTY_STAGE", &raw, parse_bool);
        }
        if let Some(raw) = get("FORCE_IMPLEMENTATION") {
            override_parsed(
                &mut self.force_implementation,
                "FORCE_IMPLEMENTATION",
                &raw,
                parse_bool,
            );
        }
        if let Some(raw) = get("TIMEOUT_SECS") {
            override_parsed(&mut self.request_timeout_secs, "TIMEOUT_SECS", &raw, |v| {
                v.parse().ok()
            });
        }
        if let Some(raw) = get("MAX_TOKENS") {
            override_parsed(&mut self.llm_max_tokens, "MAX_TOKENS", &raw, |v| v.parse().ok());
        }
        if let Some(raw) = get("TEMPERATURE") {
            override_parsed(&mut self.llm_temperature, "TEMPERATURE", &raw, |v| {
                v.parse().ok()
            });
        }
        if let Some(level) = get("LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(raw) = get("LOG_JSON") {
            override_parsed(&mut self.log_json, "LOG_JSON", &raw, parse_bool);
        }
        self.sanitize();
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match url::Url::parse(&self.api_base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => {}
            _ => return Err(ConfigError::InvalidApiUrl(self.api_base_url.clone())),
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Validation {
                field: "request_timeout_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.llm_max_tokens == 0 {
            return Err(ConfigError::Validation {
                field: "llm_max_tokens",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(0.0..=2.0).contains(&self.llm_temperature) {
            return Err(ConfigError::Validation {
                field: "llm_temperature",
                reason: format!("{} is outside 0.0..=2.0", self.llm_temperature),
            });
        }
        if self.pause_poll_interval_ms == 0 {
            return Err(ConfigError::Validation {
                field: "pause_poll_interval_ms",
                reason: "must be at least 1".to_string(),
            });
        }
        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Validation {
                field: "log_level",
                reason: format!(
                    "{:?} must be one of: {}",
                    self.log_level,
                    LOG_LEVELS.join(", ")
                ),
            });
        }
        Ok(())
    }

    /// Get the config file location for display
    pub fn config_location() -> String {
        Self::config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "~/.config/goalforge/config.json".to_string())
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn override_parsed<T>(slot: &mut T, name: &str, raw: &str, parse: impl Fn(&str) -> Option<T>) {
    match parse(raw) {
        Some(value) => *slot = value,
        None => tracing::warn!(value = %raw, "ignoring unparsable {}{}", ENV_PREFIX, name),
    }
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("json.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

#[cfg(unix)]
fn write_config_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    use std::fs::OpenOptions;
    use std::os::unix::fs::PermissionsExt;

    let tmp_path = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)?;

    if let Err(e) = file.set_permissions(fs::Permissions::from_mode(0o600)) {
        tracing::debug!(error = %e, "failed to set temp config file permissions");
    }

    file.write_all(content.as_bytes())?;

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }
    Ok(())
}
