//! Configuration parsing for the fix daemon.
//!
//! Uses a key=value format (`.scriptfix/config`).
//! Precedence: CLI flags > `--config` file > `.scriptfix/config` > defaults.

use crate::types::BackendMode;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default location of the per-directory config file.
pub const DEFAULT_CONFIG_PATH: &str = ".scriptfix/config";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("invalid config line: {0}")]
    InvalidLine(String),
    #[error("invalid boolean value for {key}: {value}")]
    InvalidBool { key: String, value: String },
    #[error("invalid integer value for {key}: {value}")]
    InvalidInt { key: String, value: String },
    #[error("invalid number value for {key}: {value}")]
    InvalidFloat { key: String, value: String },
}

/// Daemon and pipeline configuration.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    // Script execution
    /// Interpreter used to run uploaded scripts.
    pub python_bin: PathBuf,
    /// Wall-clock limit per script run in seconds (0 = no timeout).
    pub script_timeout_sec: u32,
    /// Lines of log returned for display.
    pub log_tail_lines: usize,

    // Completion backend
    pub backend: BackendMode,
    /// Base URL of the OpenAI-compatible API.
    pub api_base: String,
    pub agent_model: String,
    pub chat_model: String,
    pub temperature: f32,
    /// Offer the agent a local shell tool running inside the session directory.
    pub agent_shell_tool: bool,
    /// Upper bound on agent request/tool-call round trips per fix.
    pub agent_max_turns: u32,
    /// Timeout for a single completion request in seconds (0 = wait forever).
    pub request_timeout_sec: u32,

    // Sessions
    /// Parent directory for per-session scratch directories.
    pub work_dir: PathBuf,
    /// Keep session directories (uploads, versions, logs) after the pipeline ends.
    pub keep_artifacts: bool,
    pub max_upload_bytes: usize,
    pub max_concurrent_sessions: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            python_bin: PathBuf::from("python3"),
            script_timeout_sec: 60,
            log_tail_lines: crate::inspect::DEFAULT_TAIL_LINES,
            backend: BackendMode::Agent,
            api_base: "https://api.openai.com/v1".to_string(),
            agent_model: "gpt-4o".to_string(),
            chat_model: "gpt-4o".to_string(),
            temperature: 0.1,
            agent_shell_tool: false,
            agent_max_turns: 8,
            request_timeout_sec: 0,
            work_dir: std::env::temp_dir().join("scriptfix"),
            keep_artifacts: false,
            max_upload_bytes: 1024 * 1024,
            max_concurrent_sessions: 4,
        }
    }
}

impl Config {
    /// Load config from a file, merging with defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.load_file(path)?;
        Ok(config)
    }

    /// Load and merge values from a config file.
    pub fn load_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let content = std::fs::read_to_string(path)?;
        self.parse_content(&content)
    }

    /// Parse config content (key=value format).
    pub fn parse_content(&mut self, content: &str) -> Result<(), ConfigError> {
        for line in content.lines() {
            let trimmed = line.trim();

            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let Some((key, value)) = trimmed.split_once('=') else {
                return Err(ConfigError::InvalidLine(line.to_string()));
            };

            let key = key.trim();
            let value = Self::unquote(value.trim());

            self.apply_value(key, &value)?;
        }
        Ok(())
    }

    /// Remove surrounding quotes from a value.
    fn unquote(value: &str) -> String {
        if value.len() >= 2
            && ((value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\'')))
        {
            return value[1..value.len() - 1].to_string();
        }
        value.to_string()
    }

    /// Apply a single config value.
    fn apply_value(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "python_bin" => self.python_bin = PathBuf::from(value),
            "script_timeout_sec" => self.script_timeout_sec = Self::parse_int(key, value)?,
            "log_tail_lines" => self.log_tail_lines = Self::parse_int(key, value)?,
            "backend" => {
                self.backend = match value {
                    "agent" => BackendMode::Agent,
                    "chat" => BackendMode::Chat,
                    _ => {
                        return Err(ConfigError::InvalidLine(format!(
                            "backend must be 'agent' or 'chat', got '{value}'"
                        )))
                    }
                }
            }
            "api_base" => self.api_base = value.trim_end_matches('/').to_string(),
            "agent_model" => self.agent_model = value.to_string(),
            "chat_model" => self.chat_model = value.to_string(),
            "temperature" => {
                self.temperature = value.parse().map_err(|_| ConfigError::InvalidFloat {
                    key: key.to_string(),
                    value: value.to_string(),
                })?;
            }
            "agent_shell_tool" => self.agent_shell_tool = Self::parse_bool(key, value)?,
            "agent_max_turns" => self.agent_max_turns = Self::parse_int(key, value)?,
            "request_timeout_sec" => self.request_timeout_sec = Self::parse_int(key, value)?,
            "work_dir" => self.work_dir = PathBuf::from(value),
            "keep_artifacts" => self.keep_artifacts = Self::parse_bool(key, value)?,
            "max_upload_bytes" => self.max_upload_bytes = Self::parse_int(key, value)?,
            "max_concurrent_sessions" => {
                self.max_concurrent_sessions = Self::parse_int(key, value)?;
            }
            _ => {
                // Warn but don't fail for unknown keys.
                eprintln!("Warning: unknown config key: {key}");
            }
        }
        Ok(())
    }

    fn parse_int<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
        value.parse().map_err(|_| ConfigError::InvalidInt {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    /// Parse a boolean value.
    fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
        match value.to_lowercase().as_str() {
            "true" | "1" | "yes" | "y" | "on" => Ok(true),
            "false" | "0" | "no" | "n" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidBool {
                key: key.to_string(),
                value: value.to_string(),
            }),
        }
    }

    /// Resolve relative paths against a base directory.
    pub fn resolve_paths(&mut self, base: &Path) {
        if self.work_dir.is_relative() {
            self.work_dir = base.join(&self.work_dir);
        }
    }
}
