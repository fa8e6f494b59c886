//! Configuration file support

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";

/// Configuration for vigil
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Model id to use
    pub model: Option<String>,
    /// Base URL of the model endpoint
    pub base_url: Option<String>,
    /// API key (environment variable is recommended instead)
    pub api_key: Option<String>,
    /// Bound on retained history messages
    pub max_history_messages: Option<usize>,
    /// Bound on agent-loop turns per conversation
    pub max_turns: Option<u32>,
}

impl Config {
    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("VIGIL_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vigil")
            .join("config.toml")
    }

    /// Load config from file, falling back to defaults on any problem
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Warning: Failed to parse config file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    /// Save config to file
    pub fn save(&self) -> std::io::Result<()> {
        let path = Self::config_path();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }
        let default_config = Config {
            model: Some(DEFAULT_MODEL.to_string()),
            base_url: Some(DEFAULT_BASE_URL.to_string()),
            ..Default::default()
        };
        default_config.save()?;
        Ok(path)
    }

    /// API key from config, then environment
    pub fn get_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
    }

    /// Base URL from config, then environment, then the default
    pub fn get_base_url(&self) -> String {
        self.base_url
            .clone()
            .or_else(|| std::env::var("VIGIL_BASE_URL").ok())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# vigil configuration file
# Place at ~/.config/vigil/config.toml

# Model id
model = "claude-sonnet-4-5-20250929"

# Model endpoint base URL
base_url = "https://api.anthropic.com"

# API key (prefer the ANTHROPIC_API_KEY environment variable)
# api_key = "sk-ant-..."

# History and turn bounds
# max_history_messages = 10
# max_turns = 500
"#
}
