use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use strum::{AsRefStr, Display, EnumString};

use crate::prompts::DEFAULT_SYSTEM_INSTRUCTION;

/// Environment variable consulted when `api_key_env` is unset in the environment
const FALLBACK_API_KEY_ENV: &str = "API_KEY";

/// Whether earlier turns of a conversation are sent along with a new prompt
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum HistoryMode {
    /// Send every prior user/assistant turn
    #[default]
    Full,
    /// Each prompt starts a fresh provider-side context
    None,
}

impl HistoryMode {
    pub fn toggled(self) -> Self {
        match self {
            HistoryMode::Full => HistoryMode::None,
            HistoryMode::None => HistoryMode::Full,
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Model identifier passed to the provider
    pub model: String,

    /// Base URL of the generative language API
    pub base_url: String,

    /// API key; takes precedence over the environment
    pub api_key: Option<String>,

    /// Environment variable holding the API key
    pub api_key_env: String,

    pub system_instruction: String,

    pub history_mode: HistoryMode,

    /// Initial state of the search grounding toggle
    pub search_grounding: bool,

    pub request_timeout_secs: u64,

    /// Where the session record and log file live
    pub data_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            model: "gemini-3-flash-preview".to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            api_key: None,
            api_key_env: "GEMINI_API_KEY".to_string(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            history_mode: HistoryMode::Full,
            search_grounding: false,
            request_timeout_secs: 120,
            data_dir: default_home(),
        }
    }
}

impl Config {
    /// Default location of the config file
    pub fn default_path() -> PathBuf {
        default_home().join("config.toml")
    }

    /// Load configuration from `path`, falling back to defaults if it does not exist
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::default_path);

        let config = if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?
        } else {
            Config::default()
        };

        fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("Failed to create {}", config.data_dir.display()))?;

        Ok(config)
    }

    /// Save configuration to `path`
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    /// Get API key from config or environment
    pub fn api_key(&self) -> Option<String> {
        non_blank(self.api_key.clone())
            .or_else(|| non_blank(std::env::var(&self.api_key_env).ok()))
            .or_else(|| non_blank(std::env::var(FALLBACK_API_KEY_ENV).ok()))
    }

    pub fn sessions_path(&self) -> PathBuf {
        self.data_dir.join(crate::storage::STORAGE_KEY)
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join("chatpane.log")
    }
}

/// An exported but empty key counts as unset
fn non_blank(key: Option<String>) -> Option<String> {
    key.filter(|key| !key.trim().is_empty())
}

fn default_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".chatpane")
}
