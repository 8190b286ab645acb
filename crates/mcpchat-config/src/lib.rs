//! Layered TOML configuration for mcpchat.
//!
//! Reads configuration from multiple sources with precedence:
//! CLI flags > env vars > config file > defaults

use mcpchat_types::{ConfigError, LlmProvider, NewServerRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// The default listen address.
pub const DEFAULT_BIND: &str = "127.0.0.1:8000";

/// The default max tokens for one model response.
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Resolved configuration for a server process.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind: SocketAddr,
    /// Startup credential per provider; absent when not configured.
    pub provider_keys: HashMap<LlmProvider, String>,
    pub max_tokens: u32,
    pub max_concurrent_connects: Option<usize>,
    pub system_prompt: Option<String>,
    /// Records to register at startup.
    pub servers: Vec<NewServerRecord>,
    pub config_dir: PathBuf,
}

/// Settings that can be read from a TOML config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsFile {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub providers: ProviderSettings,
    #[serde(default)]
    pub chat: ChatSettings,
    #[serde(default)]
    pub servers: Vec<NewServerRecord>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerSettings {
    pub bind: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub openai_api_key: Option<String>,
    pub deepseek_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
}

impl ProviderSettings {
    fn key(&self, provider: LlmProvider) -> Option<&String> {
        match provider {
            LlmProvider::Openai => self.openai_api_key.as_ref(),
            LlmProvider::Deepseek => self.deepseek_api_key.as_ref(),
            LlmProvider::Anthropic => self.anthropic_api_key.as_ref(),
            LlmProvider::Gemini => self.gemini_api_key.as_ref(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatSettings {
    pub max_tokens: Option<u32>,
    pub max_concurrent_connects: Option<usize>,
    pub system_prompt: Option<String>,
}

/// CLI overrides that take highest precedence.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    /// Explicit config file; unlike the default file it must exist and parse.
    pub config_path: Option<PathBuf>,
    pub bind: Option<String>,
    pub max_tokens: Option<u32>,
}

/// Environment variable holding the startup credential for a provider.
pub fn key_env_var(provider: LlmProvider) -> &'static str {
    match provider {
        LlmProvider::Openai => "MCP_OPENAI_API_KEY",
        LlmProvider::Deepseek => "MCP_DEEPSEEK_API_KEY",
        LlmProvider::Anthropic => "MCP_ANTHROPIC_API_KEY",
        LlmProvider::Gemini => "MCP_GEMINI_API_KEY",
    }
}

const PROVIDERS: [LlmProvider; 4] = [
    LlmProvider::Openai,
    LlmProvider::Deepseek,
    LlmProvider::Anthropic,
    LlmProvider::Gemini,
];

impl AppConfig {
    /// Load configuration from all sources, applying precedence rules.
    ///
    /// Precedence (highest to lowest):
    /// 1. CLI flags
    /// 2. Environment variables
    /// 3. Config file (`--config`, or ~/.mcpchat/config.toml)
    /// 4. Defaults
    pub fn load(overrides: CliOverrides) -> Result<Self, ConfigError> {
        let config_dir = config_dir();
        let settings = match &overrides.config_path {
            Some(path) => read_settings_file(path)?,
            None => load_settings_file(&config_dir.join("config.toml")),
        };
        Self::resolve(overrides, settings, |name| std::env::var(name).ok(), config_dir)
    }

    /// Merge the sources. `env` looks up one environment variable.
    pub fn resolve(
        overrides: CliOverrides,
        settings: SettingsFile,
        env: impl Fn(&str) -> Option<String>,
        config_dir: PathBuf,
    ) -> Result<Self, ConfigError> {
        let bind_raw = overrides
            .bind
            .or_else(|| env("MCPCHAT_BIND"))
            .or(settings.server.bind)
            .unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind = bind_raw
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue {
                key: "bind".into(),
                message: format!("'{bind_raw}': {e}"),
            })?;

        let mut provider_keys = HashMap::new();
        for provider in PROVIDERS {
            let key = env(key_env_var(provider))
                .or_else(|| settings.providers.key(provider).cloned())
                .filter(|k| !k.trim().is_empty());
            if let Some(key) = key {
                provider_keys.insert(provider, key);
            }
        }

        let max_tokens = overrides
            .max_tokens
            .or(settings.chat.max_tokens)
            .unwrap_or(DEFAULT_MAX_TOKENS);
        if max_tokens == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_tokens".into(),
                message: "must be greater than zero".into(),
            });
        }

        Ok(AppConfig {
            bind,
            provider_keys,
            max_tokens,
            max_concurrent_connects: settings.chat.max_concurrent_connects.filter(|n| *n > 0),
            system_prompt: settings.chat.system_prompt,
            servers: settings.servers,
            config_dir,
        })
    }
}

/// Get the mcpchat config directory path (~/.mcpchat/).
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("MCPCHAT_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    dirs_next::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mcpchat")
}

/// Load the default settings file, returning defaults on any error.
fn load_settings_file(path: &Path) -> SettingsFile {
    match std::fs::read_to_string(path) {
        Ok(content) => toml::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!("Failed to parse {}: {}", path.display(), e);
            SettingsFile::default()
        }),
        Err(_) => SettingsFile::default(),
    }
}

/// Read an explicitly requested settings file; any failure is an error.
pub fn read_settings_file(path: &Path) -> Result<SettingsFile, ConfigError> {
    let parse_error = |message: String| ConfigError::Parse {
        path: path.display().to_string(),
        message,
    };
    let content = std::fs::read_to_string(path).map_err(|e| parse_error(e.to_string()))?;
    toml::from_str(&content).map_err(|e| parse_error(e.to_string()))
}
