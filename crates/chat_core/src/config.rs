use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::paths::{config_json_path, load_config_json, load_config_toml};

/// Context budget used when nothing (or garbage) is configured.
pub const DEFAULT_MAX_CONTEXT_TOKENS: u32 = 8000;
/// Number of trailing history messages that survive any truncation.
pub const DEFAULT_MIN_KEEP_RECENT: usize = 4;
pub const DEFAULT_API_BASE: &str = "http://localhost:8000";
pub const DEFAULT_ENDPOINT_PATH: &str = "/api/chat";

const CONFIG_FILE_PATH: &str = "config.toml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_endpoint_path")]
    pub endpoint_path: String,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: u32,
    #[serde(default = "default_min_keep_recent")]
    pub min_keep_recent: usize,
    #[serde(default)]
    pub persona_mode: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_endpoint_path() -> String {
    DEFAULT_ENDPOINT_PATH.to_string()
}

fn default_max_context_tokens() -> u32 {
    DEFAULT_MAX_CONTEXT_TOKENS
}

fn default_min_keep_recent() -> usize {
    DEFAULT_MIN_KEEP_RECENT
}

/// Parse the max-context-tokens option, falling back to the default when the
/// value is missing, unparseable or zero.
pub fn parse_max_context_tokens(value: Option<&str>) -> u32 {
    value
        .and_then(|raw| raw.trim().parse::<u32>().ok())
        .filter(|tokens| *tokens > 0)
        .unwrap_or(DEFAULT_MAX_CONTEXT_TOKENS)
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            endpoint_path: default_endpoint_path(),
            api_token: None,
            max_context_tokens: DEFAULT_MAX_CONTEXT_TOKENS,
            min_keep_recent: DEFAULT_MIN_KEEP_RECENT,
            persona_mode: None,
            system_prompt: None,
        }
    }
}

impl Config {
    /// Load configuration: `~/.chat_session/config.json`, else `config.toml`
    /// in the working directory, then environment overrides.
    pub fn new() -> Self {
        let file_config = Self::load_file(&config_json_path(), Path::new(CONFIG_FILE_PATH));
        Self::from_sources(file_config, |key| std::env::var(key).ok())
    }

    fn load_file(json_path: &Path, toml_path: &Path) -> Option<Config> {
        if json_path.exists() {
            match load_config_json::<Config>(json_path) {
                Ok(config) => return Some(config),
                Err(e) => log::warn!("Ignoring config file: {}", e),
            }
        }

        if toml_path.exists() {
            match load_config_toml::<Config>(toml_path) {
                Ok(config) => return Some(config),
                Err(e) => log::warn!("Ignoring config file: {}", e),
            }
        }

        None
    }

    /// Merge a file-loaded config with environment values looked up by `env`.
    pub fn from_sources<F>(file_config: Option<Config>, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = file_config.unwrap_or_default();

        if let Some(api_base) = env("CHAT_API_BASE").and_then(non_empty) {
            config.api_base = api_base;
        }
        if let Some(token) = env("CHAT_API_TOKEN").and_then(non_empty) {
            config.api_token = Some(token);
        }
        if let Some(raw) = env("CHAT_MAX_CONTEXT_TOKENS") {
            config.max_context_tokens = parse_max_context_tokens(Some(&raw));
        }
        if let Some(persona_mode) = env("CHAT_PERSONA_MODE").and_then(non_empty) {
            config.persona_mode = Some(persona_mode);
        }
        if config.max_context_tokens == 0 {
            config.max_context_tokens = DEFAULT_MAX_CONTEXT_TOKENS;
        }

        config
    }

    /// Full URL of the chat endpoint.
    pub fn endpoint_url(&self) -> String {
        format!(
            "{}/{}",
            self.api_base.trim_end_matches('/'),
            self.endpoint_path.trim_start_matches('/')
        )
    }
}
