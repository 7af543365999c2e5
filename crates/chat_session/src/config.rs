//! Session configuration

use std::sync::Arc;

use chat_core::budget::{HeuristicTokenCounter, SharedTokenCounter};
use chat_core::config::{DEFAULT_MAX_CONTEXT_TOKENS, DEFAULT_MIN_KEEP_RECENT};
use chat_core::Config;

/// Settings applied to every turn a controller drives.
#[derive(Clone)]
pub struct SessionConfig {
    /// Estimated token budget for the outbound history.
    pub max_context_tokens: u32,
    /// Trailing messages kept regardless of the budget.
    pub min_keep_recent: usize,
    /// Prepended as a system message when set.
    pub system_prompt: Option<String>,
    /// Persona requested when a submission doesn't name one.
    pub persona_mode: Option<String>,
    /// Ask the backend for an event stream.
    pub stream: bool,
    pub token_counter: SharedTokenCounter,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: DEFAULT_MAX_CONTEXT_TOKENS,
            min_keep_recent: DEFAULT_MIN_KEEP_RECENT,
            system_prompt: None,
            persona_mode: None,
            stream: true,
            token_counter: Arc::new(HeuristicTokenCounter::default()),
        }
    }
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("max_context_tokens", &self.max_context_tokens)
            .field("min_keep_recent", &self.min_keep_recent)
            .field("system_prompt", &self.system_prompt)
            .field("persona_mode", &self.persona_mode)
            .field("stream", &self.stream)
            .finish_non_exhaustive()
    }
}

impl From<&Config> for SessionConfig {
    fn from(config: &Config) -> Self {
        Self {
            max_context_tokens: config.max_context_tokens,
            min_keep_recent: config.min_keep_recent,
            system_prompt: config
                .system_prompt
                .clone()
                .filter(|prompt| !prompt.trim().is_empty()),
            persona_mode: config.persona_mode.clone(),
            ..Self::default()
        }
    }
}

impl SessionConfig {
    pub fn with_max_context_tokens(mut self, max_context_tokens: u32) -> Self {
        self.max_context_tokens = max_context_tokens;
        self
    }

    pub fn with_min_keep_recent(mut self, min_keep_recent: usize) -> Self {
        self.min_keep_recent = min_keep_recent;
        self
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_token_counter(mut self, token_counter: SharedTokenCounter) -> Self {
        self.token_counter = token_counter;
        self
    }
}
