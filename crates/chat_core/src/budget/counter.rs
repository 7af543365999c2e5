//! Token counting for budget management.
//!
//! Provides heuristic token estimation (chars/4 + 10% margin + per-message
//! overhead). The estimate deliberately errs on the high side.

use std::sync::Arc;

use crate::message::WireMessage;

/// Trait for token counting implementations.
///
/// Implementations must be deterministic: identical input always yields the
/// identical count.
pub trait TokenCounter: Send + Sync {
    /// Count tokens in a single message.
    fn count_message(&self, message: &WireMessage) -> u32;

    /// Count tokens in multiple messages.
    fn count_messages(&self, messages: &[WireMessage]) -> u32 {
        messages
            .iter()
            .fold(0u32, |acc, m| acc.saturating_add(self.count_message(m)))
    }

    /// Count tokens in a plain text string.
    fn count_text(&self, text: &str) -> u32;
}

/// Heuristic token counter using character-based estimation.
///
/// Uses the approximation: tokens ≈ characters / 4, with a 10% safety margin
/// plus a fixed overhead per message for the role and framing.
#[derive(Debug, Clone)]
pub struct HeuristicTokenCounter {
    /// Characters per token ratio (default: 4)
    chars_per_token: f64,
    /// Safety margin multiplier (default: 1.1 = 10% extra)
    safety_margin: f64,
    /// Per-message overhead in tokens
    metadata_overhead: u32,
}

impl HeuristicTokenCounter {
    /// Create a new heuristic counter with custom parameters.
    pub fn new(chars_per_token: f64, safety_margin: f64, metadata_overhead: u32) -> Self {
        Self {
            chars_per_token: chars_per_token.max(f64::EPSILON),
            safety_margin: safety_margin.max(1.0),
            metadata_overhead,
        }
    }

    /// Create with default parameters (chars/4 + 10% margin + 4 tokens overhead).
    pub fn with_defaults() -> Self {
        Self::new(4.0, 1.1, 4)
    }
}

impl Default for HeuristicTokenCounter {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl TokenCounter for HeuristicTokenCounter {
    fn count_message(&self, message: &WireMessage) -> u32 {
        self.count_text(&message.content)
            .saturating_add(self.metadata_overhead)
    }

    fn count_text(&self, text: &str) -> u32 {
        if text.is_empty() {
            return 0;
        }

        let char_count = text.chars().count() as f64;
        let base_tokens = char_count / self.chars_per_token;
        let adjusted_tokens = base_tokens * self.safety_margin;

        adjusted_tokens.ceil() as u32
    }
}

/// Arc-wrapped token counter for easy sharing.
pub type SharedTokenCounter = Arc<dyn TokenCounter>;
