//! Per-turn response aggregation

use chat_core::Message;
use chat_state::TurnPhase;
use chat_stream::{CompletionResponse, StreamEvent, Suggestion};
use once_cell::sync::Lazy;
use regex::Regex;

static MODE_ACTIVATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bactivated\s+([\w-]+)\s+mode\b").expect("Invalid mode activation regex")
});

/// Find a mode-activation phrase ("Activated mentor mode") in a status text.
pub fn detect_mode_activation(text: &str) -> Option<String> {
    MODE_ACTIVATION
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_lowercase())
}

/// What has been received so far for the in-flight response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnState {
    pub accumulated_content: String,
    pub status: Option<String>,
    pub detected_mode: Option<String>,
    pub captured_reasoning: Option<String>,
    pub suggestions: Vec<Suggestion>,
}

/// Renderable view of a turn, published while it runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveTurn {
    pub phase: TurnPhase,
    pub content: String,
    pub status: Option<String>,
    pub reasoning: Option<String>,
    pub detected_mode: Option<String>,
    pub suggestions: Vec<Suggestion>,
    /// User-visible error text of a failed turn.
    pub error: Option<String>,
}

/// Folds stream events into a [`TurnState`] and produces the assistant
/// message exactly once.
#[derive(Debug, Default)]
pub struct ResponseAggregator {
    state: TurnState,
    complete: bool,
    committed: bool,
}

impl ResponseAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Aggregator for a non-streaming reply; already complete.
    pub fn from_completion(response: &CompletionResponse) -> Self {
        Self {
            state: TurnState {
                accumulated_content: response.content.clone(),
                status: None,
                detected_mode: response.persona_mode.clone(),
                captured_reasoning: response.reasoning.clone(),
                suggestions: response.suggestions.clone(),
            },
            complete: true,
            committed: false,
        }
    }

    /// Apply one event. Events after completion are ignored.
    pub fn apply(&mut self, event: StreamEvent) {
        if self.complete {
            log::debug!("Ignoring {:?} after end of response", event);
            return;
        }

        match event {
            StreamEvent::Status(status) => {
                if let Some(mode) = detect_mode_activation(&status) {
                    log::debug!("Detected mode activation: {}", mode);
                    self.state.detected_mode = Some(mode);
                }
                self.state.status = Some(status);
            }
            StreamEvent::Reasoning(reasoning) => self.state.captured_reasoning = Some(reasoning),
            StreamEvent::Suggestions(suggestions) => self.state.suggestions = suggestions,
            StreamEvent::ContentDelta(delta) => self.state.accumulated_content.push_str(&delta),
            StreamEvent::Done => self.complete = true,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn state(&self) -> &TurnState {
        &self.state
    }

    /// Build the assistant message, completing the response if the stream
    /// ended without `done`.
    ///
    /// Returns `None` once the message has already been produced.
    pub fn commit(&mut self) -> Option<Message> {
        self.complete = true;
        if self.committed {
            return None;
        }
        self.committed = true;

        let reasoning = self
            .state
            .captured_reasoning
            .clone()
            .filter(|r| !r.is_empty());

        Some(
            Message::assistant(self.state.accumulated_content.clone())
                .with_persona_mode(self.state.detected_mode.clone())
                .with_reasoning(reasoning),
        )
    }

    pub fn snapshot(&self) -> LiveTurn {
        let phase = if self.committed {
            TurnPhase::Committed
        } else {
            TurnPhase::Streaming
        };

        LiveTurn {
            phase,
            content: self.state.accumulated_content.clone(),
            status: self.state.status.clone(),
            reasoning: self.state.captured_reasoning.clone(),
            detected_mode: self.state.detected_mode.clone(),
            suggestions: self.state.suggestions.clone(),
            error: None,
        }
    }
}
