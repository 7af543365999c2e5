//! History truncation for budget enforcement.
//!
//! Drops the oldest non-system messages until the estimated total fits the
//! budget. The trailing `min_keep_recent` messages are never dropped, so the
//! result may still exceed the budget when those alone are too large.

use serde::{Deserialize, Serialize};

use crate::budget::counter::{HeuristicTokenCounter, TokenCounter};
use crate::message::{Role, WireMessage};

/// Outcome of a truncation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetReport {
    /// Estimated tokens of the input sequence
    pub tokens_before: u32,
    /// Estimated tokens of the returned sequence
    pub tokens_after: u32,
    /// Budget the sequence was fitted to
    pub budget_limit: u32,
    /// Number of messages dropped from the front
    pub messages_removed: usize,
}

impl BudgetReport {
    pub fn truncation_occurred(&self) -> bool {
        self.messages_removed > 0
    }

    pub fn within_budget(&self) -> bool {
        self.tokens_after <= self.budget_limit
    }
}

/// Fit `messages` into `max_tokens` using the default heuristic counter.
pub fn fit_to_budget(
    messages: &[WireMessage],
    max_tokens: u32,
    min_keep_recent: usize,
) -> Vec<WireMessage> {
    fit_to_budget_with(
        &HeuristicTokenCounter::default(),
        messages,
        max_tokens,
        min_keep_recent,
    )
}

/// Fit `messages` into `max_tokens` with an explicit counter.
pub fn fit_to_budget_with(
    counter: &dyn TokenCounter,
    messages: &[WireMessage],
    max_tokens: u32,
    min_keep_recent: usize,
) -> Vec<WireMessage> {
    fit_to_budget_report(counter, messages, max_tokens, min_keep_recent).0
}

/// Fit `messages` into `max_tokens`, also reporting what was removed.
pub fn fit_to_budget_report(
    counter: &dyn TokenCounter,
    messages: &[WireMessage],
    max_tokens: u32,
    min_keep_recent: usize,
) -> (Vec<WireMessage>, BudgetReport) {
    let estimates: Vec<u32> = messages.iter().map(|m| counter.count_message(m)).collect();
    let tokens_before = estimates.iter().fold(0u32, |acc, t| acc.saturating_add(*t));

    if tokens_before <= max_tokens {
        let report = BudgetReport {
            tokens_before,
            tokens_after: tokens_before,
            budget_limit: max_tokens,
            messages_removed: 0,
        };
        return (messages.to_vec(), report);
    }

    // Messages at or after this index belong to the protected tail.
    let protected_from = messages.len().saturating_sub(min_keep_recent);
    let mut keep = vec![true; messages.len()];
    let mut total = tokens_before;
    let mut removed = 0usize;

    for (index, message) in messages.iter().enumerate().take(protected_from) {
        if total <= max_tokens {
            break;
        }
        if message.role == Role::System {
            continue;
        }
        keep[index] = false;
        total = total.saturating_sub(estimates[index]);
        removed += 1;
    }

    if total > max_tokens {
        tracing::warn!(
            "History still exceeds budget after truncation ({tokens} > {budget} tokens), keeping {kept} messages",
            tokens = total,
            budget = max_tokens,
            kept = messages.len() - removed
        );
    }

    let fitted = messages
        .iter()
        .zip(keep)
        .filter_map(|(message, kept)| kept.then(|| message.clone()))
        .collect();

    let report = BudgetReport {
        tokens_before,
        tokens_after: total,
        budget_limit: max_tokens,
        messages_removed: removed,
    };

    (fitted, report)
}
