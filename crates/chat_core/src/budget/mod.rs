//! Token budget management for outgoing chat history.
//!
//! # Key Components
//!
//! - [`counter`]: Token counting via heuristic estimation
//! - [`preparation`]: Truncation of history to a token budget

pub mod counter;
pub mod preparation;

pub use counter::{HeuristicTokenCounter, SharedTokenCounter, TokenCounter};
pub use preparation::{fit_to_budget, fit_to_budget_report, fit_to_budget_with, BudgetReport};
