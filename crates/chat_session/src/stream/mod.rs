//! Stream aggregation
//!
//! Turns the decoded [`chat_stream::StreamEvent`]s of one response into the
//! assistant message that gets committed.

pub mod aggregator;

pub use aggregator::{detect_mode_activation, LiveTurn, ResponseAggregator, TurnState};
