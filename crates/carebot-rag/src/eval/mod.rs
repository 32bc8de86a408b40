//! Evaluation of recorded chain calls.

pub mod feedback;
pub mod recorder;

pub use feedback::{parse_score, FeedbackKind, FeedbackProvider};
pub use recorder::{EvalStore, FeedbackOutcome, LeaderboardRow, Record, Recordable, Recorded, Recorder};

use crate::llm::ApiProvider;

/// App id under which conversational chain calls for `provider` are recorded.
pub fn conversational_app_id(provider: ApiProvider) -> String {
    format!("Conversation-Retrieval-Chain-feedback-{}", provider)
}
