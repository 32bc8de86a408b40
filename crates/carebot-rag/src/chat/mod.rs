//! Per-session chat state

pub mod history;

pub use history::{ChatHistory, ChatTurn, ExchangeHistory, TurnRole};
