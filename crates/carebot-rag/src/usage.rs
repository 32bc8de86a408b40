//! Token and cost accounting for hosted model calls.

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign};

/// Token counts and USD cost of one or more completion calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            total_cost: 0.0,
        }
    }

    /// Fill in `total_cost` from the price table for `model`.
    pub fn priced(mut self, model: &str) -> Self {
        self.total_cost = model_cost(model, self.prompt_tokens, self.completion_tokens);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.total_tokens == 0 && self.total_cost == 0.0
    }
}

impl AddAssign<&TokenUsage> for TokenUsage {
    fn add_assign(&mut self, rhs: &TokenUsage) {
        self.prompt_tokens += rhs.prompt_tokens;
        self.completion_tokens += rhs.completion_tokens;
        self.total_tokens += rhs.total_tokens;
        self.total_cost += rhs.total_cost;
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: TokenUsage) {
        *self += &rhs;
    }
}

impl Add for TokenUsage {
    type Output = TokenUsage;

    fn add(mut self, rhs: TokenUsage) -> TokenUsage {
        self += &rhs;
        self
    }
}

/// USD per 1K tokens: (prompt, completion). Longest prefix first.
const PRICE_TABLE: &[(&str, f64, f64)] = &[
    ("gpt-4-turbo", 0.01, 0.03),
    ("gpt-4-1106", 0.01, 0.03),
    ("gpt-4-0125", 0.01, 0.03),
    ("gpt-4-32k", 0.06, 0.12),
    ("gpt-4", 0.03, 0.06),
    ("gpt-3.5-turbo-instruct", 0.0015, 0.002),
    ("gpt-3.5-turbo", 0.0005, 0.0015),
];

/// Cost in USD of a call to `model`. Models outside the table cost 0.
pub fn model_cost(model: &str, prompt_tokens: u64, completion_tokens: u64) -> f64 {
    let model = model.to_lowercase();
    PRICE_TABLE
        .iter()
        .find(|(prefix, _, _)| model.starts_with(prefix))
        .map(|(_, prompt_price, completion_price)| {
            (prompt_tokens as f64 / 1000.0) * prompt_price
                + (completion_tokens as f64 / 1000.0) * completion_price
        })
        .unwrap_or(0.0)
}

/// Running usage totals for a chat session. Only ever grows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageTracker {
    totals: TokenUsage,
    calls: u64,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, usage: &TokenUsage) {
        self.totals += usage;
        self.calls += 1;
    }

    pub fn totals(&self) -> TokenUsage {
        self.totals
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }

    /// Cost rounded to cents.
    pub fn display_cost(&self) -> f64 {
        (self.totals.total_cost * 100.0).round() / 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_cost_uses_longest_prefix() {
        let turbo = model_cost("gpt-4-turbo-preview", 1000, 1000);
        assert!((turbo - 0.04).abs() < 1e-9);

        let gpt4 = model_cost("gpt-4", 1000, 1000);
        assert!((gpt4 - 0.09).abs() < 1e-9);

        assert_eq!(model_cost("claude-3-opus-20240229", 1000, 1000), 0.0);
    }

    #[test]
    fn test_tracker_is_fieldwise_additive() {
        let mut tracker = UsageTracker::new();
        let a = TokenUsage::new(100, 20).priced("gpt-4-turbo-preview");
        let b = TokenUsage::new(50, 5).priced("gpt-4-turbo-preview");

        tracker.update(&a);
        let after_first = tracker.totals();
        tracker.update(&b);
        let after_second = tracker.totals();

        assert_eq!(after_second.prompt_tokens, 150);
        assert_eq!(after_second.completion_tokens, 25);
        assert_eq!(after_second.total_tokens, 175);
        assert!(after_second.total_cost >= after_first.total_cost);
        assert!((after_second.total_cost - (a.total_cost + b.total_cost)).abs() < 1e-12);
        assert_eq!(tracker.calls(), 2);
    }

    #[test]
    fn test_display_cost_rounds_to_cents() {
        let mut tracker = UsageTracker::new();
        tracker.update(&TokenUsage {
            total_cost: 0.0349,
            ..Default::default()
        });
        assert_eq!(tracker.display_cost(), 0.03);
        tracker.update(&TokenUsage {
            total_cost: 0.0002,
            ..Default::default()
        });
        assert_eq!(tracker.display_cost(), 0.04);
    }
}
