//! Token estimation for the live context.
//!
//! Counts characters of extracted message text and divides by a
//! chars-per-token ratio. Cheap, tokenizer-free, and good enough to decide
//! when a buffer has outgrown its budget.

use crate::Message;

/// Default characters per token (conservative estimate for English text).
/// Most tokenizers average 3-4 chars per token; we use 3.5 as a middle ground.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 3.5;

/// Estimated tokens for a single message.
pub fn estimate_message_tokens(message: &Message, chars_per_token: f64) -> usize {
    (message.text().len() as f64 / chars_per_token) as usize
}

/// Estimate total tokens for a slice of messages.
pub fn estimate_tokens(messages: &[Message], chars_per_token: f64) -> usize {
    let total_chars: usize = messages.iter().map(|m| m.text().len()).sum();
    (total_chars as f64 / chars_per_token) as usize
}

/// Tracks a token budget for a live buffer.
///
/// The buffer itself only needs a target to clean up to; `ContextBudget`
/// turns a context window size into that target and reports usage in a
/// log-friendly form.
#[derive(Debug, Clone)]
pub struct ContextBudget {
    /// Maximum context window in tokens.
    max_tokens: usize,
    /// Fraction of `max_tokens` the buffer may occupy before cleanup.
    cleanup_fraction: f64,
    /// Characters per token ratio.
    chars_per_token: f64,
}

impl ContextBudget {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            max_tokens,
            cleanup_fraction: 0.80,
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
        }
    }

    /// Fraction of the window that triggers cleanup. Clamped to `0.0..=1.0`.
    pub fn with_cleanup_fraction(mut self, fraction: f64) -> Self {
        self.cleanup_fraction = fraction.clamp(0.0, 1.0);
        self
    }

    pub fn with_chars_per_token(mut self, cpt: f64) -> Self {
        self.chars_per_token = cpt;
        self
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Token count the buffer should be cleaned up to.
    pub fn target_tokens(&self) -> usize {
        (self.max_tokens as f64 * self.cleanup_fraction) as usize
    }

    /// Estimate usage of `messages` against this budget.
    pub fn estimate_usage(&self, messages: &[Message]) -> ContextUsage {
        let estimated_tokens = estimate_tokens(messages, self.chars_per_token);
        let usage_pct = if self.max_tokens > 0 {
            estimated_tokens as f64 / self.max_tokens as f64
        } else {
            1.0
        };
        ContextUsage {
            estimated_tokens,
            max_tokens: self.max_tokens,
            usage_pct,
        }
    }

    /// Whether `messages` exceed the cleanup target.
    pub fn needs_cleanup(&self, messages: &[Message]) -> bool {
        estimate_tokens(messages, self.chars_per_token) > self.target_tokens()
    }
}

/// Snapshot of context usage at a point in time.
#[derive(Debug)]
pub struct ContextUsage {
    /// Estimated tokens consumed.
    pub estimated_tokens: usize,
    /// Maximum context window.
    pub max_tokens: usize,
    /// Usage as a fraction (0.0 to 1.0+).
    pub usage_pct: f64,
}

impl ContextUsage {
    /// Format as a short log-friendly string.
    pub fn to_log_string(&self) -> String {
        format!(
            "context: ~{} tokens ({:.0}% of {})",
            self.estimated_tokens,
            self.usage_pct * 100.0,
            self.max_tokens,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ContentBlock, MessageRole};

    #[test]
    fn usage_accumulates_across_messages() {
        let budget = ContextBudget::new(200_000);
        let messages = vec![
            Message::user("a".repeat(100_000)),
            Message::user("b".repeat(100_000)),
        ];
        let usage = budget.estimate_usage(&messages);
        assert_eq!(usage.estimated_tokens, (200_000.0 / 3.5) as usize);
    }

    #[test]
    fn only_text_blocks_count() {
        let mut extra = serde_json::Map::new();
        extra.insert("data".into(), serde_json::json!("x".repeat(10_000)));
        let msg = Message::blocks(
            MessageRole::User,
            vec![ContentBlock::text("a".repeat(35)), ContentBlock::other("image", extra)],
        );
        assert_eq!(estimate_message_tokens(&msg, 3.5), 10);
    }

    #[test]
    fn target_tokens_uses_cleanup_fraction() {
        let budget = ContextBudget::new(10_000).with_cleanup_fraction(0.5);
        assert_eq!(budget.target_tokens(), 5_000);
        let clamped = ContextBudget::new(10_000).with_cleanup_fraction(3.0);
        assert_eq!(clamped.target_tokens(), 10_000);
    }

    #[test]
    fn needs_cleanup_above_target() {
        let budget = ContextBudget::new(100).with_cleanup_fraction(0.5);
        assert!(!budget.needs_cleanup(&[Message::user("a".repeat(100))]));
        assert!(budget.needs_cleanup(&[Message::user("a".repeat(400))]));
    }

    #[test]
    fn calibrated_ratio_lowers_estimate() {
        let messages = vec![Message::user("a".repeat(40_000))];
        let default = ContextBudget::new(100_000).estimate_usage(&messages);
        let calibrated = ContextBudget::new(100_000)
            .with_chars_per_token(4.0)
            .estimate_usage(&messages);
        assert!(calibrated.estimated_tokens < default.estimated_tokens);
    }

    #[test]
    fn usage_log_string_format() {
        let budget = ContextBudget::new(1000);
        let usage = budget.estimate_usage(&[Message::user("hello world")]);
        let log = usage.to_log_string();
        assert!(log.contains("context:"));
        assert!(log.contains("tokens"));
    }
}
