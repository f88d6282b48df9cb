//! The fragmenter strategy interface.
//!
//! A [`Fragmenter`] converts a run of evicted messages into an ordered list
//! of [`Fragment`]s. Concatenating the fragments' messages must reproduce the
//! run exactly: no loss, no duplication, no reordering. Fragmenters hold no
//! state across calls; any randomness comes from the RNG the caller passes
//! in, so a seeded RNG makes splits reproducible.

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{PagingError, Result};
use crate::{Message, MessageRole, char_prefix};

/// Maximum characters of message text shown in a preview.
pub const PREVIEW_CHARS: usize = 60;

/// Derived description of a fragment.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FragmentMetadata {
    pub preview: String,
    pub count: usize,
    pub first_role: Option<MessageRole>,
    pub last_role: Option<MessageRole>,
}

/// A contiguous slice of an evicted run, on its way to becoming a page.
///
/// Metadata is computed from the messages at construction and cannot be set
/// independently.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    messages: Vec<Message>,
    metadata: FragmentMetadata,
}

impl Fragment {
    pub fn new(messages: Vec<Message>) -> Self {
        let metadata = FragmentMetadata {
            preview: generate_preview(&messages),
            count: messages.len(),
            first_role: messages.first().map(|m| m.role),
            last_role: messages.last().map(|m| m.role),
        };
        Self { messages, metadata }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn metadata(&self) -> &FragmentMetadata {
        &self.metadata
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn into_parts(self) -> (Vec<Message>, FragmentMetadata) {
        (self.messages, self.metadata)
    }
}

/// `"<role>: <first 60 chars of the first message>"`, with `...` appended
/// when the text was cut.
pub fn generate_preview(messages: &[Message]) -> String {
    let Some(first) = messages.first() else {
        return "empty".to_string();
    };
    let text = first.text();
    let (head, truncated) = char_prefix(&text, PREVIEW_CHARS);
    let ellipsis = if truncated { "..." } else { "" };
    format!("{}: {head}{ellipsis}", first.role)
}

// ── Config ─────────────────────────────────────────────────────────

/// Tuning knobs shared by fragmenter strategies.
///
/// Strategies read the fields they care about and ignore the rest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FragmenterConfig {
    /// Base probability of a split after any message (0.0 - 1.0).
    pub sample_rate: f64,
    /// How aggressively age raises the split probability.
    pub age_weight_exponent: f64,
    /// Messages a fragment must hold before a random split may end it.
    pub min_fragment_size: usize,
    /// Fragment length that forces a split.
    pub max_fragment_size: usize,
}

impl Default for FragmenterConfig {
    fn default() -> Self {
        Self {
            sample_rate: 0.2,
            age_weight_exponent: 1.5,
            min_fragment_size: 1,
            max_fragment_size: 20,
        }
    }
}

impl FragmenterConfig {
    pub fn with_sample_rate(mut self, rate: f64) -> Self {
        self.sample_rate = rate;
        self
    }

    pub fn with_age_weight_exponent(mut self, exponent: f64) -> Self {
        self.age_weight_exponent = exponent;
        self
    }

    pub fn with_min_fragment_size(mut self, n: usize) -> Self {
        self.min_fragment_size = n;
        self
    }

    pub fn with_max_fragment_size(mut self, n: usize) -> Self {
        self.max_fragment_size = n;
        self
    }

    /// Reject values no strategy can work with.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.sample_rate) {
            return Err(PagingError::Config(format!(
                "sample_rate must be within 0.0..=1.0, got {}",
                self.sample_rate
            )));
        }
        if !self.age_weight_exponent.is_finite() || self.age_weight_exponent < 0.0 {
            return Err(PagingError::Config(format!(
                "age_weight_exponent must be finite and non-negative, got {}",
                self.age_weight_exponent
            )));
        }
        if self.max_fragment_size == 0 {
            return Err(PagingError::Config(
                "max_fragment_size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

// ── Fragmenter trait ───────────────────────────────────────────────

/// A strategy for splitting an evicted run into fragments.
///
/// # Contract
///
/// - Empty input returns an empty list.
/// - Output fragments are non-empty, contiguous, and in order; their
///   concatenation equals the input.
/// - The result depends only on the inputs and `rng`.
pub trait Fragmenter: Send + Sync {
    fn fragment(
        &self,
        messages: &[Message],
        config: &FragmenterConfig,
        rng: &mut dyn RngCore,
    ) -> Vec<Fragment>;

    /// Short name for logs.
    fn name(&self) -> &str;
}

/// Deterministic strategy: cut every `max_fragment_size` messages.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedSizeFragmenter;

impl Fragmenter for FixedSizeFragmenter {
    fn fragment(
        &self,
        messages: &[Message],
        config: &FragmenterConfig,
        _rng: &mut dyn RngCore,
    ) -> Vec<Fragment> {
        messages
            .chunks(config.max_fragment_size.max(1))
            .map(|chunk| Fragment::new(chunk.to_vec()))
            .collect()
    }

    fn name(&self) -> &str {
        "fixed_size"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ContentBlock;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn metadata_is_derived_from_messages() {
        let frag = Fragment::new(vec![
            Message::user("question"),
            Message::assistant("answer"),
            Message::tool("output"),
        ]);
        let meta = frag.metadata();
        assert_eq!(meta.count, 3);
        assert_eq!(meta.first_role, Some(MessageRole::User));
        assert_eq!(meta.last_role, Some(MessageRole::Tool));
        assert_eq!(meta.preview, "user: question");
    }

    #[test]
    fn preview_truncates_at_sixty_chars() {
        let exactly = Message::user("a".repeat(60));
        assert_eq!(
            generate_preview(&[exactly]),
            format!("user: {}", "a".repeat(60))
        );

        let longer = Message::user("b".repeat(61));
        assert_eq!(
            generate_preview(&[longer]),
            format!("user: {}...", "b".repeat(60))
        );
    }

    #[test]
    fn preview_uses_text_blocks() {
        let msg = Message::blocks(MessageRole::Assistant, vec![ContentBlock::text("from a block")]);
        assert_eq!(generate_preview(&[msg]), "assistant: from a block");
        assert_eq!(generate_preview(&[]), "empty");
    }

    #[test]
    fn metadata_serializes_camel_case() {
        let frag = Fragment::new(vec![Message::user("hi")]);
        let json = serde_json::to_value(frag.metadata()).unwrap();
        assert_eq!(json["firstRole"], "user");
        assert_eq!(json["lastRole"], "user");
        assert_eq!(json["count"], 1);
    }

    #[test]
    fn fixed_size_chunks_in_order() {
        let messages: Vec<Message> = (0..7).map(|i| Message::user(format!("m{i}"))).collect();
        let config = FragmenterConfig::default().with_max_fragment_size(3);
        let mut rng = StdRng::seed_from_u64(0);
        let frags = FixedSizeFragmenter.fragment(&messages, &config, &mut rng);
        let sizes: Vec<usize> = frags.iter().map(Fragment::len).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        assert!(FixedSizeFragmenter.fragment(&[], &config, &mut rng).is_empty());
    }

    #[test]
    fn validate_rejects_bad_values() {
        assert!(FragmenterConfig::default().validate().is_ok());
        assert!(FragmenterConfig::default().with_sample_rate(1.5).validate().is_err());
        assert!(
            FragmenterConfig::default()
                .with_age_weight_exponent(f64::NAN)
                .validate()
                .is_err()
        );
        assert!(
            FragmenterConfig::default()
                .with_max_fragment_size(0)
                .validate()
                .is_err()
        );
    }
}
