//! Context paging for LLM agents.
//!
//! `cinch-pager` keeps an agent's live conversation under a token budget by
//! paging old messages out to disk instead of dropping them. Evicted messages
//! become [`Page`](paging::Page)s: stable, content-addressed JSON documents
//! registered in a page directory so the agent (or a human) can pull them
//! back later.
//!
//! Two paging engines sit on top of a [`ContextBuffer`](context::ContextBuffer):
//!
//! - [`FragmentationMemory`](paging::FragmentationMemory) splits each evicted
//!   run into several fragment pages using a pluggable
//!   [`Fragmenter`](paging::Fragmenter) strategy, and leaves a compact
//!   cross-reference summary in the live context. The default strategy,
//!   [`RandomSamplingFragmenter`](paging::RandomSamplingFragmenter), shatters
//!   old content into many small fragments and keeps recent content intact.
//!
//! - [`SemanticMemory`](paging::SemanticMemory) embeds every message into an
//!   HNSW [`VectorIndex`](paging::VectorIndex). Under token pressure it pages
//!   out the messages most related to the *current* conversation rather than
//!   simply the oldest ones.
//!
//! # Getting started
//!
//! ```ignore
//! use cinch_pager::prelude::*;
//!
//! let buffer = VirtualContext::new(ContextConfig::new("./pages"))?;
//! let mut memory = FragmentationMemory::new(buffer, FragmentationConfig::default())
//!     .with_fragmenter(RandomSamplingFragmenter::new());
//!
//! memory.add_message(Message::user("Read src/main.rs and summarize it."));
//! // ... many rounds later
//! memory.cleanup(8_000)?;
//! memory.shutdown()?;
//! ```
//!
//! # Where to find things
//!
//! - **The live buffer contract and the reference implementation:** see
//!   [`ContextBuffer`](context::ContextBuffer) and
//!   [`VirtualContext`](context::VirtualContext).
//! - **Writing your own split strategy:** implement
//!   [`Fragmenter`](paging::Fragmenter).
//! - **Plugging in an embedding model:** implement
//!   [`Embedder`](paging::Embedder), wrap a closure with
//!   [`FnEmbedder`](paging::FnEmbedder), or call a hosted model through
//!   [`HttpEmbedder`](paging::HttpEmbedder).
//! - **On-disk layout and page ids:** see [`paging::store`].
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`context`] | [`ContextBuffer`](context::ContextBuffer) trait, token estimation, temporal eviction |
//! | [`paging`] | Pages, fragmenters, fragmentation and semantic engines, vector index, embedders |
//! | [`error`] | [`PagingError`](error::PagingError) |

pub mod context;
pub mod error;
pub mod paging;
pub mod prelude;

use std::borrow::Cow;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use error::PagingError;

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// A typed content block (`{"type": "text", "text": "..."}`, tool use,
/// images, ...).
///
/// Only `type` and `text` are interpreted. Every other field is carried in
/// `extra` so a block survives paging and snapshotting unchanged.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ContentBlock {
    /// A plain `text` block.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            block_type: "text".into(),
            text: Some(text.into()),
            extra: serde_json::Map::new(),
        }
    }

    /// A non-text block of the given type with arbitrary fields.
    pub fn other(
        block_type: impl Into<String>,
        extra: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            block_type: block_type.into(),
            text: None,
            extra,
        }
    }

    pub fn is_text(&self) -> bool {
        self.block_type == "text"
    }
}

/// Message content: a plain string or an ordered list of typed blocks.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// A message in the conversation.
///
/// Immutable once created. The timestamp is fixed at construction; when a
/// serialized message has none, deserialization stamps it with "now".
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    pub content: MessageContent,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(content.into()),
            timestamp: Utc::now(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Tool, content)
    }

    /// A block-structured message.
    pub fn blocks(role: MessageRole, blocks: Vec<ContentBlock>) -> Self {
        Self {
            role,
            content: MessageContent::Blocks(blocks),
            timestamp: Utc::now(),
        }
    }

    /// Replace the creation timestamp (replaying history, tests).
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Text used for previews, token estimates, and embeddings.
    ///
    /// String content is returned verbatim. Block content yields only the
    /// `text` blocks, in order, joined by a single space.
    pub fn text(&self) -> Cow<'_, str> {
        match &self.content {
            MessageContent::Text(s) => Cow::Borrowed(s),
            MessageContent::Blocks(blocks) => Cow::Owned(
                blocks
                    .iter()
                    .filter(|b| b.is_text())
                    .filter_map(|b| b.text.as_deref())
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
        }
    }
}

// ── Text helpers ───────────────────────────────────────────────────

/// First `max_chars` characters of `s`, and whether anything was cut.
///
/// Counts Unicode scalar values, so multi-byte text never splits mid-char.
pub(crate) fn char_prefix(s: &str, max_chars: usize) -> (&str, bool) {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => (s.split_at(byte_idx).0, true),
        None => (s, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors() {
        let sys = Message::system("hello");
        assert_eq!(sys.role, MessageRole::System);
        assert_eq!(sys.text(), "hello");

        let user = Message::user("world");
        assert_eq!(user.role, MessageRole::User);

        let tool = Message::tool("result");
        assert_eq!(tool.role, MessageRole::Tool);
    }

    #[test]
    fn block_text_joins_only_text_blocks() {
        let mut extra = serde_json::Map::new();
        extra.insert("name".into(), serde_json::json!("read_file"));
        let msg = Message::blocks(
            MessageRole::Assistant,
            vec![
                ContentBlock::text("first"),
                ContentBlock::other("tool_use", extra),
                ContentBlock::text("second"),
            ],
        );
        assert_eq!(msg.text(), "first second");
    }

    #[test]
    fn missing_timestamp_defaults_to_now() {
        let before = Utc::now();
        let msg: Message = serde_json::from_str(r#"{"role":"user","content":"hi"}"#).unwrap();
        assert!(msg.timestamp >= before);
        assert!(msg.timestamp <= Utc::now());
    }

    #[test]
    fn blocks_round_trip_unknown_fields() {
        let json = r#"{"role":"assistant","content":[{"type":"tool_use","id":"c1","input":{"path":"a"}}],"timestamp":"2025-01-01T00:00:00Z"}"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        let back: Message = serde_json::from_str(&serde_json::to_string(&msg).unwrap()).unwrap();
        assert_eq!(msg, back);
        match &back.content {
            MessageContent::Blocks(blocks) => {
                assert_eq!(blocks[0].block_type, "tool_use");
                assert_eq!(blocks[0].extra["id"], "c1");
            }
            MessageContent::Text(_) => panic!("expected blocks"),
        }
    }

    #[test]
    fn char_prefix_counts_chars_not_bytes() {
        assert_eq!(char_prefix("héllo", 2), ("hé", true));
        assert_eq!(char_prefix("abc", 3), ("abc", false));
        assert_eq!(char_prefix("", 5), ("", false));
    }
}
