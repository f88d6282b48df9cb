//! Convenience re-exports for common `cinch-pager` types.
//!
//! ```ignore
//! use cinch_pager::prelude::*;
//! ```
//!
//! Covers messages, the reference buffer, both paging engines, the built-in
//! strategies, and the embedders. Id helpers, snapshot details, and the
//! vector index are left in their modules.

// ── Messages ────────────────────────────────────────────────────────
pub use crate::{ContentBlock, Message, MessageContent, MessageRole, PagingError};

// ── Live buffer ─────────────────────────────────────────────────────
pub use crate::context::{
    CleanupOutcome, ContextBudget, ContextBuffer, ContextConfig, PageFactory, VirtualContext,
};

// ── Paging engines ──────────────────────────────────────────────────
pub use crate::paging::{
    FixedSizeFragmenter, FragmentationConfig, FragmentationMemory, Fragmenter, FragmenterConfig,
    Page, PageRef, PageStore, RandomSamplingFragmenter, SemanticConfig, SemanticMemory,
    SemanticOutcome,
};

// ── Embedders ───────────────────────────────────────────────────────
pub use crate::paging::{EmbedFuture, Embedder, FnEmbedder, HashingEmbedder, HttpEmbedder};
