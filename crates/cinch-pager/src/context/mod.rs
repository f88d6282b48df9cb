//! The live context: message buffer, token budget, temporal eviction.
//!
//! 1. **[`budget`]** estimates tokens from message text and turns a context
//!    window into a cleanup target.
//!
//! 2. **[`buffer`]** defines the [`ContextBuffer`] contract the paging
//!    engines consume, the [`PageFactory`] hook through which eviction writes
//!    pages, and [`VirtualContext`], the reference oldest-first buffer.

pub mod budget;
pub mod buffer;

// Re-export commonly used items at the module level.
pub use budget::{ContextBudget, ContextUsage, DEFAULT_CHARS_PER_TOKEN};
pub use buffer::{
    CleanupOutcome, ContextBuffer, ContextConfig, PageFactory, SummaryPager, VirtualContext,
};
