//! The live context buffer and temporal eviction.
//!
//! [`ContextBuffer`] is the narrow contract the paging engines consume: an
//! ordered live message list, a [`PageStore`], a token estimate, and default
//! page-creation and cleanup behaviors the engines fall back to.
//!
//! [`VirtualContext`] is the reference implementation. Its cleanup is purely
//! temporal: when over budget it takes the oldest messages (never touching
//! the last `keep_recent`), hands them to a [`PageFactory`], and replaces the
//! run with a single system message carrying the factory's summary. The
//! factory decides what the pages look like: [`SummaryPager`] writes one page
//! per run, [`FragmentationMemory`](crate::paging::FragmentationMemory) fans
//! a run out into fragment pages.
//!
//! The summary counts against the budget. Eviction reserves room for the
//! summary's header line, never pages a run that is no larger than that
//! header, and falls back to the header alone when the full summary would
//! overshoot a target the header meets. Every eviction shrinks the buffer.

use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::context::budget::{DEFAULT_CHARS_PER_TOKEN, estimate_message_tokens, estimate_tokens};
use crate::error::Result;
use crate::paging::fragmenter::generate_preview;
use crate::paging::store::{Page, PageRef, PageStore, page_id};
use crate::{Message, MessageRole};

/// Default number of recent messages temporal eviction never touches.
const DEFAULT_KEEP_RECENT: usize = 10;

/// Default pages directory, relative to the working directory.
const DEFAULT_PAGES_DIR: &str = ".agents/pages";

// ── Contracts ──────────────────────────────────────────────────────

/// Turns an evicted run of messages into persisted pages.
pub trait PageFactory {
    /// Persist `messages` into `store` as one or more pages and return the
    /// text that stands in for them in the live context.
    fn create_page(
        &mut self,
        store: &mut PageStore,
        messages: &[Message],
        label: &str,
        role: MessageRole,
    ) -> Result<PageRef>;

    /// First line of the summary for a run labelled `label`. Stands in for
    /// the full summary when that would not fit.
    fn summary_header(&self, label: &str) -> String {
        format!("Paged: {label}")
    }
}

/// Result of a cleanup pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// Estimated tokens were already at or below the target. Nothing changed.
    WithinBudget,
    /// Over budget, but every live message is protected.
    NothingToEvict,
    /// `evicted` messages left the live buffer; `page_ids` were written.
    Evicted {
        evicted: usize,
        page_ids: Vec<String>,
    },
}

impl CleanupOutcome {
    /// Number of messages removed from the live buffer.
    pub fn evicted(&self) -> usize {
        match self {
            CleanupOutcome::Evicted { evicted, .. } => *evicted,
            _ => 0,
        }
    }
}

/// The live context buffer consumed by the paging engines.
///
/// Engines own their buffer and reach its state only through this trait, so
/// any host that can expose a message list, a page store, and a token
/// estimate can be paged.
pub trait ContextBuffer: Send {
    /// Live messages, oldest first.
    fn messages(&self) -> &[Message];

    fn messages_mut(&mut self) -> &mut Vec<Message>;

    /// The page directory and its storage location.
    fn store(&self) -> &PageStore;

    fn store_mut(&mut self) -> &mut PageStore;

    /// Estimated tokens of the live buffer.
    fn estimate_tokens(&self) -> usize;

    /// Append a message to the live buffer.
    fn add_message(&mut self, message: Message) {
        self.messages_mut().push(message);
    }

    /// Default page creation: one [`SummaryPager`] page for the whole run.
    fn create_page_from_messages(
        &mut self,
        messages: &[Message],
        label: &str,
        role: MessageRole,
    ) -> Result<PageRef> {
        SummaryPager.create_page(self.store_mut(), messages, label, role)
    }

    /// Evict down to `target_tokens`, paging evicted runs through `factory`.
    fn cleanup_with(
        &mut self,
        target_tokens: usize,
        factory: &mut dyn PageFactory,
    ) -> Result<CleanupOutcome>;

    /// Default temporal cleanup through [`SummaryPager`].
    fn cleanup(&mut self, target_tokens: usize) -> Result<CleanupOutcome> {
        self.cleanup_with(target_tokens, &mut SummaryPager)
    }

    /// Flush anything the buffer holds outside the page store.
    fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

// ── SummaryPager ───────────────────────────────────────────────────

/// Writes an evicted run as a single page.
#[derive(Debug, Clone, Copy, Default)]
pub struct SummaryPager;

impl PageFactory for SummaryPager {
    fn create_page(
        &mut self,
        store: &mut PageStore,
        messages: &[Message],
        label: &str,
        role: MessageRole,
    ) -> Result<PageRef> {
        if messages.is_empty() {
            return Ok(PageRef {
                summary: format!("Paged: {label} (empty)"),
                page_ids: Vec::new(),
            });
        }

        let id = page_id(label);
        let preview = generate_preview(messages);
        let mut metadata = serde_json::Map::new();
        metadata.insert("preview".into(), preview.clone().into());
        metadata.insert("count".into(), messages.len().into());

        store.persist(Page {
            id: id.clone(),
            label: label.to_string(),
            role,
            created_at: Utc::now(),
            messages: messages.to_vec(),
            metadata,
        })?;

        Ok(PageRef {
            summary: format!(
                "Paged: {label}\n📄 {preview} ({} msgs) [{id}]",
                messages.len()
            ),
            page_ids: vec![id],
        })
    }
}

// ── VirtualContext ─────────────────────────────────────────────────

/// Configuration for [`VirtualContext`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Directory pages are written to.
    pub pages_dir: PathBuf,
    /// Characters per token ratio for estimation.
    pub chars_per_token: f64,
    /// Most recent messages temporal eviction never removes.
    pub keep_recent: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            pages_dir: PathBuf::from(DEFAULT_PAGES_DIR),
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
            keep_recent: DEFAULT_KEEP_RECENT,
        }
    }
}

impl ContextConfig {
    pub fn new(pages_dir: impl Into<PathBuf>) -> Self {
        Self {
            pages_dir: pages_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_chars_per_token(mut self, cpt: f64) -> Self {
        self.chars_per_token = cpt;
        self
    }

    pub fn with_keep_recent(mut self, n: usize) -> Self {
        self.keep_recent = n;
        self
    }
}

/// Reference [`ContextBuffer`]: a message list, a page store, and
/// oldest-first eviction.
#[derive(Debug)]
pub struct VirtualContext {
    messages: Vec<Message>,
    store: PageStore,
    config: ContextConfig,
}

impl VirtualContext {
    /// Create an empty buffer, creating `config.pages_dir` if needed.
    pub fn new(config: ContextConfig) -> Result<Self> {
        let store = PageStore::open(&config.pages_dir)?;
        Ok(Self {
            messages: Vec::new(),
            store,
            config,
        })
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// How many of the oldest messages must go so that what remains, plus a
    /// summary of `reserve` tokens, fits in `target_tokens`.
    ///
    /// Bounded by the messages outside the protected recency window. Returns
    /// 0 when even the whole evictable run is no larger than the reserve,
    /// since paging it would grow the buffer.
    fn eviction_count(
        &self,
        current_tokens: usize,
        target_tokens: usize,
        reserve: usize,
    ) -> usize {
        let evictable = self.messages.len().saturating_sub(self.config.keep_recent);
        let mut remaining = current_tokens;
        let mut count = 0;
        for msg in self.messages.iter().take(evictable) {
            if remaining + reserve <= target_tokens {
                break;
            }
            remaining =
                remaining.saturating_sub(estimate_message_tokens(msg, self.config.chars_per_token));
            count += 1;
        }
        if current_tokens - remaining <= reserve {
            return 0;
        }
        count
    }

    /// The live-buffer stand-in for an evicted run: the full summary when it
    /// fits, otherwise its header line.
    ///
    /// The full summary is kept over a reachable target only if the header
    /// would not reach it either, and only if it still shrinks the buffer.
    fn summary_message(
        &self,
        summary: String,
        header: String,
        remaining: usize,
        evicted: usize,
        target_tokens: usize,
    ) -> Message {
        let cpt = self.config.chars_per_token;
        let full = Message::system(summary);
        let full_tokens = estimate_message_tokens(&full, cpt);
        let header = Message::system(header);
        let header_tokens = estimate_message_tokens(&header, cpt);

        let fits = remaining + full_tokens <= target_tokens;
        let unreachable = remaining + header_tokens > target_tokens;
        if fits || (unreachable && full_tokens < evicted) {
            full
        } else {
            debug!("Summary ({full_tokens} tokens) does not fit, keeping its header");
            header
        }
    }
}

impl ContextBuffer for VirtualContext {
    fn messages(&self) -> &[Message] {
        &self.messages
    }

    fn messages_mut(&mut self) -> &mut Vec<Message> {
        &mut self.messages
    }

    fn store(&self) -> &PageStore {
        &self.store
    }

    fn store_mut(&mut self) -> &mut PageStore {
        &mut self.store
    }

    fn estimate_tokens(&self) -> usize {
        estimate_tokens(&self.messages, self.config.chars_per_token)
    }

    fn cleanup_with(
        &mut self,
        target_tokens: usize,
        factory: &mut dyn PageFactory,
    ) -> Result<CleanupOutcome> {
        let current = self.estimate_tokens();
        if current <= target_tokens {
            return Ok(CleanupOutcome::WithinBudget);
        }
        let cpt = self.config.chars_per_token;

        let label = self
            .store
            .reserve_label(format!("context_{}", Utc::now().timestamp_millis()));
        let header = factory.summary_header(&label);
        let reserve = estimate_message_tokens(&Message::system(header.as_str()), cpt);

        let count = self.eviction_count(current, target_tokens, reserve);
        if count == 0 {
            debug!(
                "Over budget ({current} > {target_tokens}) but none of the {} messages can be \
                 paged without growing the buffer",
                self.messages.len()
            );
            return Ok(CleanupOutcome::NothingToEvict);
        }

        // Pages are written before the live buffer changes, so a failed write
        // leaves the buffer intact.
        let page = factory.create_page(
            &mut self.store,
            &self.messages[..count],
            &label,
            MessageRole::System,
        )?;
        let evicted = estimate_tokens(&self.messages[..count], cpt);
        let remaining = estimate_tokens(&self.messages[count..], cpt);
        let stand_in =
            self.summary_message(page.summary, header, remaining, evicted, target_tokens);
        self.messages.drain(..count);
        self.messages.insert(0, stand_in);

        info!(
            "Paged out {count} messages ({} page(s)), ~{} tokens remain",
            page.page_ids.len(),
            self.estimate_tokens()
        );
        Ok(CleanupOutcome::Evicted {
            evicted: count,
            page_ids: page.page_ids,
        })
    }
}
