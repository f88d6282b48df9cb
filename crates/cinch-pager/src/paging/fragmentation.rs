//! Fragmentation paging engine.
//!
//! [`FragmentationMemory`] wraps a [`ContextBuffer`] and replaces its page
//! creation: an evicted run is handed to the configured [`Fragmenter`], each
//! fragment is persisted as its own page, and the live context gets back a
//! cross-reference summary with one line per fragment.
//!
//! ```text
//! Fragmented: context_1718000000000
//! 🧠 user: Read src/main.rs and summarize it. (3 msgs)
//! 🧠 assistant: The file wires up the CLI and... (1 msgs)
//! 🧠 tool: fn main() { ... (7 msgs)
//! ```
//!
//! Without a fragmenter the engine is transparent: page creation and cleanup
//! fall through to the buffer's defaults.

use chrono::Utc;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::context::buffer::{CleanupOutcome, ContextBuffer, PageFactory};
use crate::error::Result;
use crate::paging::fragmenter::{Fragmenter, FragmenterConfig};
use crate::paging::store::{Page, PageRef, PageStore, fragment_id};
use crate::{Message, MessageRole};

/// Configuration for [`FragmentationMemory`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FragmentationConfig {
    pub fragmenter: FragmenterConfig,
    /// Seed for the split RNG. `None` seeds from OS entropy.
    pub seed: Option<u64>,
}

impl FragmentationConfig {
    pub fn with_fragmenter_config(mut self, config: FragmenterConfig) -> Self {
        self.fragmenter = config;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Paging engine that splits evicted runs into fragment pages.
pub struct FragmentationMemory<B: ContextBuffer> {
    buffer: B,
    fragmenter: Option<Box<dyn Fragmenter>>,
    config: FragmentationConfig,
    rng: StdRng,
}

impl<B: ContextBuffer> FragmentationMemory<B> {
    /// Wrap `buffer`. No fragmenter is set, so paging behaves exactly like
    /// the buffer's own until [`with_fragmenter`](Self::with_fragmenter).
    pub fn new(buffer: B, config: FragmentationConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            buffer,
            fragmenter: None,
            config,
            rng,
        }
    }

    pub fn with_fragmenter(mut self, fragmenter: impl Fragmenter + 'static) -> Self {
        self.fragmenter = Some(Box::new(fragmenter));
        self
    }

    /// Replace (or clear) the fragmenter at runtime.
    pub fn set_fragmenter(&mut self, fragmenter: Option<Box<dyn Fragmenter>>) {
        self.fragmenter = fragmenter;
    }

    pub fn buffer(&self) -> &B {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut B {
        &mut self.buffer
    }

    pub fn into_buffer(self) -> B {
        self.buffer
    }

    pub fn config(&self) -> &FragmentationConfig {
        &self.config
    }

    pub fn add_message(&mut self, message: Message) {
        self.buffer.add_message(message);
    }

    /// Persist `messages` as fragment pages and return the cross-reference
    /// summary. The live buffer is not touched.
    pub fn create_page_from_messages(
        &mut self,
        messages: &[Message],
        label: &str,
        role: MessageRole,
    ) -> Result<PageRef> {
        match self.fragmenter.as_deref() {
            None => self.buffer.create_page_from_messages(messages, label, role),
            Some(fragmenter) => FragmentPager {
                fragmenter,
                config: &self.config.fragmenter,
                rng: &mut self.rng,
            }
            .create_page(self.buffer.store_mut(), messages, label, role),
        }
    }

    /// Evict down to `target_tokens`. Evicted runs fan out into fragment
    /// pages; the buffer keeps only the summary.
    pub fn cleanup(&mut self, target_tokens: usize) -> Result<CleanupOutcome> {
        match self.fragmenter.as_deref() {
            None => self.buffer.cleanup(target_tokens),
            Some(fragmenter) => {
                let mut pager = FragmentPager {
                    fragmenter,
                    config: &self.config.fragmenter,
                    rng: &mut self.rng,
                };
                self.buffer.cleanup_with(target_tokens, &mut pager)
            }
        }
    }

    pub fn shutdown(&mut self) -> Result<()> {
        self.buffer.shutdown()
    }
}

/// [`PageFactory`] borrowing the engine's strategy and RNG, so the buffer
/// can be borrowed mutably alongside it.
struct FragmentPager<'a> {
    fragmenter: &'a dyn Fragmenter,
    config: &'a FragmenterConfig,
    rng: &'a mut StdRng,
}

impl PageFactory for FragmentPager<'_> {
    fn create_page(
        &mut self,
        store: &mut PageStore,
        messages: &[Message],
        label: &str,
        role: MessageRole,
    ) -> Result<PageRef> {
        let fragments = self.fragmenter.fragment(messages, self.config, &mut *self.rng);
        let total = fragments.len();
        debug!(
            "{} split {} messages into {total} fragment(s)",
            self.fragmenter.name(),
            messages.len()
        );

        let mut links = Vec::with_capacity(total);
        let mut page_ids = Vec::with_capacity(total);

        for (i, fragment) in fragments.into_iter().enumerate() {
            let frag_label = format!("{label} [frag {}/{total}]", i + 1);
            let id = fragment_id(&frag_label, i);
            let (messages, meta) = fragment.into_parts();

            links.push(format!("🧠 {} ({} msgs)", meta.preview, meta.count));

            let mut metadata = match serde_json::to_value(&meta)? {
                serde_json::Value::Object(map) => map,
                _ => serde_json::Map::new(),
            };
            metadata.insert("fragmentIndex".into(), i.into());
            metadata.insert("totalFragments".into(), total.into());
            metadata.insert("parent".into(), label.into());

            store.persist(Page {
                id: id.clone(),
                label: frag_label,
                role,
                created_at: Utc::now(),
                messages,
                metadata,
            })?;
            page_ids.push(id);
        }

        info!("Fragmented '{label}' into {total} page(s)");
        Ok(PageRef {
            summary: format!("Fragmented: {label}\n{}", links.join("\n")),
            page_ids,
        })
    }

    fn summary_header(&self, label: &str) -> String {
        format!("Fragmented: {label}")
    }
}
