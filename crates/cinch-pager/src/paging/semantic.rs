//! Semantic paging engine.
//!
//! [`SemanticMemory`] embeds every message it sees into a [`VectorIndex`].
//! When the live buffer outgrows its budget, the engine embeds the recent
//! conversation, pulls the indexed messages most similar to it into a
//! `semantic_cluster_*` page, and then evicts a fixed fraction of the oldest
//! live messages.
//!
//! What goes into the page and how much leaves the buffer are decided
//! separately. Evicted messages the retrieval did not surface are written to
//! an `evicted_*` page through the buffer's default page creation (unless
//! [`SemanticConfig::persist_unretrieved`] is off), so nothing evicted is
//! lost.
//!
//! The index itself lives in memory. [`save_index`](SemanticMemory::save_index)
//! writes `hnsw-index.json` next to the pages: every tracked message, the
//! index shape, and optionally each message's embedding, so a reload can
//! rebuild the graph without calling the embedder again.
//!
//! Degraded states never fail a call: tiny messages are not indexed, a
//! wrong-width embedding is logged and skipped, and a failed or empty
//! retrieval falls back to the buffer's temporal cleanup. If that cleanup
//! pages nothing (every message protected, or too small to page), the oldest
//! fraction is evicted anyway, so an over-budget cleanup always shrinks the
//! buffer.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::context::buffer::{CleanupOutcome, ContextBuffer};
use crate::error::{PagingError, Result};
use crate::paging::embed::Embedder;
use crate::paging::fragmenter::PREVIEW_CHARS;
use crate::paging::store::{
    INDEX_FILENAME, Page, message_id, semantic_page_id, write_json_atomic,
};
use crate::paging::vector_index::{IndexConfig, Insertion, VectorIndex};
use crate::{Message, MessageRole, char_prefix};

/// Messages with fewer characters than this are never embedded.
pub const MIN_EMBED_CHARS: usize = 5;

/// Configuration for [`SemanticMemory`].
///
/// Only `index.dimensions` is required when deserializing; every other field
/// falls back to the value [`SemanticConfig::new`] uses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SemanticConfig {
    pub index: IndexConfig,
    /// Neighbors retrieved per cleanup.
    #[serde(default = "default_retrieval_k")]
    pub retrieval_k: usize,
    /// Candidate list size during search.
    #[serde(default = "default_ef_search")]
    pub ef_search: usize,
    /// Trailing live messages that form the retrieval query.
    #[serde(default = "default_recent_window")]
    pub recent_window: usize,
    /// Fraction of the live buffer (oldest first) evicted per cleanup.
    #[serde(default = "default_eviction_fraction")]
    pub eviction_fraction: f64,
    /// Page evicted messages the retrieval did not capture.
    #[serde(default = "default_true")]
    pub persist_unretrieved: bool,
    /// Store embeddings in the snapshot so reloads skip the embedder.
    #[serde(default = "default_true")]
    pub cache_embeddings: bool,
}

fn default_retrieval_k() -> usize {
    10
}

fn default_ef_search() -> usize {
    64
}

fn default_recent_window() -> usize {
    10
}

fn default_eviction_fraction() -> f64 {
    0.3
}

fn default_true() -> bool {
    true
}

impl SemanticConfig {
    pub fn new(dimensions: usize) -> Self {
        Self {
            index: IndexConfig::new(dimensions),
            retrieval_k: default_retrieval_k(),
            ef_search: default_ef_search(),
            recent_window: default_recent_window(),
            eviction_fraction: default_eviction_fraction(),
            persist_unretrieved: true,
            cache_embeddings: true,
        }
    }

    pub fn with_index(mut self, index: IndexConfig) -> Self {
        self.index = index;
        self
    }

    pub fn with_retrieval_k(mut self, k: usize) -> Self {
        self.retrieval_k = k;
        self
    }

    pub fn with_recent_window(mut self, n: usize) -> Self {
        self.recent_window = n;
        self
    }

    pub fn with_eviction_fraction(mut self, fraction: f64) -> Self {
        self.eviction_fraction = fraction;
        self
    }

    pub fn with_persist_unretrieved(mut self, enabled: bool) -> Self {
        self.persist_unretrieved = enabled;
        self
    }

    pub fn with_cache_embeddings(mut self, enabled: bool) -> Self {
        self.cache_embeddings = enabled;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.index.validate()?;
        if !(0.0..=1.0).contains(&self.eviction_fraction) {
            return Err(PagingError::Config(format!(
                "eviction_fraction must be within 0.0..=1.0, got {}",
                self.eviction_fraction
            )));
        }
        Ok(())
    }
}

/// On-disk form of the index: tracked messages, the index shape, and
/// (optionally) cached embeddings. The graph is rebuilt on load.
#[derive(Serialize, Deserialize, Debug)]
struct IndexSnapshot {
    messages: BTreeMap<String, Message>,
    config: IndexConfig,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    embeddings: BTreeMap<String, Vec<f32>>,
}

/// Result of [`SemanticMemory::cleanup`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SemanticOutcome {
    /// Already within budget.
    WithinBudget,
    /// Retrieval produced nothing usable; the buffer's temporal cleanup ran.
    Temporal(CleanupOutcome),
    /// A semantic page was written and the oldest messages evicted.
    Semantic {
        page_id: String,
        retrieved: usize,
        evicted: usize,
        /// Pages holding evicted messages the retrieval missed.
        overflow_page_ids: Vec<String>,
    },
}

/// Paging engine that evicts by semantic relevance to the recent
/// conversation.
pub struct SemanticMemory<B: ContextBuffer> {
    buffer: B,
    embedder: Arc<dyn Embedder>,
    config: SemanticConfig,
    index: VectorIndex,
    /// message id -> message, for every indexed message
    messages: HashMap<String, Message>,
    /// message id -> embedding, kept only with `cache_embeddings`
    embeddings: HashMap<String, Vec<f32>>,
    index_path: PathBuf,
}

impl<B: ContextBuffer> SemanticMemory<B> {
    /// Wrap `buffer` and load any snapshot in its pages directory.
    pub async fn open(
        buffer: B,
        embedder: Arc<dyn Embedder>,
        config: SemanticConfig,
    ) -> Result<Self> {
        config.validate()?;
        let index = VectorIndex::new(config.index.clone())?;
        let index_path = buffer.store().dir().join(INDEX_FILENAME);
        let mut memory = Self {
            buffer,
            embedder,
            config,
            index,
            messages: HashMap::new(),
            embeddings: HashMap::new(),
            index_path,
        };
        memory.load_index().await?;
        Ok(memory)
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

    pub fn config(&self) -> &SemanticConfig {
        &self.config
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    /// Points in the vector index.
    pub fn index_len(&self) -> usize {
        self.index.len()
    }

    /// The tracked message with id `id`.
    pub fn get_message(&self, id: &str) -> Option<&Message> {
        self.messages.get(id)
    }

    /// Append `message` to the live buffer, then index it.
    ///
    /// Returns whether a new point was added to the index.
    pub async fn add_message(&mut self, message: Message) -> bool {
        self.buffer.add_message(message.clone());
        self.index_message(message).await
    }

    async fn index_message(&mut self, message: Message) -> bool {
        let text = message.text().into_owned();
        if text.chars().count() < MIN_EMBED_CHARS {
            return false;
        }

        let id = message_id(&message);
        if self.index.contains(&id) {
            self.messages.insert(id, message);
            return false;
        }

        match self.embedder.embed(&text).await {
            Ok(embedding) => self.insert_embedding(id, message, embedding),
            Err(e) => {
                warn!("Failed to embed message {id}: {e}");
                false
            }
        }
    }

    fn insert_embedding(&mut self, id: String, message: Message, embedding: Vec<f32>) -> bool {
        match self.index.insert(&id, &embedding) {
            Ok(Insertion::Inserted) => {
                self.messages.insert(id.clone(), message);
                if self.config.cache_embeddings {
                    self.embeddings.insert(id, embedding);
                }
                true
            }
            Ok(Insertion::AlreadyIndexed) => {
                self.messages.insert(id, message);
                false
            }
            Ok(Insertion::Full | Insertion::Degenerate) => false,
            Err(e) => {
                warn!("{e}, not indexing {id}");
                false
            }
        }
    }

    /// Indexed messages most similar to `text`, closest first, with cosine
    /// distances.
    pub async fn related(&self, text: &str, k: usize) -> Result<Vec<(Message, f32)>> {
        if self.index.is_empty() {
            return Ok(Vec::new());
        }
        let query = self.embedder.embed(text).await?;
        let hits = self.index.search(&query, k, self.config.ef_search)?;
        Ok(hits
            .into_iter()
            .filter_map(|(id, distance)| self.messages.get(&id).map(|m| (m.clone(), distance)))
            .collect())
    }

    /// Evict down toward `target_tokens` by semantic relevance.
    ///
    /// Pages are written before the live buffer changes. A failed write
    /// propagates and leaves the buffer as it was.
    pub async fn cleanup(&mut self, target_tokens: usize) -> Result<SemanticOutcome> {
        let current = self.buffer.estimate_tokens();
        if current <= target_tokens {
            return Ok(SemanticOutcome::WithinBudget);
        }

        let live = self.buffer.messages();
        let window_start = live.len().saturating_sub(self.config.recent_window);
        let query = live[window_start..]
            .iter()
            .map(|m| m.text().into_owned())
            .collect::<Vec<_>>()
            .join(" ");

        let hits = match self.related_ids(&query).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!("Semantic retrieval failed ({e}), falling back to temporal cleanup");
                return self.temporal_cleanup(target_tokens);
            }
        };
        let neighbor_count = hits.len();
        let retrieved: Vec<(String, Message)> = hits
            .into_iter()
            .filter_map(|id| self.messages.get(&id).map(|m| (id, m.clone())))
            .collect();
        if retrieved.is_empty() {
            debug!("No semantic neighbors for the recent context, falling back to temporal cleanup");
            return self.temporal_cleanup(target_tokens);
        }

        let label = self.buffer.store_mut().reserve_label(format!(
            "semantic_cluster_{}",
            Utc::now().timestamp_millis()
        ));
        let page_id = semantic_page_id(&label);
        let mut metadata = serde_json::Map::new();
        metadata.insert("retrieval".into(), "semantic".into());
        metadata.insert("neighborCount".into(), neighbor_count.into());
        metadata.insert(
            "queryPreview".into(),
            char_prefix(&query, PREVIEW_CHARS).0.into(),
        );

        let retrieved_ids: HashSet<String> = retrieved.iter().map(|(id, _)| id.clone()).collect();
        let retrieved_count = retrieved.len();
        self.buffer.store_mut().persist(Page {
            id: page_id.clone(),
            label,
            role: MessageRole::System,
            created_at: Utc::now(),
            messages: retrieved.into_iter().map(|(_, m)| m).collect(),
            metadata,
        })?;

        let evict_count = self.eviction_count(self.buffer.messages().len());

        let mut overflow_page_ids = Vec::new();
        if self.config.persist_unretrieved && evict_count > 0 {
            let unretrieved: Vec<Message> = self.buffer.messages()[..evict_count]
                .iter()
                .filter(|m| !retrieved_ids.contains(&message_id(m)))
                .cloned()
                .collect();
            if !unretrieved.is_empty() {
                let label = self
                    .buffer
                    .store_mut()
                    .reserve_label(format!("evicted_{}", Utc::now().timestamp_millis()));
                let page = self.buffer.create_page_from_messages(
                    &unretrieved,
                    &label,
                    MessageRole::System,
                )?;
                overflow_page_ids = page.page_ids;
            }
        }

        self.buffer.messages_mut().drain(..evict_count);

        info!(
            "Semantic cleanup: {retrieved_count} related msgs paged to {page_id}, \
             evicted {evict_count} oldest ({} unretrieved page(s)), ~{} tokens remain",
            overflow_page_ids.len(),
            self.buffer.estimate_tokens()
        );
        Ok(SemanticOutcome::Semantic {
            page_id,
            retrieved: retrieved_count,
            evicted: evict_count,
            overflow_page_ids,
        })
    }

    async fn related_ids(&self, query: &str) -> Result<Vec<String>> {
        if self.index.is_empty() {
            return Ok(Vec::new());
        }
        let embedding = self.embedder.embed(query).await?;
        let hits = self
            .index
            .search(&embedding, self.config.retrieval_k, self.config.ef_search)?;
        Ok(hits.into_iter().map(|(id, _)| id).collect())
    }

    /// The buffer's own cleanup, or, when that pages nothing, the oldest
    /// `eviction_fraction` of the buffer (at least one message) written to an
    /// `evicted_*` page.
    fn temporal_cleanup(&mut self, target_tokens: usize) -> Result<SemanticOutcome> {
        let outcome = self.buffer.cleanup(target_tokens)?;
        if outcome != CleanupOutcome::NothingToEvict {
            return Ok(SemanticOutcome::Temporal(outcome));
        }

        let live_len = self.buffer.messages().len();
        let evict_count = self.eviction_count(live_len).max(1).min(live_len);
        if evict_count == 0 {
            return Ok(SemanticOutcome::Temporal(outcome));
        }
        let oldest = self.buffer.messages()[..evict_count].to_vec();
        let label = self
            .buffer
            .store_mut()
            .reserve_label(format!("evicted_{}", Utc::now().timestamp_millis()));
        let page = self
            .buffer
            .create_page_from_messages(&oldest, &label, MessageRole::System)?;
        self.buffer.messages_mut().drain(..evict_count);

        info!(
            "Temporal cleanup paged nothing, evicted the oldest {evict_count} msgs to {}",
            page.page_ids.join(", ")
        );
        Ok(SemanticOutcome::Temporal(CleanupOutcome::Evicted {
            evicted: evict_count,
            page_ids: page.page_ids,
        }))
    }

    fn eviction_count(&self, live_len: usize) -> usize {
        ((live_len as f64 * self.config.eviction_fraction).floor() as usize).min(live_len)
    }

    // ── Persistence ────────────────────────────────────────────────

    /// Write the snapshot to `<pages_dir>/hnsw-index.json`.
    pub fn save_index(&self) -> Result<()> {
        let snapshot = IndexSnapshot {
            messages: self
                .messages
                .iter()
                .map(|(id, m)| (id.clone(), m.clone()))
                .collect(),
            config: self.index.config().clone(),
            embeddings: if self.config.cache_embeddings {
                self.embeddings
                    .iter()
                    .map(|(id, v)| (id.clone(), v.clone()))
                    .collect()
            } else {
                BTreeMap::new()
            },
        };
        write_json_atomic(&self.index_path, &snapshot)?;
        debug!(
            "Saved index snapshot ({} msgs) to {}",
            snapshot.messages.len(),
            self.index_path.display()
        );
        Ok(())
    }

    /// Restore tracked messages from the snapshot and rebuild the graph.
    ///
    /// A missing or unreadable snapshot is a cold start, not an error.
    /// Cached embeddings of the right width are reused; everything else is
    /// re-embedded. Returns the number of points added.
    pub async fn load_index(&mut self) -> Result<usize> {
        if !self.index_path.exists() {
            debug!("No index snapshot at {}", self.index_path.display());
            return Ok(0);
        }
        let snapshot = match std::fs::read_to_string(&self.index_path)
            .map_err(PagingError::from)
            .and_then(|json| Ok(serde_json::from_str::<IndexSnapshot>(&json)?))
        {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(
                    "Failed to load index snapshot at {}: {e}",
                    self.index_path.display()
                );
                return Ok(0);
            }
        };

        let mut cached = snapshot.embeddings;
        if snapshot.config.dimensions != self.index.dimensions() {
            warn!(
                "Snapshot was built with {} dimensions, index has {}; re-embedding",
                snapshot.config.dimensions,
                self.index.dimensions()
            );
            cached.clear();
        }

        let total = snapshot.messages.len();
        let mut added = 0;
        let mut reused = 0;
        for (id, message) in snapshot.messages {
            let text = message.text().into_owned();
            if text.chars().count() < MIN_EMBED_CHARS || self.index.contains(&id) {
                self.messages.insert(id, message);
                continue;
            }

            let embedding = match cached.remove(&id) {
                Some(v) if v.len() == self.index.dimensions() => {
                    reused += 1;
                    v
                }
                _ => match self.embedder.embed(&text).await {
                    Ok(v) => v,
                    Err(e) => {
                        warn!("Failed to re-embed {id}: {e}");
                        self.messages.insert(id, message);
                        continue;
                    }
                },
            };
            if self.insert_embedding(id, message, embedding) {
                added += 1;
            }
        }

        info!("Loaded {total} messages from index snapshot ({added} indexed, {reused} cached)");
        Ok(added)
    }

    /// Save the snapshot, then shut the buffer down.
    pub fn shutdown(&mut self) -> Result<()> {
        self.save_index()?;
        self.buffer.shutdown()
    }
}
