//! Pages, page ids, and the on-disk page directory.
//!
//! Every page is written as a pretty-printed JSON file named after its id:
//!
//! ```text
//! pages_dir/
//!   frag_1a2b3c4d5e6f.json
//!   frag_7a8b9c0d1e2f.json
//!   hnsw_0f1e2d3c4b5a.json
//!   page_9c8b7a6f5e4d.json
//!   hnsw-index.json          <- semantic index snapshot, not a page
//! ```
//!
//! Ids are SHA-256 digests of a deterministic input string, truncated to a
//! fixed number of hex characters and prefixed with a marker naming who
//! produced them. Deriving an id twice from the same input always yields the
//! same id, so no lookup table is needed to re-derive one.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::char_prefix;
use crate::error::Result;
use crate::{Message, MessageRole};

/// Id marker for fragment pages.
pub const FRAGMENT_PREFIX: &str = "frag_";
/// Id marker for indexed messages.
pub const MESSAGE_PREFIX: &str = "msg_";
/// Id marker for semantic cluster pages.
pub const SEMANTIC_PREFIX: &str = "hnsw_";
/// Id marker for the reference buffer's temporal pages.
pub const PAGE_PREFIX: &str = "page_";

/// Hex width of page ids.
pub const PAGE_ID_HEX_LEN: usize = 12;
/// Hex width of message ids.
pub const MESSAGE_ID_HEX_LEN: usize = 16;

/// Filename of the semantic index snapshot inside the pages directory.
pub const INDEX_FILENAME: &str = "hnsw-index.json";

/// Derive a stable id: `prefix` + first `hex_len` hex chars of SHA-256(`input`).
pub fn derive_id(prefix: &str, input: &str, hex_len: usize) -> String {
    let digest = format!("{:x}", Sha256::digest(input.as_bytes()));
    let (head, _) = char_prefix(&digest, hex_len);
    format!("{prefix}{head}")
}

/// Id of the `index`-th fragment carrying `label`.
pub fn fragment_id(label: &str, index: usize) -> String {
    derive_id(FRAGMENT_PREFIX, &format!("{label}-{index}"), PAGE_ID_HEX_LEN)
}

/// Id of an indexed message: role, first 100 chars of text, and timestamp.
///
/// Two messages with the same role and opening text created in the same
/// millisecond share an id.
pub fn message_id(message: &Message) -> String {
    let text = message.text();
    let (head, _) = char_prefix(&text, 100);
    derive_id(
        MESSAGE_PREFIX,
        &format!(
            "{}-{head}-{}",
            message.role,
            message.timestamp.timestamp_millis()
        ),
        MESSAGE_ID_HEX_LEN,
    )
}

/// Id of a semantic cluster page.
pub fn semantic_page_id(label: &str) -> String {
    derive_id(SEMANTIC_PREFIX, label, PAGE_ID_HEX_LEN)
}

/// Id of a temporal summary page.
pub fn page_id(label: &str) -> String {
    derive_id(PAGE_PREFIX, label, PAGE_ID_HEX_LEN)
}

// ── Page ───────────────────────────────────────────────────────────

/// A persisted, addressable bundle of messages removed from the live context.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub id: String,
    pub label: String,
    pub role: MessageRole,
    pub created_at: DateTime<Utc>,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// What a page factory hands back to the eviction loop: the text that stands
/// in for the evicted run, and the ids of the pages written, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRef {
    pub summary: String,
    pub page_ids: Vec<String>,
}

impl PageRef {
    /// Id of the first page written, `None` for an empty run.
    pub fn page_id(&self) -> Option<&str> {
        self.page_ids.first().map(String::as_str)
    }
}

// ── PageStore ──────────────────────────────────────────────────────

/// The page directory: pages registered in memory, backed by one JSON file
/// per page under `dir`.
#[derive(Debug)]
pub struct PageStore {
    dir: PathBuf,
    pages: HashMap<String, Page>,
    /// Labels handed out by [`reserve_label`](Self::reserve_label) or seen on
    /// persisted pages.
    labels: HashSet<String>,
}

impl PageStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    ///
    /// Pages already on disk are not loaded; see [`list_pages`] for a
    /// read-only view.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            pages: HashMap::new(),
            labels: HashSet::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the JSON file for page `id`.
    pub fn page_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Write `page` to disk and register it. Returns the file path.
    ///
    /// The write goes to a temp file that is renamed into place, so a reader
    /// never observes a half-written page. A page with an id that is already
    /// registered replaces the previous one.
    pub fn persist(&mut self, page: Page) -> Result<PathBuf> {
        let path = self.page_path(&page.id);
        write_json_atomic(&path, &page)?;

        debug!(
            "Persisted page {} ({} msgs) to {}",
            page.id,
            page.messages.len(),
            path.display()
        );
        self.labels.insert(page.label.clone());
        self.pages.insert(page.id.clone(), page);
        Ok(path)
    }

    pub fn get(&self, id: &str) -> Option<&Page> {
        self.pages.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.pages.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Page> {
        self.pages.values()
    }

    /// Reserve a label derived from `base`, unique within this directory.
    ///
    /// Labels are usually time-derived, and two evictions can land in the
    /// same millisecond. Ids are derived from labels, so a repeated label
    /// would overwrite the earlier page. Returns `base` the first time, then
    /// `base-2`, `base-3`, ...
    pub fn reserve_label(&mut self, base: impl Into<String>) -> String {
        let base = base.into();
        let mut label = base.clone();
        let mut n = 2;
        while !self.labels.insert(label.clone()) {
            label = format!("{base}-{n}");
            n += 1;
        }
        label
    }
}

/// Write `value` as pretty JSON to `path` via a dotted temp file in the same
/// directory, renamed into place.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp_path = path.with_file_name(format!(".{file_name}.tmp"));

    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Read every page file under `dir`.
///
/// Skips the index snapshot, temp files, and anything that does not parse as
/// a page (with a warning). Sorted by creation time, oldest first.
pub fn list_pages(dir: &Path) -> Result<Vec<Page>> {
    let mut pages = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name == INDEX_FILENAME || name.starts_with('.') || !name.ends_with(".json") {
            continue;
        }
        let path = entry.path();
        match std::fs::read_to_string(&path) {
            Ok(json) => match serde_json::from_str::<Page>(&json) {
                Ok(page) => pages.push(page),
                Err(e) => warn!("Skipping malformed page at {}: {e}", path.display()),
            },
            Err(e) => warn!("Skipping unreadable page at {}: {e}", path.display()),
        }
    }
    pages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    Ok(pages)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_page(id: &str) -> Page {
        Page {
            id: id.into(),
            label: "test".into(),
            role: MessageRole::System,
            created_at: Utc::now(),
            messages: vec![Message::user("hello"), Message::assistant("hi there")],
            metadata: serde_json::Map::new(),
        }
    }

    #[test]
    fn ids_are_stable_and_prefixed() {
        let a = fragment_id("ctx [frag 1/3]", 0);
        let b = fragment_id("ctx [frag 1/3]", 0);
        assert_eq!(a, b);
        assert!(a.starts_with(FRAGMENT_PREFIX));
        assert_eq!(a.len(), FRAGMENT_PREFIX.len() + PAGE_ID_HEX_LEN);
        let hex = a.strip_prefix(FRAGMENT_PREFIX).unwrap();
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn different_indices_give_different_ids() {
        let ids: std::collections::HashSet<String> =
            (0..100).map(|i| fragment_id("label", i)).collect();
        assert_eq!(ids.len(), 100);
    }

    #[test]
    fn message_ids_depend_on_role_text_and_time() {
        let t = Utc::now();
        let a = Message::user("hello world").with_timestamp(t);
        let id = message_id(&a);
        assert!(id.starts_with(MESSAGE_PREFIX));
        assert_eq!(id.len(), MESSAGE_PREFIX.len() + MESSAGE_ID_HEX_LEN);
        assert_eq!(id, message_id(&a.clone()));

        let other_role = Message::assistant("hello world").with_timestamp(t);
        let later = a.clone().with_timestamp(t + chrono::Duration::milliseconds(1));
        assert_ne!(id, message_id(&other_role));
        assert_ne!(id, message_id(&later));

        // Only the first 100 characters take part.
        let long_a = Message::user(format!("{}tail one", "x".repeat(100))).with_timestamp(t);
        let long_b = Message::user(format!("{}tail two", "x".repeat(100))).with_timestamp(t);
        assert_eq!(message_id(&long_a), message_id(&long_b));
    }

    #[test]
    fn semantic_and_page_ids_use_their_markers() {
        assert!(semantic_page_id("semantic_cluster_1").starts_with(SEMANTIC_PREFIX));
        assert!(page_id("context_1").starts_with(PAGE_PREFIX));
        assert_eq!(
            semantic_page_id("x").strip_prefix(SEMANTIC_PREFIX),
            derive_id("", "x", PAGE_ID_HEX_LEN).strip_prefix("")
        );
    }

    #[test]
    fn persist_writes_pretty_json_and_registers() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PageStore::open(dir.path().join("pages")).unwrap();
        let path = store.persist(make_page("page_abc")).unwrap();

        assert!(path.exists());
        assert!(store.contains("page_abc"));
        let json = std::fs::read_to_string(&path).unwrap();
        assert!(json.contains("\n  \"id\": \"page_abc\""));
        assert!(json.contains("\"createdAt\""));

        let back: Page = serde_json::from_str(&json).unwrap();
        assert_eq!(&back, store.get("page_abc").unwrap());
    }

    #[test]
    fn reserve_label_disambiguates_collisions() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PageStore::open(dir.path()).unwrap();
        assert_eq!(store.reserve_label("semantic_cluster_1"), "semantic_cluster_1");
        assert_eq!(store.reserve_label("semantic_cluster_1"), "semantic_cluster_1-2");
        assert_eq!(store.reserve_label("semantic_cluster_1"), "semantic_cluster_1-3");
    }

    #[test]
    fn persisted_labels_are_reserved() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PageStore::open(dir.path()).unwrap();
        let mut page = make_page("page_x");
        page.label = "context_42".into();
        store.persist(page).unwrap();
        assert_eq!(store.reserve_label("context_42"), "context_42-2");
    }

    #[test]
    fn list_pages_skips_snapshot_and_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PageStore::open(dir.path()).unwrap();
        store.persist(make_page("page_one")).unwrap();
        store.persist(make_page("page_two")).unwrap();
        std::fs::write(dir.path().join(INDEX_FILENAME), "{}").unwrap();
        std::fs::write(dir.path().join("broken.json"), "not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let pages = list_pages(dir.path()).unwrap();
        let mut ids: Vec<&str> = pages.iter().map(|p| p.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["page_one", "page_two"]);
    }
}
