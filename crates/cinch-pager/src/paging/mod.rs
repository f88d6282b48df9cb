//! Paging: turning evicted messages into persisted, addressable pages.
//!
//! 1. **[`store`]** defines [`Page`], the stable id scheme, and [`PageStore`],
//!    the page directory backed by one JSON file per page.
//!
//! 2. **[`fragmenter`]** is the split-strategy interface. A [`Fragmenter`]
//!    cuts an evicted run into contiguous [`Fragment`]s.
//!    [`random_sampling`] provides the age-weighted default.
//!
//! 3. **[`fragmentation`]** ([`FragmentationMemory`]) pages each evicted run
//!    as several fragment pages and leaves a cross-reference summary behind.
//!
//! 4. **[`semantic`]** ([`SemanticMemory`]) indexes every message in a
//!    [`VectorIndex`] and, under pressure, pages out what is most related to
//!    the current conversation. Vectors come from an [`Embedder`] (see
//!    [`embed`]).

pub mod embed;
pub mod fragmentation;
pub mod fragmenter;
pub mod random_sampling;
pub mod semantic;
pub mod store;
pub mod vector_index;

// Re-export commonly used items at the module level.
pub use embed::{EmbedFuture, Embedder, FnEmbedder, HashingEmbedder, HttpEmbedder};
pub use fragmentation::{FragmentationConfig, FragmentationMemory};
pub use fragmenter::{
    FixedSizeFragmenter, Fragment, FragmentMetadata, Fragmenter, FragmenterConfig,
    generate_preview,
};
pub use random_sampling::RandomSamplingFragmenter;
pub use semantic::{SemanticConfig, SemanticMemory, SemanticOutcome};
pub use store::{Page, PageRef, PageStore, list_pages, message_id};
pub use vector_index::{IndexConfig, Insertion, VectorIndex};
