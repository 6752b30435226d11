//! # Lexis
//!
//! An embeddable, segment-based full-text indexing and retrieval engine.
//!
//! ## Features
//!
//! - Block-compressed posting lists with skip blocks
//! - Immutable segments with per-commit deletion bitmaps
//! - A single writer with background tiered merging and atomic commits
//! - Snapshot-isolated readers that never block
//! - Term, boolean, phrase, range and prefix queries with BM25F scoring
//! - N-gram based spelling correction
//!
//! ## Example
//!
//! ```
//! use lexis::prelude::*;
//!
//! # fn main() -> lexis::error::Result<()> {
//! let schema = Schema::builder()
//!     .field(FieldDefinition::text("body").stored())
//!     .build()?;
//! let index = Index::create_in_memory(schema)?;
//!
//! let mut writer = index.writer(IndexWriterConfig::default())?;
//! writer.add_document(Document::new().add("body", "the quick brown fox"))?;
//! writer.add_document(Document::new().add("body", "the lazy dog"))?;
//! writer.close()?;
//!
//! let searcher = index.searcher()?;
//! let results = searcher.search(&Query::term("body", "fox"), 10)?;
//! assert_eq!(results.total_hits, 1);
//! # Ok(())
//! # }
//! ```

pub mod analysis;
pub mod codec;
pub mod document;
pub mod error;
pub mod index;
pub mod query;
pub mod schema;
pub mod search;
pub mod segment;
pub mod spelling;
pub mod storage;
pub mod util;

pub mod prelude {
    pub use crate::analysis::{Analyzer, AnalyzerKind, Token};
    pub use crate::document::{Document, FieldValue, StoredDocument};
    pub use crate::error::{LexisError, Result};
    pub use crate::index::{
        Index, IndexReader, IndexWriter, IndexWriterConfig, MergePolicyConfig, TieredMergeConfig,
    };
    pub use crate::query::Query;
    pub use crate::query::collector::SortKey;
    pub use crate::query::scorer::ScoringConfig;
    pub use crate::schema::{FieldDefinition, FieldType, Schema};
    pub use crate::search::{SearchHit, SearchOptions, SearchResults, Searcher};
    pub use crate::spelling::{CorrectorConfig, Suggestion};
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
