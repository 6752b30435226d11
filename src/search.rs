//! The search entry point.
//!
//! A [`Searcher`] owns one [`IndexReader`] and runs queries against it, so
//! every call on the same searcher sees the same commit.

use std::sync::Arc;

use ahash::AHashMap;
use log::debug;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::document::StoredDocument;
use crate::error::{LexisError, Result};
use crate::index::IndexReader;
use crate::query::Query;
use crate::query::collector::{
    Collector, CountCollector, ExistenceCollector, ScoredDoc, SortKey, SortedCollector,
    TopDocsCollector, collect_matches,
};
use crate::query::scorer::ScoringConfig;
use crate::spelling::{Corrector, CorrectorConfig, Suggestion};

/// How to run one search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Maximum number of hits returned.
    pub limit: usize,
    /// Order by a stored field instead of by score.
    pub sort_by: Option<SortKey>,
    /// Stop after `limit` matches without scoring them. `total_hits` then
    /// counts only those matches.
    pub existence_only: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        SearchOptions {
            limit: 10,
            sort_by: None,
            existence_only: false,
        }
    }
}

impl SearchOptions {
    pub fn with_limit(limit: usize) -> Self {
        SearchOptions {
            limit,
            ..Self::default()
        }
    }
}

/// One search result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub doc_id: u64,
    pub score: f32,
    pub stored: StoredDocument,
}

/// The results of one search.
#[derive(Debug, Clone, Default)]
pub struct SearchResults {
    pub hits: Vec<SearchHit>,
    /// Number of matching documents, including those beyond the limit.
    pub total_hits: u64,
}

impl SearchResults {
    pub fn doc_ids(&self) -> Vec<u64> {
        self.hits.iter().map(|h| h.doc_id).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }
}

/// Runs queries and spelling corrections against one reader.
#[derive(Debug)]
pub struct Searcher {
    reader: IndexReader,
    scoring: ScoringConfig,
    corrector_config: CorrectorConfig,
    /// Correctors built so far, per field.
    correctors: Mutex<AHashMap<String, Arc<Corrector>>>,
}

impl Searcher {
    pub fn new(reader: IndexReader) -> Self {
        Searcher {
            reader,
            scoring: ScoringConfig::default(),
            corrector_config: CorrectorConfig::default(),
            correctors: Mutex::new(AHashMap::new()),
        }
    }

    pub fn with_scoring(mut self, scoring: ScoringConfig) -> Self {
        self.scoring = scoring;
        self
    }

    pub fn with_corrector_config(mut self, config: CorrectorConfig) -> Self {
        self.corrector_config = config;
        self.correctors.get_mut().clear();
        self
    }

    pub fn reader(&self) -> &IndexReader {
        &self.reader
    }

    pub fn scoring(&self) -> &ScoringConfig {
        &self.scoring
    }

    /// The `limit` best hits by score.
    pub fn search(&self, query: &Query, limit: usize) -> Result<SearchResults> {
        self.search_with(query, &SearchOptions::with_limit(limit))
    }

    pub fn search_with(&self, query: &Query, options: &SearchOptions) -> Result<SearchResults> {
        let mut matcher = query.matcher(&self.reader, &self.scoring)?;

        let (docs, total_hits) = if options.existence_only {
            let mut collector = ExistenceCollector::new(options.limit);
            collect_matches(&mut matcher, &mut collector)?;
            let total = collector.total_hits();
            (collector.into_docs(), total)
        } else if let Some(key) = &options.sort_by {
            let mut collector = SortedCollector::new(&self.reader, key.clone(), options.limit);
            collect_matches(&mut matcher, &mut collector)?;
            let total = collector.total_hits();
            (collector.into_sorted(), total)
        } else {
            let mut collector = TopDocsCollector::new(options.limit);
            collect_matches(&mut matcher, &mut collector)?;
            let total = collector.total_hits();
            (collector.into_sorted(), total)
        };

        debug!(
            "search at generation {} matched {total_hits} documents, returning {}",
            self.reader.generation(),
            docs.len()
        );
        Ok(SearchResults {
            hits: self.load_hits(docs)?,
            total_hits,
        })
    }

    /// Page `page` (1-based) of `page_len` hits.
    pub fn search_page(&self, query: &Query, page: usize, page_len: usize) -> Result<SearchResults> {
        if page == 0 {
            return Err(LexisError::invalid_operation("page numbers start at 1"));
        }
        let skip = (page - 1).saturating_mul(page_len);
        let mut results = self.search(query, skip.saturating_add(page_len))?;
        results.hits = results.hits.split_off(skip.min(results.hits.len()));
        Ok(results)
    }

    /// Number of documents matching `query`.
    pub fn count(&self, query: &Query) -> Result<u64> {
        let mut matcher = query.matcher(&self.reader, &self.scoring)?;
        let mut collector = CountCollector::new();
        collect_matches(&mut matcher, &mut collector)?;
        Ok(collector.total_hits())
    }

    fn load_hits(&self, docs: Vec<ScoredDoc>) -> Result<Vec<SearchHit>> {
        docs.into_iter()
            .map(|doc| {
                Ok(SearchHit {
                    doc_id: doc.doc_id,
                    score: doc.score,
                    stored: self.reader.stored_fields(doc.doc_id)?,
                })
            })
            .collect()
    }

    fn corrector(&self, field: &str) -> Result<Arc<Corrector>> {
        let mut correctors = self.correctors.lock();
        if let Some(corrector) = correctors.get(field) {
            return Ok(Arc::clone(corrector));
        }
        let corrector = Arc::new(Corrector::build(&self.reader, field, self.corrector_config.clone())?);
        correctors.insert(field.to_string(), Arc::clone(&corrector));
        Ok(corrector)
    }

    /// Terms of `field` close to `word`, nearest first.
    pub fn correct(&self, field: &str, word: &str, limit: usize) -> Result<Vec<Suggestion>> {
        self.corrector(field)?.correct(word, limit)
    }

    /// Like [`Searcher::correct`], returning only the suggested terms.
    pub fn suggest(&self, field: &str, word: &str, limit: usize) -> Result<Vec<String>> {
        Ok(self
            .correct(field, word, limit)?
            .into_iter()
            .map(|s| s.term)
            .collect())
    }
}
