//! Collectors consume a matcher in doc-id order and keep what the caller
//! asked for.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fmt::Debug;

use serde::{Deserialize, Serialize};

use crate::document::FieldValue;
use crate::error::Result;
use crate::index::IndexReader;
use crate::query::matcher::Matcher;

/// A matched document and its score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredDoc {
    pub doc_id: u64,
    pub score: f32,
}

/// Trait for collecting search results.
pub trait Collector: Send + Debug {
    /// Collect a document hit.
    fn collect(&mut self, doc_id: u64, score: f32) -> Result<()>;

    /// Number of documents collected so far.
    fn total_hits(&self) -> u64;

    /// Whether scores are needed; if not, every hit is collected with 0.0.
    fn needs_scores(&self) -> bool {
        true
    }

    /// Whether the collector wants more documents.
    fn needs_more(&self) -> bool {
        true
    }
}

/// Feed every document of `matcher` to `collector`, stopping early once the
/// collector has enough.
pub fn collect_matches<C: Collector + ?Sized>(matcher: &mut Matcher, collector: &mut C) -> Result<()> {
    let scores = collector.needs_scores();
    while !matcher.is_exhausted() && collector.needs_more() {
        let score = if scores { matcher.score() } else { 0.0 };
        collector.collect(matcher.id(), score)?;
        matcher.next()?;
    }
    Ok(())
}

/// Heap entry: a better hit compares greater. Higher score wins, then the
/// lower doc id.
#[derive(Debug, Clone, Copy)]
struct Ranked(ScoredDoc);

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .score
            .total_cmp(&other.0.score)
            .then_with(|| other.0.doc_id.cmp(&self.0.doc_id))
    }
}

/// Keeps the `limit` best documents by score.
#[derive(Debug)]
pub struct TopDocsCollector {
    limit: usize,
    /// Min-heap of the best hits; the root is the worst one kept.
    hits: BinaryHeap<Reverse<Ranked>>,
    total_hits: u64,
}

impl TopDocsCollector {
    pub fn new(limit: usize) -> Self {
        TopDocsCollector {
            limit,
            hits: BinaryHeap::with_capacity(limit.min(1024)),
            total_hits: 0,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// The kept hits, best first.
    pub fn into_sorted(self) -> Vec<ScoredDoc> {
        let mut ranked: Vec<Ranked> = self.hits.into_iter().map(|Reverse(r)| r).collect();
        ranked.sort_by(|a, b| b.cmp(a));
        ranked.into_iter().map(|r| r.0).collect()
    }
}

impl Collector for TopDocsCollector {
    fn collect(&mut self, doc_id: u64, score: f32) -> Result<()> {
        self.total_hits += 1;
        if self.limit == 0 {
            return Ok(());
        }

        let candidate = Ranked(ScoredDoc { doc_id, score });
        if self.hits.len() < self.limit {
            self.hits.push(Reverse(candidate));
        } else if let Some(mut worst) = self.hits.peek_mut()
            && candidate > worst.0
        {
            *worst = Reverse(candidate);
        }
        Ok(())
    }

    fn total_hits(&self) -> u64 {
        self.total_hits
    }
}

/// Counts matches without keeping them.
#[derive(Debug, Default)]
pub struct CountCollector {
    count: u64,
}

impl CountCollector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Collector for CountCollector {
    fn collect(&mut self, _doc_id: u64, _score: f32) -> Result<()> {
        self.count += 1;
        Ok(())
    }

    fn total_hits(&self) -> u64 {
        self.count
    }

    fn needs_scores(&self) -> bool {
        false
    }
}

/// The first `limit` matches in doc-id order, unscored.
#[derive(Debug)]
pub struct ExistenceCollector {
    limit: usize,
    docs: Vec<u64>,
}

impl ExistenceCollector {
    pub fn new(limit: usize) -> Self {
        ExistenceCollector {
            limit,
            docs: Vec::with_capacity(limit.min(1024)),
        }
    }

    pub fn into_docs(self) -> Vec<ScoredDoc> {
        self.docs
            .into_iter()
            .map(|doc_id| ScoredDoc { doc_id, score: 0.0 })
            .collect()
    }
}

impl Collector for ExistenceCollector {
    fn collect(&mut self, doc_id: u64, _score: f32) -> Result<()> {
        if self.docs.len() < self.limit {
            self.docs.push(doc_id);
        }
        Ok(())
    }

    fn total_hits(&self) -> u64 {
        self.docs.len() as u64
    }

    fn needs_scores(&self) -> bool {
        false
    }

    fn needs_more(&self) -> bool {
        self.docs.len() < self.limit
    }
}

/// Stored field to order results by instead of score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    pub descending: bool,
}

impl SortKey {
    pub fn ascending(field: impl Into<String>) -> Self {
        SortKey {
            field: field.into(),
            descending: false,
        }
    }

    pub fn descending(field: impl Into<String>) -> Self {
        SortKey {
            field: field.into(),
            descending: true,
        }
    }

    /// Order of two sort values. Documents without a value go last in
    /// both directions.
    fn compare(&self, a: &Option<FieldValue>, b: &Option<FieldValue>) -> Ordering {
        match (a, b) {
            (Some(a), Some(b)) if self.descending => b.sort_cmp(a),
            (Some(a), Some(b)) => a.sort_cmp(b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }
}

#[derive(Debug)]
struct SortEntry {
    value: Option<FieldValue>,
    doc: ScoredDoc,
}

/// Keeps the first `limit` documents ordered by a stored field, ties by
/// ascending doc id.
#[derive(Debug)]
pub struct SortedCollector<'a> {
    reader: &'a IndexReader,
    key: SortKey,
    limit: usize,
    entries: Vec<SortEntry>,
    total_hits: u64,
}

impl<'a> SortedCollector<'a> {
    pub fn new(reader: &'a IndexReader, key: SortKey, limit: usize) -> Self {
        SortedCollector {
            reader,
            key,
            limit,
            entries: Vec::new(),
            total_hits: 0,
        }
    }

    fn sort_and_truncate(&mut self) {
        let key = &self.key;
        self.entries.sort_by(|a, b| {
            key.compare(&a.value, &b.value)
                .then_with(|| a.doc.doc_id.cmp(&b.doc.doc_id))
        });
        self.entries.truncate(self.limit);
    }

    pub fn into_sorted(mut self) -> Vec<ScoredDoc> {
        self.sort_and_truncate();
        self.entries.into_iter().map(|e| e.doc).collect()
    }
}

impl Collector for SortedCollector<'_> {
    fn collect(&mut self, doc_id: u64, score: f32) -> Result<()> {
        self.total_hits += 1;
        if self.limit == 0 {
            return Ok(());
        }
        let value = self
            .reader
            .stored_fields(doc_id)?
            .get(&self.key.field)
            .cloned();
        self.entries.push(SortEntry {
            value,
            doc: ScoredDoc { doc_id, score },
        });
        if self.entries.len() >= self.limit.saturating_mul(2).max(64) {
            self.sort_and_truncate();
        }
        Ok(())
    }

    fn total_hits(&self) -> u64 {
        self.total_hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_docs_keeps_best() {
        let mut collector = TopDocsCollector::new(3);
        for (doc_id, score) in [(0, 1.0), (1, 5.0), (2, 3.0), (3, 5.0), (4, 0.5), (5, 4.0)] {
            collector.collect(doc_id, score).unwrap();
        }
        assert_eq!(collector.total_hits(), 6);

        let ids: Vec<u64> = collector.into_sorted().iter().map(|d| d.doc_id).collect();
        assert_eq!(ids, vec![1, 3, 5]);
    }

    #[test]
    fn test_top_docs_ties_prefer_lower_ids() {
        let mut collector = TopDocsCollector::new(2);
        for doc_id in [7, 3, 9, 1] {
            collector.collect(doc_id, 2.0).unwrap();
        }
        let ids: Vec<u64> = collector.into_sorted().iter().map(|d| d.doc_id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn test_zero_limit_still_counts() {
        let mut collector = TopDocsCollector::new(0);
        collector.collect(1, 1.0).unwrap();
        assert_eq!(collector.total_hits(), 1);
        assert!(collector.into_sorted().is_empty());
    }

    #[test]
    fn test_existence_stops_at_limit() {
        let mut collector = ExistenceCollector::new(2);
        assert!(collector.needs_more());
        collector.collect(4, 9.0).unwrap();
        collector.collect(6, 9.0).unwrap();
        assert!(!collector.needs_more());
        assert!(!collector.needs_scores());

        let docs = collector.into_docs();
        assert_eq!(docs, vec![ScoredDoc { doc_id: 4, score: 0.0 }, ScoredDoc { doc_id: 6, score: 0.0 }]);
    }

    #[test]
    fn test_sort_key_puts_missing_last() {
        let asc = SortKey::ascending("n");
        let desc = SortKey::descending("n");
        let one = Some(FieldValue::U64(1));
        let two = Some(FieldValue::U64(2));

        assert_eq!(asc.compare(&one, &two), Ordering::Less);
        assert_eq!(desc.compare(&one, &two), Ordering::Greater);
        assert_eq!(asc.compare(&one, &None), Ordering::Less);
        assert_eq!(desc.compare(&one, &None), Ordering::Less);
    }
}
