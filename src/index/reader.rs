//! Read access to one commit of an index.
//!
//! An [`IndexReader`] pins the snapshot it was opened on. Logical document
//! ids are the concatenation of the segments' local ids in manifest order;
//! later commits are invisible until [`IndexReader::reopen`] is called.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::ops::Bound;
use std::sync::Arc;

use crate::document::StoredDocument;
use crate::error::{LexisError, Result};
use crate::index::{IndexShared, Snapshot};
use crate::query::Query;
use crate::query::matcher::Matcher;
use crate::query::scorer::ScoringConfig;
use crate::schema::Schema;
use crate::segment::SegmentReader;
use crate::segment::term_dict::TermInfo;

/// One term of a field, with statistics summed over all segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexiconEntry {
    pub text: String,
    pub doc_freq: u64,
    pub total_freq: u64,
}

/// Reader over an immutable snapshot of the index.
#[derive(Debug, Clone)]
pub struct IndexReader {
    shared: Arc<IndexShared>,
    snapshot: Arc<Snapshot>,
}

impl IndexReader {
    pub(crate) fn new(shared: Arc<IndexShared>, snapshot: Arc<Snapshot>) -> Self {
        IndexReader { shared, snapshot }
    }

    /// A reader on the newest commit. The current reader is unaffected.
    pub fn reopen(&self) -> Result<IndexReader> {
        let snapshot = self.shared.refresh()?;
        Ok(IndexReader::new(Arc::clone(&self.shared), snapshot))
    }

    pub fn generation(&self) -> u64 {
        self.snapshot.generation()
    }

    pub fn schema(&self) -> &Schema {
        self.snapshot.schema()
    }

    pub fn snapshot(&self) -> &Arc<Snapshot> {
        &self.snapshot
    }

    pub fn segments(&self) -> &[SegmentReader] {
        self.snapshot.segments()
    }

    /// Number of live documents.
    pub fn doc_count(&self) -> u64 {
        self.snapshot.live_doc_count()
    }

    /// One past the largest logical id, deleted documents included.
    pub fn max_doc(&self) -> u64 {
        self.snapshot.max_doc()
    }

    fn locate(&self, doc_id: u64) -> Result<(&SegmentReader, u32)> {
        let (ordinal, local) = self.snapshot.locate(doc_id).ok_or_else(|| {
            LexisError::invalid_operation(format!(
                "doc id {doc_id} out of range (max doc {})",
                self.max_doc()
            ))
        })?;
        Ok((&self.snapshot.segments()[ordinal], local))
    }

    pub fn is_deleted(&self, doc_id: u64) -> Result<bool> {
        let (segment, local) = self.locate(doc_id)?;
        Ok(segment.is_deleted(local))
    }

    /// Stored fields of a live document.
    pub fn stored_fields(&self, doc_id: u64) -> Result<StoredDocument> {
        let (segment, local) = self.locate(doc_id)?;
        segment.stored_fields(local)
    }

    /// Number of tokens indexed for `field` in a document.
    pub fn field_length(&self, doc_id: u64, field: &str) -> Result<u32> {
        let (segment, local) = self.locate(doc_id)?;
        Ok(segment.field_length(local, field))
    }

    /// Number of documents containing `field:text`, summed over segments.
    /// Deleted documents still count until their segment is merged away.
    pub fn doc_frequency(&self, field: &str, text: &str) -> u64 {
        self.segments()
            .iter()
            .filter_map(|s| s.term_info(field, text))
            .map(|info| info.doc_freq as u64)
            .sum()
    }

    pub fn total_term_frequency(&self, field: &str, text: &str) -> u64 {
        self.segments()
            .iter()
            .filter_map(|s| s.term_info(field, text))
            .map(|info| info.total_freq)
            .sum()
    }

    /// Mean length of `field` over all documents; 1.0 for an empty field.
    pub fn avg_field_length(&self, field: &str) -> f32 {
        let total: u64 = self
            .segments()
            .iter()
            .map(|s| s.total_field_length(field))
            .sum();
        if total == 0 || self.max_doc() == 0 {
            1.0
        } else {
            total as f32 / self.max_doc() as f32
        }
    }

    /// Matcher over the documents containing `field:text`, as one logical
    /// stream over every segment.
    pub fn postings(&self, field: &str, text: &str) -> Result<Matcher> {
        Query::term(field, text).matcher(self, &ScoringConfig::default())
    }

    /// Every term of `field` in byte order, each once.
    pub fn lexicon<'a>(&'a self, field: &'a str) -> Lexicon<'a> {
        self.terms_in_range(field, Bound::Unbounded, Bound::Unbounded)
    }

    /// Terms of `field` within the bounds, in byte order, each once.
    pub fn terms_in_range<'a>(
        &'a self,
        field: &'a str,
        lower: Bound<&'a str>,
        upper: Bound<&'a str>,
    ) -> Lexicon<'a> {
        let sources = self
            .segments()
            .iter()
            .map(|segment| segment.terms_in_range(field, lower, upper))
            .collect();
        Lexicon::new(sources)
    }
}

type TermSource<'a> = Box<dyn Iterator<Item = &'a TermInfo> + 'a>;

/// K-way merge of per-segment term dictionaries.
pub struct Lexicon<'a> {
    sources: Vec<TermSource<'a>>,
    heads: Vec<Option<&'a TermInfo>>,
    heap: BinaryHeap<Reverse<(&'a str, usize)>>,
}

impl<'a> Lexicon<'a> {
    fn new(mut sources: Vec<TermSource<'a>>) -> Self {
        let mut heads = Vec::with_capacity(sources.len());
        let mut heap = BinaryHeap::with_capacity(sources.len());
        for (idx, source) in sources.iter_mut().enumerate() {
            let head = source.next();
            if let Some(info) = head {
                heap.push(Reverse((info.text.as_str(), idx)));
            }
            heads.push(head);
        }
        Lexicon {
            sources,
            heads,
            heap,
        }
    }

    fn advance(&mut self, idx: usize) {
        let head = self.sources[idx].next();
        if let Some(info) = head {
            self.heap.push(Reverse((info.text.as_str(), idx)));
        }
        self.heads[idx] = head;
    }
}

impl Iterator for Lexicon<'_> {
    type Item = LexiconEntry;

    fn next(&mut self) -> Option<LexiconEntry> {
        let Reverse((text, idx)) = self.heap.pop()?;
        let mut entry = LexiconEntry {
            text: text.to_string(),
            doc_freq: 0,
            total_freq: 0,
        };

        let mut pending = vec![idx];
        while let Some(Reverse((next_text, next_idx))) = self.heap.peek().copied() {
            if next_text != text {
                break;
            }
            self.heap.pop();
            pending.push(next_idx);
        }

        for idx in pending {
            if let Some(info) = self.heads[idx] {
                entry.doc_freq += info.doc_freq as u64;
                entry.total_freq += info.total_freq;
            }
            self.advance(idx);
        }
        Some(entry)
    }
}

impl std::fmt::Debug for Lexicon<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lexicon")
            .field("sources", &self.sources.len())
            .field("pending", &self.heap.len())
            .finish()
    }
}
