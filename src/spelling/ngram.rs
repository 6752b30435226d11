//! N-gram index over a term list.
//!
//! Each term is padded with `n - 1` boundary markers on both sides and cut
//! into every substring of `n` characters. For every gram the index keeps
//! the ordinals of the terms containing it, encoded with the posting codec
//! into one shared byte arena.

use std::collections::hash_map::Entry;
use std::sync::Arc;

use ahash::AHashMap;

use crate::codec::{DEFAULT_BLOCK_SIZE, PostingDecoder, PostingWriter};
use crate::error::{LexisError, Result};

/// Character used to pad both ends of a term.
pub const PAD: char = '$';

/// The grams of `word`, in order, duplicates included.
pub fn grams(word: &str, n: usize) -> Vec<String> {
    if n == 0 || word.is_empty() {
        return Vec::new();
    }
    let padding = std::iter::repeat_n(PAD, n - 1);
    let chars: Vec<char> = padding
        .clone()
        .chain(word.chars())
        .chain(padding)
        .collect();
    chars.windows(n).map(|w| w.iter().collect()).collect()
}

/// Gram to term-ordinal lists.
#[derive(Debug)]
pub struct NgramIndex {
    gram_size: usize,
    arena: Arc<[u8]>,
    /// Byte range of each gram's list in `arena`.
    lists: AHashMap<String, (usize, usize)>,
}

impl NgramIndex {
    /// Index `terms`; a term's ordinal is its position in the iterator.
    pub fn build<'a, I>(terms: I, gram_size: usize) -> Result<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        if gram_size == 0 {
            return Err(LexisError::invalid_operation("gram size must be at least 1"));
        }

        let mut writers: AHashMap<String, PostingWriter> = AHashMap::new();
        for (ordinal, term) in terms.into_iter().enumerate() {
            let ordinal = u32::try_from(ordinal)
                .map_err(|_| LexisError::invalid_operation("too many terms for an n-gram index"))?;

            let mut counts: AHashMap<String, u32> = AHashMap::new();
            for gram in grams(term, gram_size) {
                *counts.entry(gram).or_insert(0) += 1;
            }
            for (gram, count) in counts {
                let writer = match writers.entry(gram) {
                    Entry::Occupied(entry) => entry.into_mut(),
                    Entry::Vacant(entry) => entry.insert(PostingWriter::new(false, DEFAULT_BLOCK_SIZE)?),
                };
                writer.add(ordinal, count, &[])?;
            }
        }

        let mut arena = Vec::new();
        let mut lists = AHashMap::with_capacity(writers.len());
        for (gram, writer) in writers {
            let start = arena.len();
            arena.extend_from_slice(&writer.finish());
            lists.insert(gram, (start, arena.len()));
        }

        Ok(NgramIndex {
            gram_size,
            arena: Arc::from(arena),
            lists,
        })
    }

    pub fn gram_size(&self) -> usize {
        self.gram_size
    }

    /// Number of distinct grams.
    pub fn len(&self) -> usize {
        self.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }

    /// Cursor over the ordinals of the terms containing `gram`; the
    /// posting frequency is how often the gram occurs in the term.
    pub fn postings(&self, gram: &str) -> Result<Option<PostingDecoder>> {
        match self.lists.get(gram) {
            Some(&(start, end)) => PostingDecoder::new(Arc::clone(&self.arena), start, end).map(Some),
            None => Ok(None),
        }
    }

    /// Number of grams each term shares with `word`, counting repeated
    /// grams at most as often as they occur in both.
    pub fn overlaps(&self, word: &str) -> Result<AHashMap<u32, u32>> {
        let mut wanted: AHashMap<String, u32> = AHashMap::new();
        for gram in grams(word, self.gram_size) {
            *wanted.entry(gram).or_insert(0) += 1;
        }

        let mut overlaps: AHashMap<u32, u32> = AHashMap::new();
        for (gram, count) in wanted {
            let Some(mut postings) = self.postings(&gram)? else {
                continue;
            };
            while !postings.is_exhausted() {
                *overlaps.entry(postings.doc_id()).or_insert(0) += count.min(postings.freq());
                postings.next()?;
            }
        }
        Ok(overlaps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grams_are_padded() {
        assert_eq!(grams("ab", 3), vec!["$$a", "$ab", "ab$", "b$$"]);
        assert_eq!(grams("ab", 1), vec!["a", "b"]);
        assert!(grams("", 3).is_empty());
        assert_eq!(grams("é", 2), vec!["$é", "é$"]);
    }

    #[test]
    fn test_overlaps() {
        let index = NgramIndex::build(["whoosh", "swoosh", "apple"], 3).unwrap();
        assert!(!index.is_empty());

        let overlaps = index.overlaps("whoosj").unwrap();
        // $$w $wh who hoo oos
        assert_eq!(overlaps.get(&0), Some(&5));
        // oos
        assert_eq!(overlaps.get(&1), Some(&1));
        assert_eq!(overlaps.get(&2), None);

        let mut postings = index.postings("oos").unwrap().unwrap();
        assert_eq!(postings.doc_id(), 0);
        postings.next().unwrap();
        assert_eq!(postings.doc_id(), 1);
        assert!(index.postings("zzz").unwrap().is_none());
    }
}
