//! Matchers: cursors over the documents matching part of a query.
//!
//! Every matcher walks logical document ids in ascending order and shares
//! one protocol:
//!
//! - `id()` is the current document, `u64::MAX` once exhausted
//! - `next()` moves to the following match
//! - `skip_to(target)` moves to the first match `>= target`; it never goes
//!   backwards and does nothing if already there
//! - `score()` is the relevance of the current document
//!
//! Both return whether the matcher is still positioned on a document. A new
//! matcher is already positioned on its first match. Leaves work on one
//! segment and add the segment's doc base to their ids; a reader-level
//! matcher is an [`OrMatcher`] over the per-segment leaves.
//!
//! Compound matchers only use `skip_to` on their children, so the skip
//! blocks of the posting lists are used all the way up the tree.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;

use crate::codec::PostingDecoder;
use crate::error::{LexisError, Result};
use crate::query::scorer::Bm25Weight;
use crate::segment::SegmentReader;
use crate::segment::term_dict::TermInfo;

/// Id reported by an exhausted matcher.
pub const NO_MORE_DOCS: u64 = u64::MAX;

/// A node of the runtime matcher tree.
#[derive(Debug)]
pub enum Matcher {
    Empty,
    Every(EveryMatcher),
    Term(TermMatcher),
    And(AndMatcher),
    Or(OrMatcher),
    Not(NotMatcher),
    AndMaybe(AndMaybeMatcher),
    Phrase(PhraseMatcher),
    Range(RangeMatcher),
    #[cfg(test)]
    Fixed(tests::FixedMatcher),
}

macro_rules! dispatch {
    ($self:expr, $m:ident => $body:expr, empty => $empty:expr) => {
        match $self {
            Matcher::Empty => $empty,
            Matcher::Every($m) => $body,
            Matcher::Term($m) => $body,
            Matcher::And($m) => $body,
            Matcher::Or($m) => $body,
            Matcher::Not($m) => $body,
            Matcher::AndMaybe($m) => $body,
            Matcher::Phrase($m) => $body,
            Matcher::Range($m) => $body,
            #[cfg(test)]
            Matcher::Fixed($m) => $body,
        }
    };
}

impl Matcher {
    /// Intersection. Any empty child makes the whole intersection empty.
    pub fn and(children: Vec<Matcher>) -> Result<Matcher> {
        if children.is_empty() || children.iter().any(Matcher::is_exhausted) {
            return Ok(Matcher::Empty);
        }
        if children.len() == 1 {
            return Ok(children.into_iter().next().unwrap_or(Matcher::Empty));
        }
        AndMatcher::new(children).map(Matcher::And)
    }

    /// Union. Empty children are dropped.
    pub fn or(children: Vec<Matcher>) -> Matcher {
        let mut children: Vec<Matcher> = children.into_iter().filter(|c| !c.is_exhausted()).collect();
        match children.len() {
            0 => Matcher::Empty,
            1 => children.pop().unwrap_or(Matcher::Empty),
            _ => Matcher::Or(OrMatcher::new(children)),
        }
    }

    /// Documents of `positive` not matched by `excluded`.
    pub fn not(positive: Matcher, excluded: Matcher) -> Result<Matcher> {
        if positive.is_exhausted() {
            return Ok(Matcher::Empty);
        }
        if excluded.is_exhausted() {
            return Ok(positive);
        }
        NotMatcher::new(positive, excluded).map(Matcher::Not)
    }

    /// Documents of `required`, scored with `optional` added where it matches too.
    pub fn and_maybe(required: Matcher, optional: Matcher) -> Result<Matcher> {
        if required.is_exhausted() {
            return Ok(Matcher::Empty);
        }
        if optional.is_exhausted() {
            return Ok(required);
        }
        AndMaybeMatcher::new(required, optional).map(Matcher::AndMaybe)
    }

    pub fn id(&self) -> u64 {
        dispatch!(self, m => m.id(), empty => NO_MORE_DOCS)
    }

    pub fn next(&mut self) -> Result<bool> {
        dispatch!(self, m => m.next(), empty => Ok(false))
    }

    pub fn skip_to(&mut self, target: u64) -> Result<bool> {
        dispatch!(self, m => m.skip_to(target), empty => Ok(false))
    }

    pub fn score(&self) -> f32 {
        dispatch!(self, m => m.score(), empty => 0.0)
    }

    pub fn is_exhausted(&self) -> bool {
        dispatch!(self, m => m.is_exhausted(), empty => true)
    }

    /// Estimated number of matches, used to order intersections.
    pub fn cost(&self) -> u64 {
        dispatch!(self, m => m.cost(), empty => 0)
    }
}

/// Every live document of one segment.
#[derive(Debug)]
pub struct EveryMatcher {
    segment: SegmentReader,
    base: u64,
    current: u32,
    score: f32,
}

impl EveryMatcher {
    pub fn new(segment: SegmentReader, base: u64, score: f32) -> Self {
        let mut matcher = EveryMatcher {
            segment,
            base,
            current: 0,
            score,
        };
        matcher.skip_deleted();
        matcher
    }

    fn skip_deleted(&mut self) {
        while self.current < self.segment.doc_count() && self.segment.is_deleted(self.current) {
            self.current += 1;
        }
    }

    pub fn id(&self) -> u64 {
        if self.is_exhausted() {
            NO_MORE_DOCS
        } else {
            self.base + self.current as u64
        }
    }

    pub fn next(&mut self) -> Result<bool> {
        if self.is_exhausted() {
            return Ok(false);
        }
        self.current += 1;
        self.skip_deleted();
        Ok(!self.is_exhausted())
    }

    pub fn skip_to(&mut self, target: u64) -> Result<bool> {
        if self.is_exhausted() || target <= self.id() {
            return Ok(!self.is_exhausted());
        }
        let local = (target - self.base).min(self.segment.doc_count() as u64);
        self.current = local as u32;
        self.skip_deleted();
        Ok(!self.is_exhausted())
    }

    pub fn score(&self) -> f32 {
        self.score
    }

    pub fn is_exhausted(&self) -> bool {
        self.current >= self.segment.doc_count()
    }

    pub fn cost(&self) -> u64 {
        self.segment.live_doc_count() as u64
    }
}

/// The postings of one term in one segment.
#[derive(Debug)]
pub struct TermMatcher {
    segment: SegmentReader,
    field: Arc<str>,
    base: u64,
    postings: PostingDecoder,
    weight: Bm25Weight,
}

impl TermMatcher {
    pub fn new(
        segment: SegmentReader,
        field: Arc<str>,
        base: u64,
        postings: PostingDecoder,
        weight: Bm25Weight,
    ) -> Result<Self> {
        let mut matcher = TermMatcher {
            segment,
            field,
            base,
            postings,
            weight,
        };
        matcher.skip_deleted()?;
        Ok(matcher)
    }

    fn skip_deleted(&mut self) -> Result<()> {
        while !self.postings.is_exhausted() && self.segment.is_deleted(self.postings.doc_id()) {
            self.postings.next()?;
        }
        Ok(())
    }

    pub fn id(&self) -> u64 {
        if self.postings.is_exhausted() {
            NO_MORE_DOCS
        } else {
            self.base + self.postings.doc_id() as u64
        }
    }

    pub fn next(&mut self) -> Result<bool> {
        if self.postings.is_exhausted() {
            return Ok(false);
        }
        self.postings.next()?;
        self.skip_deleted()?;
        Ok(!self.postings.is_exhausted())
    }

    pub fn skip_to(&mut self, target: u64) -> Result<bool> {
        if self.postings.is_exhausted() || target <= self.id() {
            return Ok(!self.postings.is_exhausted());
        }
        let local = u32::try_from(target - self.base).unwrap_or(u32::MAX);
        self.postings.skip_to(local)?;
        self.skip_deleted()?;
        Ok(!self.postings.is_exhausted())
    }

    /// Occurrences of the term in the current document.
    pub fn freq(&self) -> u32 {
        self.postings.freq()
    }

    /// Positions of the term in the current document.
    pub fn positions(&mut self) -> Result<&[u32]> {
        self.postings.positions()
    }

    fn field_length(&self) -> u32 {
        self.segment.field_length(self.postings.doc_id(), &self.field)
    }

    pub fn score(&self) -> f32 {
        if self.postings.is_exhausted() {
            return 0.0;
        }
        self.weight.score(self.freq(), self.field_length())
    }

    pub fn is_exhausted(&self) -> bool {
        self.postings.is_exhausted()
    }

    pub fn cost(&self) -> u64 {
        self.postings.len()
    }
}

/// Documents matched by all children.
#[derive(Debug)]
pub struct AndMatcher {
    /// Cheapest child first; it leads the intersection.
    children: Vec<Matcher>,
}

impl AndMatcher {
    fn new(mut children: Vec<Matcher>) -> Result<Self> {
        children.sort_by_key(Matcher::cost);
        let mut matcher = AndMatcher { children };
        matcher.align()?;
        Ok(matcher)
    }

    /// Leapfrog until every child sits on the same document.
    fn align(&mut self) -> Result<bool> {
        let (lead, rest) = match self.children.split_first_mut() {
            Some(split) => split,
            None => return Ok(false),
        };
        'outer: loop {
            if lead.is_exhausted() {
                return Ok(false);
            }
            let target = lead.id();
            for child in rest.iter_mut() {
                if !child.skip_to(target)? {
                    return Ok(false);
                }
                if child.id() > target {
                    if !lead.skip_to(child.id())? {
                        return Ok(false);
                    }
                    continue 'outer;
                }
            }
            return Ok(true);
        }
    }

    pub fn id(&self) -> u64 {
        if self.is_exhausted() {
            NO_MORE_DOCS
        } else {
            self.children[0].id()
        }
    }

    pub fn next(&mut self) -> Result<bool> {
        if self.is_exhausted() {
            return Ok(false);
        }
        self.children[0].next()?;
        self.align()
    }

    pub fn skip_to(&mut self, target: u64) -> Result<bool> {
        if self.is_exhausted() {
            return Ok(false);
        }
        if target <= self.id() {
            return Ok(true);
        }
        self.children[0].skip_to(target)?;
        self.align()
    }

    pub fn score(&self) -> f32 {
        self.children.iter().map(Matcher::score).sum()
    }

    pub fn is_exhausted(&self) -> bool {
        self.children.iter().any(Matcher::is_exhausted)
    }

    pub fn cost(&self) -> u64 {
        self.children.iter().map(Matcher::cost).min().unwrap_or(0)
    }
}

/// Documents matched by any child; scores of the matching children add up.
#[derive(Debug)]
pub struct OrMatcher {
    children: Vec<Matcher>,
    /// (current id, child index) of every child not yet exhausted.
    heap: BinaryHeap<Reverse<(u64, usize)>>,
}

impl OrMatcher {
    fn new(children: Vec<Matcher>) -> Self {
        let heap = children
            .iter()
            .enumerate()
            .filter(|(_, child)| !child.is_exhausted())
            .map(|(idx, child)| Reverse((child.id(), idx)))
            .collect();
        OrMatcher { children, heap }
    }

    pub fn id(&self) -> u64 {
        self.heap.peek().map_or(NO_MORE_DOCS, |Reverse((id, _))| *id)
    }

    pub fn next(&mut self) -> Result<bool> {
        let current = self.id();
        if current == NO_MORE_DOCS {
            return Ok(false);
        }
        while let Some(&Reverse((id, idx))) = self.heap.peek() {
            if id != current {
                break;
            }
            self.heap.pop();
            let child = &mut self.children[idx];
            if child.next()? {
                self.heap.push(Reverse((child.id(), idx)));
            }
        }
        Ok(!self.heap.is_empty())
    }

    pub fn skip_to(&mut self, target: u64) -> Result<bool> {
        while let Some(&Reverse((id, idx))) = self.heap.peek() {
            if id >= target {
                break;
            }
            self.heap.pop();
            let child = &mut self.children[idx];
            if child.skip_to(target)? {
                self.heap.push(Reverse((child.id(), idx)));
            }
        }
        Ok(!self.heap.is_empty())
    }

    pub fn score(&self) -> f32 {
        let current = self.id();
        self.heap
            .iter()
            .filter(|Reverse((id, _))| *id == current)
            .map(|Reverse((_, idx))| self.children[*idx].score())
            .sum()
    }

    pub fn is_exhausted(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn cost(&self) -> u64 {
        self.children.iter().map(Matcher::cost).sum()
    }
}

/// Documents of a positive matcher that the excluded matcher does not match.
#[derive(Debug)]
pub struct NotMatcher {
    positive: Box<Matcher>,
    excluded: Box<Matcher>,
}

impl NotMatcher {
    fn new(positive: Matcher, excluded: Matcher) -> Result<Self> {
        let mut matcher = NotMatcher {
            positive: Box::new(positive),
            excluded: Box::new(excluded),
        };
        matcher.skip_excluded()?;
        Ok(matcher)
    }

    fn skip_excluded(&mut self) -> Result<bool> {
        while !self.positive.is_exhausted() {
            let id = self.positive.id();
            self.excluded.skip_to(id)?;
            if self.excluded.id() != id {
                return Ok(true);
            }
            self.positive.next()?;
        }
        Ok(false)
    }

    pub fn id(&self) -> u64 {
        self.positive.id()
    }

    pub fn next(&mut self) -> Result<bool> {
        self.positive.next()?;
        self.skip_excluded()
    }

    pub fn skip_to(&mut self, target: u64) -> Result<bool> {
        self.positive.skip_to(target)?;
        self.skip_excluded()
    }

    pub fn score(&self) -> f32 {
        self.positive.score()
    }

    pub fn is_exhausted(&self) -> bool {
        self.positive.is_exhausted()
    }

    pub fn cost(&self) -> u64 {
        self.positive.cost()
    }
}

/// Documents of a required matcher; an optional matcher only adds score.
#[derive(Debug)]
pub struct AndMaybeMatcher {
    required: Box<Matcher>,
    optional: Box<Matcher>,
}

impl AndMaybeMatcher {
    fn new(required: Matcher, optional: Matcher) -> Result<Self> {
        let mut matcher = AndMaybeMatcher {
            required: Box::new(required),
            optional: Box::new(optional),
        };
        matcher.sync_optional()?;
        Ok(matcher)
    }

    fn sync_optional(&mut self) -> Result<bool> {
        if self.required.is_exhausted() {
            return Ok(false);
        }
        self.optional.skip_to(self.required.id())?;
        Ok(true)
    }

    pub fn id(&self) -> u64 {
        self.required.id()
    }

    pub fn next(&mut self) -> Result<bool> {
        self.required.next()?;
        self.sync_optional()
    }

    pub fn skip_to(&mut self, target: u64) -> Result<bool> {
        self.required.skip_to(target)?;
        self.sync_optional()
    }

    pub fn score(&self) -> f32 {
        let mut score = self.required.score();
        if !self.required.is_exhausted() && self.optional.id() == self.required.id() {
            score += self.optional.score();
        }
        score
    }

    pub fn is_exhausted(&self) -> bool {
        self.required.is_exhausted()
    }

    pub fn cost(&self) -> u64 {
        self.required.cost()
    }
}

/// Documents of one segment where the terms occur in order, within `slop`.
///
/// With the terms at positions `p_i` and `i` their place in the phrase, a
/// document matches where `max(p_i - i) - min(p_i - i) <= slop`; slop 0
/// means the terms are adjacent and in order. The number of such windows is
/// the phrase frequency used for scoring.
#[derive(Debug)]
pub struct PhraseMatcher {
    terms: Vec<TermMatcher>,
    slop: u32,
    weight: Bm25Weight,
    segment: SegmentReader,
    field: Arc<str>,
    phrase_freq: u32,
}

impl PhraseMatcher {
    pub fn new(
        terms: Vec<TermMatcher>,
        slop: u32,
        segment: SegmentReader,
        field: Arc<str>,
        weight: Bm25Weight,
    ) -> Result<Self> {
        let mut matcher = PhraseMatcher {
            terms,
            slop,
            weight,
            segment,
            field,
            phrase_freq: 0,
        };
        matcher.find_match()?;
        Ok(matcher)
    }

    /// Align the terms on a document, then check their positions; repeat
    /// until a document has the phrase.
    fn find_match(&mut self) -> Result<bool> {
        loop {
            let mut target = 0;
            for term in &self.terms {
                if term.is_exhausted() {
                    return Ok(false);
                }
                target = target.max(term.id());
            }

            let mut aligned = true;
            for term in &mut self.terms {
                if !term.skip_to(target)? {
                    return Ok(false);
                }
                aligned &= term.id() == target;
            }
            if !aligned {
                continue;
            }

            let freq = self.current_phrase_freq()?;
            if freq > 0 {
                self.phrase_freq = freq;
                return Ok(true);
            }
            self.terms[0].next()?;
        }
    }

    fn current_phrase_freq(&mut self) -> Result<u32> {
        let mut lists = Vec::with_capacity(self.terms.len());
        for (offset, term) in self.terms.iter_mut().enumerate() {
            let shifted: Vec<i64> = term
                .positions()?
                .iter()
                .map(|&p| p as i64 - offset as i64)
                .collect();
            lists.push(shifted);
        }
        Ok(sloppy_freq(&lists, self.slop))
    }

    pub fn id(&self) -> u64 {
        if self.is_exhausted() {
            NO_MORE_DOCS
        } else {
            self.terms[0].id()
        }
    }

    pub fn next(&mut self) -> Result<bool> {
        if self.is_exhausted() {
            return Ok(false);
        }
        self.terms[0].next()?;
        self.find_match()
    }

    pub fn skip_to(&mut self, target: u64) -> Result<bool> {
        if self.is_exhausted() {
            return Ok(false);
        }
        if target <= self.id() {
            return Ok(true);
        }
        self.terms[0].skip_to(target)?;
        self.find_match()
    }

    pub fn score(&self) -> f32 {
        if self.is_exhausted() {
            return 0.0;
        }
        let local = self.terms[0].postings.doc_id();
        self.weight
            .score(self.phrase_freq, self.segment.field_length(local, &self.field))
    }

    pub fn is_exhausted(&self) -> bool {
        self.terms.is_empty() || self.terms.iter().any(TermMatcher::is_exhausted)
    }

    pub fn cost(&self) -> u64 {
        self.terms.iter().map(TermMatcher::cost).min().unwrap_or(0)
    }
}

/// Number of windows, one position from each sorted list, spanning at
/// most `slop`. List `i` holds positions shifted down by `i`; a window
/// whose unshifted positions collide is not a match.
fn sloppy_freq(lists: &[Vec<i64>], slop: u32) -> u32 {
    if lists.is_empty() || lists.iter().any(Vec::is_empty) {
        return 0;
    }
    let mut cursors = vec![0usize; lists.len()];
    let mut raw = Vec::with_capacity(lists.len());
    let mut count = 0;

    loop {
        let mut min_list = 0;
        let mut min = i64::MAX;
        let mut max = i64::MIN;
        for (list_idx, list) in lists.iter().enumerate() {
            let value = list[cursors[list_idx]];
            if value < min {
                min = value;
                min_list = list_idx;
            }
            max = max.max(value);
        }

        if max - min <= slop as i64 {
            raw.clear();
            raw.extend(
                lists
                    .iter()
                    .enumerate()
                    .map(|(list_idx, list)| list[cursors[list_idx]] + list_idx as i64),
            );
            raw.sort_unstable();
            if raw.windows(2).all(|pair| pair[0] != pair[1]) {
                count += 1;
            }
        }

        cursors[min_list] += 1;
        if cursors[min_list] == lists[min_list].len() {
            return count;
        }
    }
}

/// A range term whose posting list is opened on first use.
#[derive(Debug)]
enum RangeTerm {
    Pending {
        first_doc: u32,
        offset: u64,
        len: u64,
        weight: Bm25Weight,
    },
    Open(TermMatcher),
}

/// The union of a run of dictionary terms in one segment.
///
/// Each term waits in the heap keyed by the first doc id recorded in the
/// dictionary. Its posting list is opened only when that key reaches the
/// front of the heap or a `skip_to` passes it. Heap entries are
/// `(id, opened, slot)`, so an unopened term sorts before an open one with
/// the same id and the front entry, once open, is a true minimum.
#[derive(Debug)]
pub struct RangeMatcher {
    segment: SegmentReader,
    field: Arc<str>,
    base: u64,
    terms: Vec<RangeTerm>,
    heap: BinaryHeap<Reverse<(u64, bool, usize)>>,
    cost: u64,
}

impl RangeMatcher {
    pub fn new<'a, I>(segment: SegmentReader, field: Arc<str>, base: u64, terms: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a TermInfo, Bm25Weight)>,
    {
        let mut slots = Vec::new();
        let mut heap = BinaryHeap::new();
        let mut cost = 0;
        for (info, weight) in terms {
            heap.push(Reverse((base + info.first_doc as u64, false, slots.len())));
            slots.push(RangeTerm::Pending {
                first_doc: info.first_doc,
                offset: info.offset,
                len: info.len,
                weight,
            });
            cost += info.doc_freq as u64;
        }

        let mut matcher = RangeMatcher {
            segment,
            field,
            base,
            terms: slots,
            heap,
            cost,
        };
        matcher.settle(0)?;
        Ok(matcher)
    }

    /// Open the term in `slot`, position it on its first match `>= target`
    /// and put it back in the heap unless it is exhausted.
    fn open(&mut self, slot: usize, target: u64) -> Result<()> {
        let (first_doc, offset, len, weight) = match &self.terms[slot] {
            RangeTerm::Pending {
                first_doc,
                offset,
                len,
                weight,
            } => (*first_doc, *offset, *len, *weight),
            RangeTerm::Open(_) => return Ok(()),
        };
        let postings = self.segment.decoder_at(offset, len)?;
        if postings.is_empty() || postings.doc_id() != first_doc {
            return Err(LexisError::corrupt(format!(
                "segment {}: posting list does not start at doc {first_doc}",
                self.segment.id()
            )));
        }
        let mut matcher = TermMatcher::new(self.segment.clone(), Arc::clone(&self.field), self.base, postings, weight)?;
        if matcher.skip_to(target)? {
            self.heap.push(Reverse((matcher.id(), true, slot)));
        }
        self.terms[slot] = RangeTerm::Open(matcher);
        Ok(())
    }

    /// Open pending terms until the front of the heap is an open term.
    fn settle(&mut self, target: u64) -> Result<()> {
        while let Some(&Reverse((_, false, slot))) = self.heap.peek() {
            self.heap.pop();
            self.open(slot, target)?;
        }
        Ok(())
    }

    pub fn id(&self) -> u64 {
        self.heap.peek().map_or(NO_MORE_DOCS, |Reverse((id, _, _))| *id)
    }

    pub fn next(&mut self) -> Result<bool> {
        let current = self.id();
        if current == NO_MORE_DOCS {
            return Ok(false);
        }
        while let Some(&Reverse((id, _, slot))) = self.heap.peek() {
            if id != current {
                break;
            }
            self.heap.pop();
            if let RangeTerm::Open(matcher) = &mut self.terms[slot]
                && matcher.next()?
            {
                self.heap.push(Reverse((matcher.id(), true, slot)));
            }
        }
        self.settle(current + 1)?;
        Ok(!self.heap.is_empty())
    }

    pub fn skip_to(&mut self, target: u64) -> Result<bool> {
        while let Some(&Reverse((id, opened, slot))) = self.heap.peek() {
            if id >= target {
                break;
            }
            self.heap.pop();
            if !opened {
                self.open(slot, target)?;
            } else if let RangeTerm::Open(matcher) = &mut self.terms[slot]
                && matcher.skip_to(target)?
            {
                self.heap.push(Reverse((matcher.id(), true, slot)));
            }
        }
        self.settle(target)?;
        Ok(!self.heap.is_empty())
    }

    pub fn score(&self) -> f32 {
        let current = self.id();
        self.heap
            .iter()
            .filter(|Reverse((id, _, _))| *id == current)
            .filter_map(|Reverse((_, _, slot))| match &self.terms[*slot] {
                RangeTerm::Open(matcher) => Some(matcher.score()),
                RangeTerm::Pending { .. } => None,
            })
            .sum()
    }

    pub fn is_exhausted(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn cost(&self) -> u64 {
        self.cost
    }

    /// Number of terms whose posting list has been opened.
    #[cfg(test)]
    pub(crate) fn opened_terms(&self) -> usize {
        self.terms
            .iter()
            .filter(|term| matches!(term, RangeTerm::Open(_)))
            .count()
    }
}
