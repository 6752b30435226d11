//! Posting list codec.
//!
//! A posting list is encoded as:
//!
//! ```text
//! varint count | u8 flags | varint block_count | block*
//! block := varint n | varint max_id_delta | varint body_len | body
//! body  := n doc deltas | n freqs | (positions: per posting, freq deltas)
//! ```
//!
//! The first doc delta of a list is the absolute id; every later delta
//! (including across block boundaries) must be at least 1. Block maxima are
//! delta coded against the previous block's maximum, which lets
//! [`PostingDecoder::skip_to`] step over whole blocks without decoding them.

use std::sync::Arc;

use crate::error::{LexisError, Result};
use crate::util::varint::{decode_u32, decode_u64, encode_u64_into};

/// Flag bit set when the list carries positions.
const FLAG_POSITIONS: u8 = 0x01;

/// Default number of postings per skip block.
pub const DEFAULT_BLOCK_SIZE: usize = 128;

/// One (document, term) occurrence record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posting {
    pub doc_id: u32,
    pub freq: u32,
    pub positions: Vec<u32>,
}

impl Posting {
    /// A posting without positions.
    pub fn new(doc_id: u32, freq: u32) -> Self {
        Posting {
            doc_id,
            freq,
            positions: Vec::new(),
        }
    }

    /// A posting whose frequency is the number of positions.
    pub fn with_positions(doc_id: u32, positions: Vec<u32>) -> Self {
        Posting {
            doc_id,
            freq: positions.len() as u32,
            positions,
        }
    }
}

/// Validate a block size. Block sizes are limited to `1..=255`.
pub fn check_block_size(block_size: usize) -> Result<()> {
    if !(1..=255).contains(&block_size) {
        return Err(LexisError::invalid_operation(format!(
            "block size must be between 1 and 255, got {block_size}"
        )));
    }
    Ok(())
}

/// Encode an ordered posting list.
pub fn encode(postings: &[Posting], with_positions: bool, block_size: usize) -> Result<Vec<u8>> {
    let mut writer = PostingWriter::new(with_positions, block_size)?;
    for posting in postings {
        writer.add(posting.doc_id, posting.freq, &posting.positions)?;
    }
    Ok(writer.finish())
}

/// Decode a whole posting list eagerly.
pub fn decode_all(bytes: &[u8]) -> Result<Vec<Posting>> {
    let mut decoder = PostingDecoder::new(Arc::from(bytes), 0, bytes.len())?;
    let mut postings = Vec::with_capacity((decoder.len() as usize).min(bytes.len() / 2));
    while !decoder.is_exhausted() {
        let positions = if decoder.has_positions() {
            decoder.positions()?.to_vec()
        } else {
            Vec::new()
        };
        postings.push(Posting {
            doc_id: decoder.doc_id(),
            freq: decoder.freq(),
            positions,
        });
        decoder.next()?;
    }
    Ok(postings)
}

/// Streaming encoder for one posting list.
#[derive(Debug)]
pub struct PostingWriter {
    with_positions: bool,
    block_size: usize,
    count: u64,
    blocks: Vec<u8>,
    block_count: u64,
    first_doc: Option<u32>,
    last_doc: Option<u32>,
    prev_block_max: Option<u32>,
    pending_docs: Vec<u32>,
    pending_freqs: Vec<u32>,
    pending_positions: Vec<u32>,
}

impl PostingWriter {
    pub fn new(with_positions: bool, block_size: usize) -> Result<Self> {
        check_block_size(block_size)?;
        Ok(PostingWriter {
            with_positions,
            block_size,
            count: 0,
            blocks: Vec::new(),
            block_count: 0,
            first_doc: None,
            last_doc: None,
            prev_block_max: None,
            pending_docs: Vec::with_capacity(block_size),
            pending_freqs: Vec::with_capacity(block_size),
            pending_positions: Vec::new(),
        })
    }

    /// Append a posting. Ids must be strictly ascending and `freq >= 1`;
    /// with positions, `positions` must hold `freq` strictly ascending values.
    pub fn add(&mut self, doc_id: u32, freq: u32, positions: &[u32]) -> Result<()> {
        if let Some(last) = self.last_doc
            && doc_id <= last
        {
            return Err(LexisError::invalid_operation(format!(
                "posting ids must be strictly ascending ({doc_id} after {last})"
            )));
        }
        if freq == 0 {
            return Err(LexisError::invalid_operation("posting frequency must be >= 1"));
        }
        if self.with_positions {
            if positions.len() != freq as usize {
                return Err(LexisError::invalid_operation(format!(
                    "posting for doc {doc_id} has freq {freq} but {} positions",
                    positions.len()
                )));
            }
            if positions.windows(2).any(|w| w[1] <= w[0]) {
                return Err(LexisError::invalid_operation(format!(
                    "positions for doc {doc_id} must be strictly ascending"
                )));
            }
            self.pending_positions.extend_from_slice(positions);
        }

        self.pending_docs.push(doc_id);
        self.pending_freqs.push(freq);
        self.first_doc.get_or_insert(doc_id);
        self.last_doc = Some(doc_id);
        self.count += 1;

        if self.pending_docs.len() == self.block_size {
            self.flush_block();
        }
        Ok(())
    }

    /// Number of postings added so far.
    pub fn len(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Smallest doc id added so far.
    pub fn first_doc(&self) -> Option<u32> {
        self.first_doc
    }

    fn flush_block(&mut self) {
        let Some(&block_max) = self.pending_docs.last() else {
            return;
        };

        let mut body = Vec::with_capacity(self.pending_docs.len() * 3);
        let mut prev = self.prev_block_max;
        for &doc in &self.pending_docs {
            let delta = match prev {
                Some(p) => doc - p,
                None => doc,
            };
            encode_u64_into(delta as u64, &mut body);
            prev = Some(doc);
        }
        for &freq in &self.pending_freqs {
            encode_u64_into(freq as u64, &mut body);
        }
        if self.with_positions {
            let mut offset = 0;
            for &freq in &self.pending_freqs {
                let positions = &self.pending_positions[offset..offset + freq as usize];
                let mut prev_pos = None;
                for &pos in positions {
                    let delta = match prev_pos {
                        Some(p) => pos - p,
                        None => pos,
                    };
                    encode_u64_into(delta as u64, &mut body);
                    prev_pos = Some(pos);
                }
                offset += freq as usize;
            }
        }

        let max_delta = match self.prev_block_max {
            Some(p) => block_max - p,
            None => block_max,
        };
        encode_u64_into(self.pending_docs.len() as u64, &mut self.blocks);
        encode_u64_into(max_delta as u64, &mut self.blocks);
        encode_u64_into(body.len() as u64, &mut self.blocks);
        self.blocks.extend_from_slice(&body);

        self.block_count += 1;
        self.prev_block_max = Some(block_max);
        self.pending_docs.clear();
        self.pending_freqs.clear();
        self.pending_positions.clear();
    }

    /// Finish the list and return its bytes.
    pub fn finish(mut self) -> Vec<u8> {
        self.flush_block();

        let mut out = Vec::with_capacity(self.blocks.len() + 12);
        encode_u64_into(self.count, &mut out);
        out.push(if self.with_positions { FLAG_POSITIONS } else { 0 });
        encode_u64_into(self.block_count, &mut out);
        out.extend_from_slice(&self.blocks);
        out
    }
}

/// Lazy cursor over an encoded posting list.
///
/// A fresh decoder is positioned on the first posting. Block bodies are only
/// decoded when the cursor enters them, and positions only when asked for.
#[derive(Debug, Clone)]
pub struct PostingDecoder {
    data: Arc<[u8]>,
    end: usize,
    count: u64,
    with_positions: bool,
    blocks_total: u64,
    blocks_seen: u64,
    postings_seen: u64,
    /// Offset of the next block header.
    next_block: usize,
    prev_block_max: Option<u32>,
    block_max: u32,
    block_body: (usize, usize),
    positions_start: usize,
    docs: Vec<u32>,
    freqs: Vec<u32>,
    positions: Vec<u32>,
    position_offsets: Vec<usize>,
    positions_decoded: bool,
    idx: usize,
    exhausted: bool,
}

impl PostingDecoder {
    /// Open the list stored in `data[start..end]`.
    pub fn new(data: Arc<[u8]>, start: usize, end: usize) -> Result<Self> {
        if start > end || end > data.len() {
            return Err(LexisError::corrupt(format!(
                "posting range {start}..{end} outside {} byte file",
                data.len()
            )));
        }

        let mut pos = start;
        let (count, len) = decode_u64(&data[pos..end])?;
        pos += len;
        let flags = *data
            .get(pos)
            .filter(|_| pos < end)
            .ok_or_else(|| LexisError::corrupt("posting list truncated before flags"))?;
        pos += 1;
        if flags & !FLAG_POSITIONS != 0 {
            return Err(LexisError::corrupt(format!("unknown posting flags {flags:#x}")));
        }
        let (blocks_total, len) = decode_u64(&data[pos..end])?;
        pos += len;
        if (count == 0) != (blocks_total == 0) || blocks_total > count {
            return Err(LexisError::corrupt(format!(
                "posting list with {count} postings in {blocks_total} blocks"
            )));
        }
        // Each posting takes at least a doc delta and a frequency byte.
        let available = (end - pos) as u64;
        if count.saturating_mul(2) > available {
            return Err(LexisError::corrupt(format!(
                "posting list claims {count} postings in {available} bytes"
            )));
        }

        let mut decoder = PostingDecoder {
            data,
            end,
            count,
            with_positions: flags & FLAG_POSITIONS != 0,
            blocks_total,
            blocks_seen: 0,
            postings_seen: 0,
            next_block: pos,
            prev_block_max: None,
            block_max: 0,
            block_body: (pos, pos),
            positions_start: pos,
            docs: Vec::new(),
            freqs: Vec::new(),
            positions: Vec::new(),
            position_offsets: Vec::new(),
            positions_decoded: false,
            idx: 0,
            exhausted: count == 0,
        };

        if !decoder.exhausted {
            decoder.enter_next_block()?;
        }
        Ok(decoder)
    }

    /// Decoder over an owned byte buffer holding exactly one list.
    pub fn from_vec(bytes: Vec<u8>) -> Result<Self> {
        let len = bytes.len();
        Self::new(Arc::from(bytes), 0, len)
    }

    /// Total number of postings in the list.
    pub fn len(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn has_positions(&self) -> bool {
        self.with_positions
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Current doc id. Meaningless once exhausted.
    pub fn doc_id(&self) -> u32 {
        self.docs.get(self.idx).copied().unwrap_or(u32::MAX)
    }

    /// Frequency of the current posting.
    pub fn freq(&self) -> u32 {
        self.freqs.get(self.idx).copied().unwrap_or(0)
    }

    /// Positions of the current posting.
    pub fn positions(&mut self) -> Result<&[u32]> {
        if !self.with_positions {
            return Err(LexisError::query_type("posting list has no positions"));
        }
        if self.exhausted {
            return Ok(&[]);
        }
        if !self.positions_decoded {
            self.decode_positions()?;
        }
        let start = self.position_offsets[self.idx];
        let end = self.position_offsets[self.idx + 1];
        Ok(&self.positions[start..end])
    }

    /// Advance to the next posting. Returns false once exhausted.
    pub fn next(&mut self) -> Result<bool> {
        if self.exhausted {
            return Ok(false);
        }
        self.idx += 1;
        if self.idx < self.docs.len() {
            return Ok(true);
        }
        self.advance_block()
    }

    /// Advance to the first posting with id >= `target`. Never moves backward.
    pub fn skip_to(&mut self, target: u32) -> Result<bool> {
        if self.exhausted {
            return Ok(false);
        }
        if self.doc_id() >= target {
            return Ok(true);
        }

        if self.block_max < target {
            // Whole blocks whose maximum is below the target are skipped unread.
            loop {
                if self.blocks_seen == self.blocks_total {
                    self.finish_list()?;
                    return Ok(false);
                }
                let (n, max, body_start, body_end) = self.read_block_header(self.next_block)?;
                if max >= target {
                    self.load_block(n, max, body_start, body_end)?;
                    break;
                }
                self.blocks_seen += 1;
                self.postings_seen += n as u64;
                self.prev_block_max = Some(max);
                self.block_max = max;
                self.next_block = body_end;
            }
        }

        while self.doc_id() < target {
            self.idx += 1;
            if self.idx >= self.docs.len() {
                return self.advance_block();
            }
        }
        Ok(true)
    }

    fn advance_block(&mut self) -> Result<bool> {
        if self.blocks_seen == self.blocks_total {
            self.finish_list()?;
            return Ok(false);
        }
        self.enter_next_block()?;
        Ok(true)
    }

    fn finish_list(&mut self) -> Result<()> {
        self.exhausted = true;
        self.docs.clear();
        self.freqs.clear();
        self.idx = 0;
        if self.postings_seen != self.count {
            return Err(LexisError::corrupt(format!(
                "posting list declares {} postings but blocks hold {}",
                self.count, self.postings_seen
            )));
        }
        if self.next_block != self.end {
            return Err(LexisError::corrupt("trailing bytes after posting list"));
        }
        Ok(())
    }

    fn enter_next_block(&mut self) -> Result<()> {
        let (n, max, body_start, body_end) = self.read_block_header(self.next_block)?;
        self.load_block(n, max, body_start, body_end)
    }

    fn read_block_header(&self, mut pos: usize) -> Result<(usize, u32, usize, usize)> {
        let (n, len) = decode_u64(&self.data[pos..self.end])?;
        pos += len;
        let (max_delta, len) = decode_u32(&self.data[pos..self.end])?;
        pos += len;
        let (body_len, len) = decode_u64(&self.data[pos..self.end])?;
        pos += len;

        let remaining = self.count - self.postings_seen;
        if n == 0 || n > remaining {
            return Err(LexisError::corrupt(format!(
                "block of {n} postings with {remaining} remaining"
            )));
        }
        if n.saturating_mul(2) > body_len {
            return Err(LexisError::corrupt(format!(
                "block of {n} postings in a {body_len} byte body"
            )));
        }
        let max = match self.prev_block_max {
            Some(prev) => {
                if max_delta == 0 {
                    return Err(LexisError::corrupt("non-monotonic block maximum"));
                }
                prev.checked_add(max_delta)
                    .ok_or_else(|| LexisError::corrupt("block maximum overflows"))?
            }
            None => max_delta,
        };
        let body_end = usize::try_from(body_len)
            .ok()
            .and_then(|len| pos.checked_add(len))
            .filter(|&end| end <= self.end)
            .ok_or_else(|| LexisError::corrupt("block body extends past posting list"))?;

        Ok((n as usize, max, pos, body_end))
    }

    fn load_block(&mut self, n: usize, max: u32, body_start: usize, body_end: usize) -> Result<()> {
        let body = &self.data[body_start..body_end];
        let mut pos = 0;

        self.docs.clear();
        self.freqs.clear();
        let mut prev = self.prev_block_max;
        for _ in 0..n {
            let (delta, len) = decode_u64(&body[pos..])?;
            pos += len;
            let doc = match prev {
                Some(p) => {
                    if delta == 0 {
                        return Err(LexisError::corrupt(format!(
                            "zero doc delta after doc {p}: ids are not strictly ascending"
                        )));
                    }
                    (p as u64) + delta
                }
                None => delta,
            };
            let doc = u32::try_from(doc)
                .map_err(|_| LexisError::corrupt(format!("doc id {doc} overflows u32")))?;
            self.docs.push(doc);
            prev = Some(doc);
        }
        for _ in 0..n {
            let (freq, len) = decode_u32(&body[pos..])?;
            pos += len;
            if freq == 0 {
                return Err(LexisError::corrupt("zero posting frequency"));
            }
            self.freqs.push(freq);
        }

        if self.docs.last().copied() != Some(max) {
            return Err(LexisError::corrupt(format!(
                "block maximum {max} disagrees with decoded ids"
            )));
        }
        if !self.with_positions && pos != body.len() {
            return Err(LexisError::corrupt("unexpected bytes in block body"));
        }

        self.blocks_seen += 1;
        self.postings_seen += n as u64;
        self.prev_block_max = Some(max);
        self.block_max = max;
        self.block_body = (body_start, body_end);
        self.positions_start = body_start + pos;
        self.positions_decoded = false;
        self.next_block = body_end;
        self.idx = 0;
        Ok(())
    }

    fn decode_positions(&mut self) -> Result<()> {
        let body = &self.data[self.positions_start..self.block_body.1];
        let mut pos = 0;

        self.positions.clear();
        self.position_offsets.clear();
        self.position_offsets.push(0);
        for &freq in &self.freqs {
            let mut prev: Option<u32> = None;
            for _ in 0..freq {
                let (delta, len) = decode_u32(&body[pos..])?;
                pos += len;
                let position = match prev {
                    Some(p) => {
                        if delta == 0 {
                            return Err(LexisError::corrupt("zero position delta"));
                        }
                        p.checked_add(delta)
                            .ok_or_else(|| LexisError::corrupt("position overflows u32"))?
                    }
                    None => delta,
                };
                self.positions.push(position);
                prev = Some(position);
            }
            self.position_offsets.push(self.positions.len());
        }

        if pos != body.len() {
            return Err(LexisError::corrupt(
                "position count disagrees with frequencies",
            ));
        }
        self.positions_decoded = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_postings(len: usize, with_positions: bool, seed: u64) -> Vec<Posting> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut doc = 0u32;
        (0..len)
            .map(|i| {
                doc += if i == 0 { rng.random_range(0..5) } else { rng.random_range(1..20) };
                let freq = rng.random_range(1..5u32);
                let positions = if with_positions {
                    let mut pos = 0;
                    (0..freq)
                        .map(|j| {
                            pos += if j == 0 { rng.random_range(0..10) } else { rng.random_range(1..10) };
                            pos
                        })
                        .collect()
                } else {
                    Vec::new()
                };
                Posting {
                    doc_id: doc,
                    freq,
                    positions,
                }
            })
            .collect()
    }

    #[test]
    fn test_roundtrip_lengths() {
        for &len in &[0usize, 1, 10_001] {
            for &with_positions in &[false, true] {
                let postings = random_postings(len, with_positions, len as u64);
                let bytes = encode(&postings, with_positions, DEFAULT_BLOCK_SIZE).unwrap();
                assert_eq!(decode_all(&bytes).unwrap(), postings);
            }
        }
    }

    #[test]
    fn test_skip_to() {
        let postings: Vec<Posting> = (0..1000).map(|i| Posting::new(i * 3, 1)).collect();
        let bytes = encode(&postings, false, 16).unwrap();
        let mut decoder = PostingDecoder::from_vec(bytes).unwrap();

        assert_eq!(decoder.doc_id(), 0);
        assert!(decoder.skip_to(301).unwrap());
        assert_eq!(decoder.doc_id(), 303);

        // No-op when already past the target.
        assert!(decoder.skip_to(10).unwrap());
        assert_eq!(decoder.doc_id(), 303);

        assert!(decoder.skip_to(2997).unwrap());
        assert_eq!(decoder.doc_id(), 2997);
        assert!(!decoder.skip_to(2998).unwrap());
        assert!(decoder.is_exhausted());
        assert!(!decoder.next().unwrap());
    }

    #[test]
    fn test_skip_to_then_positions() {
        let postings = random_postings(500, true, 7);
        let bytes = encode(&postings, true, 32).unwrap();
        let mut decoder = PostingDecoder::from_vec(bytes).unwrap();

        let target = &postings[250];
        assert!(decoder.skip_to(target.doc_id).unwrap());
        assert_eq!(decoder.doc_id(), target.doc_id);
        assert_eq!(decoder.freq(), target.freq);
        assert_eq!(decoder.positions().unwrap(), target.positions.as_slice());
    }

    #[test]
    fn test_writer_tracks_first_doc() {
        let mut writer = PostingWriter::new(false, 4).unwrap();
        assert_eq!(writer.first_doc(), None);
        for doc_id in [7, 9, 30, 31, 40] {
            writer.add(doc_id, 1, &[]).unwrap();
        }
        assert_eq!(writer.first_doc(), Some(7));
    }

    #[test]
    fn test_encoder_rejects_bad_input() {
        let unordered = vec![Posting::new(5, 1), Posting::new(5, 1)];
        assert!(encode(&unordered, false, 128).is_err());

        let zero_freq = vec![Posting::new(1, 0)];
        assert!(encode(&zero_freq, false, 128).is_err());

        let bad_positions = vec![Posting {
            doc_id: 1,
            freq: 2,
            positions: vec![3],
        }];
        assert!(encode(&bad_positions, true, 128).is_err());

        assert!(PostingWriter::new(false, 0).is_err());
        assert!(PostingWriter::new(false, 256).is_err());
    }

    #[test]
    fn test_zero_delta_is_corrupt() {
        // count 2, flags 0, 1 block: n=2, max_delta=3, body_len=4,
        // doc deltas [3, 0], freqs [1, 1]
        let bytes = vec![2, 0, 1, 2, 3, 4, 3, 0, 1, 1];
        let result = decode_all(&bytes);
        assert!(matches!(result, Err(LexisError::CorruptSegment(_))));
    }

    #[test]
    fn test_block_max_mismatch_is_corrupt() {
        let bytes = vec![1, 0, 1, 1, 9, 2, 3, 1];
        assert!(matches!(
            PostingDecoder::from_vec(bytes),
            Err(LexisError::CorruptSegment(_))
        ));
    }

    #[test]
    fn test_inflated_count_is_corrupt() {
        let bytes = encode(&[Posting::new(4, 2)], false, DEFAULT_BLOCK_SIZE).unwrap();
        // Swap the one-byte count for one far beyond what the bytes can hold.
        let mut inflated = crate::util::varint::encode_u64(1 << 62);
        inflated.extend_from_slice(&bytes[1..]);

        assert!(matches!(decode_all(&inflated), Err(LexisError::CorruptSegment(_))));
        assert!(matches!(
            PostingDecoder::from_vec(inflated),
            Err(LexisError::CorruptSegment(_))
        ));
    }

    #[test]
    fn test_inflated_block_size_is_corrupt() {
        // One block claiming 1000 postings in a 2 byte body, padded so the
        // list as a whole is long enough.
        let mut bytes = crate::util::varint::encode_u64(1000);
        bytes.extend_from_slice(&[0, 1]);
        bytes.extend(crate::util::varint::encode_u64(1000));
        bytes.extend_from_slice(&[5, 2, 5, 1]);
        bytes.resize(bytes.len() + 2000, 1);
        assert!(matches!(decode_all(&bytes), Err(LexisError::CorruptSegment(_))));
    }

    #[test]
    fn test_truncated_list_is_corrupt() {
        let postings: Vec<Posting> = (0..300).map(|i| Posting::new(i, 1)).collect();
        let mut bytes = encode(&postings, false, 128).unwrap();
        bytes.truncate(bytes.len() - 5);
        assert!(decode_all(&bytes).is_err());
    }
}
