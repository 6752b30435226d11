//! Merging segments.
//!
//! Live documents of the source segments are renumbered contiguously in
//! source order; deleted documents are dropped along with their postings,
//! stored fields and lengths. The returned [`DocMap`]s let the writer carry
//! deletions made while the merge ran over to the new segment.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use crate::error::{LexisError, Result};
use crate::segment::lengths::FieldLengthsWriter;
use crate::segment::stored::StoredFieldsWriter;
use crate::segment::{SegmentFileWriter, SegmentMeta, SegmentReader};
use crate::storage::Storage;

/// Old-to-new id mapping for one source segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocMap {
    segment_id: String,
    new_ids: Vec<Option<u32>>,
}

impl DocMap {
    fn build(segment: &SegmentReader, next_id: &mut u32) -> Self {
        let new_ids = (0..segment.doc_count())
            .map(|doc_id| {
                if segment.is_deleted(doc_id) {
                    None
                } else {
                    let new_id = *next_id;
                    *next_id += 1;
                    Some(new_id)
                }
            })
            .collect();
        DocMap {
            segment_id: segment.id().to_string(),
            new_ids,
        }
    }

    pub fn segment_id(&self) -> &str {
        &self.segment_id
    }

    /// New id of `old_id`, or `None` if it was dropped by the merge.
    pub fn get(&self, old_id: u32) -> Option<u32> {
        self.new_ids.get(old_id as usize).copied().flatten()
    }
}

/// Result of a merge.
#[derive(Debug, Clone)]
pub struct MergeOutput {
    pub meta: SegmentMeta,
    pub doc_maps: Vec<DocMap>,
}

/// Merge `sources` (with their deletion state) into a new segment `id`.
pub fn merge_segments(
    storage: &dyn Storage,
    sources: &[SegmentReader],
    id: &str,
    block_size: usize,
) -> Result<MergeOutput> {
    let mut next_id = 0u32;
    let doc_maps: Vec<DocMap> = sources
        .iter()
        .map(|segment| DocMap::build(segment, &mut next_id))
        .collect();
    let doc_count = next_id;

    // field -> has positions; terms are merged per field below.
    let mut fields: BTreeMap<&str, bool> = BTreeMap::new();
    for segment in sources {
        for field in segment.terms().fields() {
            *fields.entry(field.name.as_str()).or_insert(false) |= field.has_positions;
        }
    }

    let mut files = SegmentFileWriter::new(storage, id, block_size)?;
    for (&field, &has_positions) in &fields {
        files.start_field(field, has_positions)?;

        let mut texts: BTreeSet<&str> = BTreeSet::new();
        for segment in sources {
            if let Some(terms) = segment.terms().field(field) {
                texts.extend(terms.terms.iter().map(|t| t.text.as_str()));
            }
        }

        for text in texts {
            let mut writer = files.posting_writer()?;
            let mut total_freq = 0u64;

            for (segment, doc_map) in sources.iter().zip(&doc_maps) {
                let Some(info) = segment.term_info(field, text) else {
                    continue;
                };
                if segment.field_has_positions(field) != Some(has_positions) {
                    return Err(LexisError::schema(format!(
                        "field '{field}' has positions in some segments only"
                    )));
                }

                let mut decoder = segment.decoder(info)?;
                while !decoder.is_exhausted() {
                    if let Some(new_id) = doc_map.get(decoder.doc_id()) {
                        let freq = decoder.freq();
                        if has_positions {
                            let positions = decoder.positions()?.to_vec();
                            writer.add(new_id, freq, &positions)?;
                        } else {
                            writer.add(new_id, freq, &[])?;
                        }
                        total_freq += freq as u64;
                    }
                    decoder.next()?;
                }
            }

            files.add_term(text, writer, total_freq)?;
        }
    }

    let mut stored = StoredFieldsWriter::new();
    let mut lengths = FieldLengthsWriter::new();
    for (segment, doc_map) in sources.iter().zip(&doc_maps) {
        let field_names: Vec<&str> = segment.lengths().fields().collect();
        for old_id in 0..segment.doc_count() {
            let Some(new_id) = doc_map.get(old_id) else {
                continue;
            };
            stored.add_raw(segment.raw_stored_fields(old_id)?);
            for field in &field_names {
                lengths.set(field, new_id, segment.field_length(old_id, field));
            }
        }
    }

    let meta = files.finish(stored, lengths, doc_count)?;
    debug!(
        "merged {} segments into {} ({} live docs)",
        sources.len(),
        meta.id,
        meta.doc_count
    );
    Ok(MergeOutput { meta, doc_maps })
}
