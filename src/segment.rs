//! Immutable index segments.
//!
//! A segment is the unit produced by a flush or a merge. Its files are
//! written once and never modified:
//!
//! - `<id>.tdx` term dictionary
//! - `<id>.pst` posting lists
//! - `<id>.sto` stored fields
//! - `<id>.len` field lengths
//!
//! The only mutable part is the deletion bitmap, persisted per commit as
//! `<id>_<gen>.del`.

use std::ops::Bound;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::codec::{PostingDecoder, PostingWriter};
use crate::document::StoredDocument;
use crate::error::{LexisError, Result};
use crate::storage::structured::{StructReader, StructWriter};
use crate::storage::{Storage, StorageOutput};

pub mod builder;
pub mod deletions;
pub mod files;
pub mod lengths;
pub mod merger;
pub mod stored;
pub mod term_dict;

use deletions::LiveDocs;
use files::{FileHandle, FileTracker};
use lengths::{FieldLengths, FieldLengthsWriter};
use stored::{StoredFields, StoredFieldsWriter};
use term_dict::{FieldTerms, TermDictionary, TermDictionaryWriter, TermInfo};

pub const TERMS_EXTENSION: &str = "tdx";
pub const POSTINGS_EXTENSION: &str = "pst";
pub const STORED_EXTENSION: &str = "sto";
pub const LENGTHS_EXTENSION: &str = "len";
pub const DELETIONS_EXTENSION: &str = "del";

const POSTINGS_MAGIC: &[u8; 4] = b"LXPS";
const POSTINGS_VERSION: u32 = 1;

/// Names of the immutable files of segment `id`.
pub fn core_file_names(id: &str) -> Vec<String> {
    [
        TERMS_EXTENSION,
        POSTINGS_EXTENSION,
        STORED_EXTENSION,
        LENGTHS_EXTENSION,
    ]
    .iter()
    .map(|ext| format!("{id}.{ext}"))
    .collect()
}

/// Name of the deletion bitmap of segment `id` at generation `del_gen`.
pub fn deletions_file_name(id: &str, del_gen: u64) -> String {
    format!("{id}_{del_gen}.{DELETIONS_EXTENSION}")
}

/// A fresh segment identifier.
pub fn new_segment_id(prefix: &str) -> String {
    format!("{prefix}{}", uuid::Uuid::new_v4().simple())
}

/// Whether `name` has the extension of a segment file.
pub fn is_segment_file(name: &str) -> bool {
    name.rsplit_once('.').is_some_and(|(_, ext)| {
        [
            TERMS_EXTENSION,
            POSTINGS_EXTENSION,
            STORED_EXTENSION,
            LENGTHS_EXTENSION,
            DELETIONS_EXTENSION,
        ]
        .contains(&ext)
    })
}

/// Per-segment entry of the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentMeta {
    pub id: String,
    pub doc_count: u32,
    pub deleted_count: u32,
    /// Generation of the deletion bitmap file; 0 means no deletions file.
    pub del_gen: u64,
}

impl SegmentMeta {
    pub fn new(id: impl Into<String>, doc_count: u32) -> Self {
        SegmentMeta {
            id: id.into(),
            doc_count,
            deleted_count: 0,
            del_gen: 0,
        }
    }

    pub fn live_doc_count(&self) -> u32 {
        self.doc_count - self.deleted_count
    }

    pub fn deletion_ratio(&self) -> f64 {
        if self.doc_count == 0 {
            0.0
        } else {
            self.deleted_count as f64 / self.doc_count as f64
        }
    }

    /// Every file this entry references.
    pub fn file_names(&self) -> Vec<String> {
        let mut names = core_file_names(&self.id);
        if self.del_gen > 0 {
            names.push(deletions_file_name(&self.id, self.del_gen));
        }
        names
    }
}

/// The immutable, shareable part of an open segment.
#[derive(Debug)]
pub struct SegmentCore {
    id: String,
    doc_count: u32,
    terms: TermDictionary,
    postings: Arc<[u8]>,
    stored: StoredFields,
    lengths: FieldLengths,
    _files: FileHandle,
}

impl SegmentCore {
    fn open(tracker: &Arc<FileTracker>, id: &str, doc_count: u32) -> Result<Self> {
        let names = core_file_names(id);
        // Reference the files before reading so a concurrent retire cannot
        // delete them underneath us.
        let handle = tracker.acquire(names.clone());
        let storage = tracker.storage();

        let terms = TermDictionary::read(&storage.read_all(&names[0])?, &names[0])?;

        let postings_file = storage.read_all(&names[1])?;
        let reader = StructReader::open(&postings_file, &names[1], POSTINGS_MAGIC, POSTINGS_VERSION)?;
        let postings: Arc<[u8]> = Arc::from(reader.body());

        let stored = StoredFields::read(&storage.read_all(&names[2])?, &names[2])?;
        let lengths = FieldLengths::read(&storage.read_all(&names[3])?, &names[3])?;

        if stored.doc_count() != doc_count as usize || lengths.doc_count() != doc_count {
            return Err(LexisError::corrupt(format!(
                "segment {id}: manifest says {doc_count} docs, files disagree"
            )));
        }
        for (field, info) in terms.iter() {
            if info.offset.saturating_add(info.len) > postings.len() as u64 {
                return Err(LexisError::corrupt(format!(
                    "segment {id}: postings of {field}:{} outside file",
                    info.text
                )));
            }
        }

        Ok(SegmentCore {
            id: id.to_string(),
            doc_count,
            terms,
            postings,
            stored,
            lengths,
            _files: handle,
        })
    }
}

/// Read access to one segment as of one commit.
#[derive(Debug, Clone)]
pub struct SegmentReader {
    meta: SegmentMeta,
    core: Arc<SegmentCore>,
    live: LiveDocs,
    _deletions_file: Option<Arc<FileHandle>>,
}

impl SegmentReader {
    /// Open a segment described by a manifest entry.
    pub fn open(tracker: &Arc<FileTracker>, meta: &SegmentMeta) -> Result<Self> {
        let core = Arc::new(SegmentCore::open(tracker, &meta.id, meta.doc_count)?);
        Self::with_core(tracker, core, meta)
    }

    /// Open another commit's view of an already loaded segment, sharing the
    /// immutable files and loading only the deletion bitmap.
    pub fn reopen(&self, tracker: &Arc<FileTracker>, meta: &SegmentMeta) -> Result<Self> {
        if meta.id != self.meta.id {
            return Err(LexisError::invalid_operation(format!(
                "cannot reopen segment {} as {}",
                self.meta.id, meta.id
            )));
        }
        if meta.del_gen == self.meta.del_gen {
            return Ok(self.clone());
        }
        Self::with_core(tracker, Arc::clone(&self.core), meta)
    }

    fn with_core(tracker: &Arc<FileTracker>, core: Arc<SegmentCore>, meta: &SegmentMeta) -> Result<Self> {
        let (live, handle) = if meta.del_gen > 0 {
            let name = deletions_file_name(&meta.id, meta.del_gen);
            let handle = tracker.acquire(vec![name.clone()]);
            let file = tracker.storage().read_all(&name)?;
            let live = LiveDocs::read(&file, &name, meta.doc_count)?;
            if live.deleted_count() != meta.deleted_count {
                return Err(LexisError::corrupt(format!(
                    "{name}: {} deletions, manifest says {}",
                    live.deleted_count(),
                    meta.deleted_count
                )));
            }
            (live, Some(Arc::new(handle)))
        } else {
            if meta.deleted_count != 0 {
                return Err(LexisError::corrupt(format!(
                    "segment {}: deletions recorded without a bitmap",
                    meta.id
                )));
            }
            (LiveDocs::all_live(), None)
        };

        Ok(SegmentReader {
            meta: meta.clone(),
            core,
            live,
            _deletions_file: handle,
        })
    }

    /// The same segment seen through a different deletion state, used by
    /// the writer to merge or search uncommitted deletions.
    pub fn with_live_docs(&self, live: LiveDocs) -> Self {
        let mut meta = self.meta.clone();
        meta.deleted_count = live.deleted_count();
        SegmentReader {
            meta,
            core: Arc::clone(&self.core),
            live,
            _deletions_file: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.core.id
    }

    pub fn meta(&self) -> &SegmentMeta {
        &self.meta
    }

    /// Number of documents including deleted ones.
    pub fn doc_count(&self) -> u32 {
        self.core.doc_count
    }

    pub fn live_doc_count(&self) -> u32 {
        self.core.doc_count - self.live.deleted_count()
    }

    pub fn is_deleted(&self, doc_id: u32) -> bool {
        self.live.is_deleted(doc_id)
    }

    pub fn live_docs(&self) -> &LiveDocs {
        &self.live
    }

    /// The segment's term dictionary (its term list).
    pub fn terms(&self) -> &TermDictionary {
        &self.core.terms
    }

    pub fn term_info(&self, field: &str, text: &str) -> Option<&TermInfo> {
        self.core.terms.get(field, text)
    }

    /// Dictionary entries of `field` within the bounds.
    pub fn terms_in_range<'a>(
        &'a self,
        field: &str,
        lower: Bound<&'a str>,
        upper: Bound<&'a str>,
    ) -> Box<dyn Iterator<Item = &'a TermInfo> + 'a> {
        match self.core.terms.field(field) {
            Some(terms) => Box::new(terms.range(lower, upper)),
            None => Box::new(std::iter::empty()),
        }
    }

    /// Whether `field` was indexed with positions; `None` if the segment has
    /// no terms for it.
    pub fn field_has_positions(&self, field: &str) -> Option<bool> {
        self.core.terms.field(field).map(|f| f.has_positions)
    }

    /// Decoder over the postings of a dictionary entry.
    pub fn decoder(&self, info: &TermInfo) -> Result<PostingDecoder> {
        self.decoder_at(info.offset, info.len)
    }

    /// Decoder over the `len` bytes of posting data at `offset`.
    pub fn decoder_at(&self, offset: u64, len: u64) -> Result<PostingDecoder> {
        let start = usize::try_from(offset).map_err(|_| LexisError::corrupt("posting offset overflow"))?;
        let end = usize::try_from(len)
            .ok()
            .and_then(|len| start.checked_add(len))
            .ok_or_else(|| LexisError::corrupt("posting length overflow"))?;
        PostingDecoder::new(Arc::clone(&self.core.postings), start, end)
    }

    /// Decoder over the postings of `field:text`, if the term exists.
    pub fn postings(&self, field: &str, text: &str) -> Result<Option<PostingDecoder>> {
        match self.term_info(field, text) {
            Some(info) => self.decoder(info).map(Some),
            None => Ok(None),
        }
    }

    /// Stored fields of a live document.
    pub fn stored_fields(&self, doc_id: u32) -> Result<StoredDocument> {
        if self.is_deleted(doc_id) {
            return Err(LexisError::invalid_operation(format!(
                "document {doc_id} of segment {} is deleted",
                self.core.id
            )));
        }
        self.core.stored.document(doc_id)
    }

    /// Serialized stored fields, regardless of deletion state.
    pub(crate) fn raw_stored_fields(&self, doc_id: u32) -> Result<&[u8]> {
        self.core.stored.raw(doc_id)
    }

    pub fn field_length(&self, doc_id: u32, field: &str) -> u32 {
        self.core.lengths.get(doc_id, field)
    }

    /// Total length of `field` over all documents, deleted ones included.
    pub fn total_field_length(&self, field: &str) -> u64 {
        self.core.lengths.total(field)
    }

    pub(crate) fn lengths(&self) -> &FieldLengths {
        &self.core.lengths
    }
}

/// Writes the immutable files of a new segment.
///
/// Fields and, within a field, terms must arrive in byte order.
pub(crate) struct SegmentFileWriter<'a> {
    storage: &'a dyn Storage,
    id: String,
    block_size: usize,
    postings: StructWriter<Box<dyn StorageOutput>>,
    fields: Vec<FieldTerms>,
}

impl<'a> SegmentFileWriter<'a> {
    pub fn new(storage: &'a dyn Storage, id: &str, block_size: usize) -> Result<Self> {
        crate::codec::check_block_size(block_size)?;
        let output = storage.create_output(&format!("{id}.{POSTINGS_EXTENSION}"))?;
        Ok(SegmentFileWriter {
            storage,
            id: id.to_string(),
            block_size,
            postings: StructWriter::new(output, POSTINGS_MAGIC, POSTINGS_VERSION)?,
            fields: Vec::new(),
        })
    }

    /// A posting writer configured for the current field.
    pub fn posting_writer(&self) -> Result<PostingWriter> {
        let has_positions = self.fields.last().is_some_and(|f| f.has_positions);
        PostingWriter::new(has_positions, self.block_size)
    }

    pub fn start_field(&mut self, name: &str, has_positions: bool) -> Result<()> {
        if let Some(last) = self.fields.last()
            && last.name.as_str() >= name
        {
            return Err(LexisError::invalid_operation(format!(
                "field '{name}' written out of order"
            )));
        }
        self.fields.push(FieldTerms {
            name: name.to_string(),
            has_positions,
            terms: Vec::new(),
        });
        Ok(())
    }

    /// Append a term of the current field. Empty posting lists are dropped.
    pub fn add_term(&mut self, text: &str, postings: PostingWriter, total_freq: u64) -> Result<()> {
        let field = self
            .fields
            .last_mut()
            .ok_or_else(|| LexisError::invalid_operation("term written before any field"))?;
        if postings.is_empty() {
            return Ok(());
        }
        if let Some(last) = field.terms.last()
            && last.text.as_str() >= text
        {
            return Err(LexisError::invalid_operation(format!(
                "term '{text}' written out of order"
            )));
        }

        let doc_freq = u32::try_from(postings.len())
            .map_err(|_| LexisError::invalid_operation("posting list too long"))?;
        let first_doc = postings.first_doc().unwrap_or(0);
        let bytes = postings.finish();
        let offset = self.postings.position();
        self.postings.write_raw(&bytes)?;
        field.terms.push(TermInfo {
            text: text.to_string(),
            doc_freq,
            total_freq,
            first_doc,
            offset,
            len: bytes.len() as u64,
        });
        Ok(())
    }

    /// Close the postings file and write the remaining files.
    pub fn finish(
        self,
        stored: StoredFieldsWriter,
        mut lengths: FieldLengthsWriter,
        doc_count: u32,
    ) -> Result<SegmentMeta> {
        if stored.len() != doc_count as usize {
            return Err(LexisError::invalid_operation(format!(
                "segment {} has {doc_count} docs but {} stored entries",
                self.id,
                stored.len()
            )));
        }
        self.postings.close()?;

        let fields: Vec<FieldTerms> = self
            .fields
            .into_iter()
            .filter(|f| !f.terms.is_empty())
            .collect();
        let output = self
            .storage
            .create_output(&format!("{}.{TERMS_EXTENSION}", self.id))?;
        let mut dict = TermDictionaryWriter::new(output, fields.len())?;
        for field in &fields {
            dict.start_field(&field.name, field.has_positions, field.terms.len())?;
            for term in &field.terms {
                dict.add_term(term)?;
            }
        }
        dict.finish()?;

        stored.finish(
            self.storage
                .create_output(&format!("{}.{STORED_EXTENSION}", self.id))?,
        )?;
        lengths.set_doc_count(doc_count);
        lengths.finish(
            self.storage
                .create_output(&format!("{}.{LENGTHS_EXTENSION}", self.id))?,
        )?;

        Ok(SegmentMeta::new(self.id, doc_count))
    }
}
