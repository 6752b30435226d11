//! Per-segment term dictionary (`.tdx`).
//!
//! Terms are grouped by field; within a field they are sorted by text bytes
//! and prefix-compressed on disk. Each entry points at its posting list in
//! the segment's `.pst` file.

use std::ops::Bound;

use crate::error::{LexisError, Result};
use crate::storage::StorageOutput;
use crate::storage::structured::{StructReader, StructWriter};

pub const MAGIC: &[u8; 4] = b"LXTD";
pub const VERSION: u32 = 2;

const FIELD_HAS_POSITIONS: u8 = 0x01;

/// Dictionary entry for one term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermInfo {
    pub text: String,
    /// Number of documents containing the term (deleted ones included).
    pub doc_freq: u32,
    /// Sum of the term's frequency over those documents.
    pub total_freq: u64,
    /// Lowest doc id in the posting list.
    pub first_doc: u32,
    /// Byte range of the posting list inside the `.pst` body.
    pub offset: u64,
    pub len: u64,
}

/// All terms of one field.
#[derive(Debug, Clone)]
pub struct FieldTerms {
    pub name: String,
    pub has_positions: bool,
    pub terms: Vec<TermInfo>,
}

impl FieldTerms {
    /// Exact lookup by binary search.
    pub fn get(&self, text: &str) -> Option<&TermInfo> {
        self.terms
            .binary_search_by(|t| t.text.as_str().cmp(text))
            .ok()
            .map(|idx| &self.terms[idx])
    }

    /// Terms within the bounds, in order. Only the start is searched for;
    /// the rest is a predicate-bounded walk over the sorted entries.
    pub fn range<'a>(
        &'a self,
        lower: Bound<&'a str>,
        upper: Bound<&'a str>,
    ) -> impl Iterator<Item = &'a TermInfo> + 'a {
        let start = match lower {
            Bound::Included(low) => self.terms.partition_point(|t| t.text.as_str() < low),
            Bound::Excluded(low) => self.terms.partition_point(|t| t.text.as_str() <= low),
            Bound::Unbounded => 0,
        };
        self.terms[start..]
            .iter()
            .take_while(move |t| match upper {
                Bound::Included(high) => t.text.as_str() <= high,
                Bound::Excluded(high) => t.text.as_str() < high,
                Bound::Unbounded => true,
            })
    }
}

/// The loaded term dictionary of a segment.
#[derive(Debug, Clone, Default)]
pub struct TermDictionary {
    fields: Vec<FieldTerms>,
}

impl TermDictionary {
    pub fn field(&self, name: &str) -> Option<&FieldTerms> {
        self.fields
            .binary_search_by(|f| f.name.as_str().cmp(name))
            .ok()
            .map(|idx| &self.fields[idx])
    }

    pub fn get(&self, field: &str, text: &str) -> Option<&TermInfo> {
        self.field(field).and_then(|f| f.get(text))
    }

    /// Fields in byte order of their names.
    pub fn fields(&self) -> &[FieldTerms] {
        &self.fields
    }

    /// Every (field, term) pair in global term order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TermInfo)> {
        self.fields
            .iter()
            .flat_map(|f| f.terms.iter().map(move |t| (f.name.as_str(), t)))
    }

    pub fn term_count(&self) -> usize {
        self.fields.iter().map(|f| f.terms.len()).sum()
    }

    /// Parse a `.tdx` file.
    pub fn read(file: &[u8], name: &str) -> Result<Self> {
        let mut reader = StructReader::open(file, name, MAGIC, VERSION)?;

        let field_count = reader.read_len()?;
        let mut fields: Vec<FieldTerms> = Vec::with_capacity(field_count);
        for _ in 0..field_count {
            let field_name = reader.read_string()?.to_string();
            let flags = reader.read_u8()?;
            let term_count = reader.read_len()?;

            let mut terms: Vec<TermInfo> = Vec::with_capacity(term_count);
            let mut previous: Vec<u8> = Vec::new();
            for _ in 0..term_count {
                let shared = reader.read_len()?;
                if shared > previous.len() {
                    return Err(LexisError::corrupt(format!(
                        "{name}: shared prefix {shared} longer than previous term"
                    )));
                }
                let suffix = reader.read_bytes()?;
                let mut bytes = previous[..shared].to_vec();
                bytes.extend_from_slice(suffix);
                if !terms.is_empty() && bytes <= previous {
                    return Err(LexisError::corrupt(format!(
                        "{name}: terms of field '{field_name}' out of order"
                    )));
                }
                let text = String::from_utf8(bytes.clone())
                    .map_err(|e| LexisError::corrupt(format!("{name}: bad term text: {e}")))?;

                let doc_freq = u32::try_from(reader.read_varint()?)
                    .map_err(|_| LexisError::corrupt(format!("{name}: doc freq overflow")))?;
                let total_freq = reader.read_varint()?;
                let first_doc = u32::try_from(reader.read_varint()?)
                    .map_err(|_| LexisError::corrupt(format!("{name}: first doc overflow")))?;
                let offset = reader.read_varint()?;
                let len = reader.read_varint()?;
                terms.push(TermInfo {
                    text,
                    doc_freq,
                    total_freq,
                    first_doc,
                    offset,
                    len,
                });
                previous = bytes;
            }

            if let Some(last) = fields.last()
                && field_name.as_str() <= last.name.as_str()
            {
                return Err(LexisError::corrupt(format!("{name}: fields out of order")));
            }
            fields.push(FieldTerms {
                name: field_name,
                has_positions: flags & FIELD_HAS_POSITIONS != 0,
                terms,
            });
        }

        if !reader.is_eof() {
            return Err(LexisError::corrupt(format!("{name}: trailing bytes")));
        }
        Ok(TermDictionary { fields })
    }
}

/// Streams a term dictionary to storage. Fields and terms must be written in
/// byte order.
pub struct TermDictionaryWriter<W: StorageOutput> {
    writer: StructWriter<W>,
    fields_remaining: usize,
    terms_remaining: usize,
    previous: Vec<u8>,
}

impl<W: StorageOutput> TermDictionaryWriter<W> {
    pub fn new(output: W, field_count: usize) -> Result<Self> {
        let mut writer = StructWriter::new(output, MAGIC, VERSION)?;
        writer.write_varint(field_count as u64)?;
        Ok(TermDictionaryWriter {
            writer,
            fields_remaining: field_count,
            terms_remaining: 0,
            previous: Vec::new(),
        })
    }

    /// Begin a field holding `term_count` terms.
    pub fn start_field(&mut self, name: &str, has_positions: bool, term_count: usize) -> Result<()> {
        if self.fields_remaining == 0 || self.terms_remaining != 0 {
            return Err(LexisError::invalid_operation("unexpected field in term dictionary"));
        }
        self.fields_remaining -= 1;
        self.terms_remaining = term_count;
        self.previous.clear();

        self.writer.write_string(name)?;
        self.writer
            .write_u8(if has_positions { FIELD_HAS_POSITIONS } else { 0 })?;
        self.writer.write_varint(term_count as u64)
    }

    pub fn add_term(&mut self, info: &TermInfo) -> Result<()> {
        if self.terms_remaining == 0 {
            return Err(LexisError::invalid_operation("more terms than declared"));
        }
        self.terms_remaining -= 1;

        let bytes = info.text.as_bytes();
        let shared = bytes
            .iter()
            .zip(self.previous.iter())
            .take_while(|(a, b)| a == b)
            .count();
        self.writer.write_varint(shared as u64)?;
        self.writer.write_bytes(&bytes[shared..])?;
        self.writer.write_varint(info.doc_freq as u64)?;
        self.writer.write_varint(info.total_freq)?;
        self.writer.write_varint(info.first_doc as u64)?;
        self.writer.write_varint(info.offset)?;
        self.writer.write_varint(info.len)?;

        self.previous.clear();
        self.previous.extend_from_slice(bytes);
        Ok(())
    }

    pub fn finish(self) -> Result<()> {
        if self.fields_remaining != 0 || self.terms_remaining != 0 {
            return Err(LexisError::invalid_operation("term dictionary incomplete"));
        }
        self.writer.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;
    use crate::storage::memory::MemoryStorage;

    fn info(text: &str, offset: u64) -> TermInfo {
        TermInfo {
            text: text.to_string(),
            doc_freq: 1,
            total_freq: 2,
            first_doc: 3,
            offset,
            len: 5,
        }
    }

    fn write_sample(storage: &MemoryStorage) {
        let output = storage.create_output("seg.tdx").unwrap();
        let mut writer = TermDictionaryWriter::new(output, 2).unwrap();
        writer.start_field("body", true, 4).unwrap();
        for (i, text) in ["apple", "applet", "banana", "band"].iter().enumerate() {
            writer.add_term(&info(text, i as u64 * 5)).unwrap();
        }
        writer.start_field("id", false, 1).unwrap();
        writer.add_term(&info("a1", 20)).unwrap();
        writer.finish().unwrap();
    }

    #[test]
    fn test_write_and_read_dictionary() {
        let storage = MemoryStorage::new_default();
        write_sample(&storage);

        let file = storage.read_all("seg.tdx").unwrap();
        let dict = TermDictionary::read(&file, "seg.tdx").unwrap();

        assert_eq!(dict.term_count(), 5);
        assert_eq!(dict.get("body", "band").unwrap().offset, 15);
        assert_eq!(dict.get("body", "band").unwrap().first_doc, 3);
        assert!(dict.field("body").unwrap().has_positions);
        assert!(!dict.field("id").unwrap().has_positions);
        assert!(dict.get("body", "ban").is_none());

        let all: Vec<(&str, &str)> = dict.iter().map(|(f, t)| (f, t.text.as_str())).collect();
        assert_eq!(
            all,
            vec![
                ("body", "apple"),
                ("body", "applet"),
                ("body", "banana"),
                ("body", "band"),
                ("id", "a1")
            ]
        );
    }

    #[test]
    fn test_range_bounds() {
        let storage = MemoryStorage::new_default();
        write_sample(&storage);
        let file = storage.read_all("seg.tdx").unwrap();
        let dict = TermDictionary::read(&file, "seg.tdx").unwrap();
        let body = dict.field("body").unwrap();

        let texts = |lower, upper| -> Vec<String> {
            body.range(lower, upper).map(|t| t.text.clone()).collect()
        };

        assert_eq!(
            texts(Bound::Included("applet"), Bound::Excluded("band")),
            vec!["applet", "banana"]
        );
        assert_eq!(
            texts(Bound::Excluded("apple"), Bound::Included("band")),
            vec!["applet", "banana", "band"]
        );
        assert_eq!(texts(Bound::Unbounded, Bound::Excluded("b")), vec!["apple", "applet"]);
        assert!(texts(Bound::Included("c"), Bound::Unbounded).is_empty());
    }

    #[test]
    fn test_term_count_mismatch_is_rejected() {
        let storage = MemoryStorage::new_default();
        let output = storage.create_output("bad.tdx").unwrap();
        let mut writer = TermDictionaryWriter::new(output, 1).unwrap();
        writer.start_field("body", false, 2).unwrap();
        writer.add_term(&info("a", 0)).unwrap();
        assert!(writer.finish().is_err());
    }
}
