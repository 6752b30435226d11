//! Stored-fields file (`.sto`).
//!
//! Layout: `varint doc_count`, `doc_count` little-endian `u64` end offsets,
//! then the concatenated `bincode` blobs of each [`StoredDocument`].

use std::sync::Arc;

use crate::document::StoredDocument;
use crate::error::{LexisError, Result};
use crate::storage::StorageOutput;
use crate::storage::structured::{StructReader, StructWriter};

pub const MAGIC: &[u8; 4] = b"LXST";
pub const VERSION: u32 = 1;

/// Collects stored documents of a segment under construction.
#[derive(Debug, Default)]
pub struct StoredFieldsWriter {
    blobs: Vec<u8>,
    ends: Vec<u64>,
}

impl StoredFieldsWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the next document.
    pub fn add(&mut self, doc: &StoredDocument) -> Result<()> {
        let bytes = bincode::serialize(doc)?;
        self.add_raw(&bytes);
        Ok(())
    }

    /// Append an already serialized document, as copied by a merge.
    pub fn add_raw(&mut self, bytes: &[u8]) {
        self.blobs.extend_from_slice(bytes);
        self.ends.push(self.blobs.len() as u64);
    }

    pub fn len(&self) -> usize {
        self.ends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ends.is_empty()
    }

    pub fn finish<W: StorageOutput>(self, output: W) -> Result<()> {
        let mut writer = StructWriter::new(output, MAGIC, VERSION)?;
        writer.write_varint(self.ends.len() as u64)?;
        for end in &self.ends {
            writer.write_u64(*end)?;
        }
        writer.write_raw(&self.blobs)?;
        writer.close()
    }
}

/// Random access to the stored documents of a segment.
#[derive(Debug, Clone)]
pub struct StoredFields {
    data: Arc<[u8]>,
    ends: Vec<u64>,
}

impl StoredFields {
    /// Parse a `.sto` file.
    pub fn read(file: &[u8], name: &str) -> Result<Self> {
        let mut reader = StructReader::open(file, name, MAGIC, VERSION)?;

        let doc_count = reader.read_len()?;
        let mut ends = Vec::with_capacity(doc_count);
        let mut previous = 0;
        for _ in 0..doc_count {
            let end = reader.read_u64()?;
            if end < previous {
                return Err(LexisError::corrupt(format!("{name}: offsets not ascending")));
            }
            ends.push(end);
            previous = end;
        }

        let body = reader.body();
        let blobs = &body[reader.position()..];
        if previous != blobs.len() as u64 {
            return Err(LexisError::corrupt(format!(
                "{name}: blob area is {} bytes, offsets expect {previous}",
                blobs.len()
            )));
        }

        Ok(StoredFields {
            data: Arc::from(blobs),
            ends,
        })
    }

    pub fn doc_count(&self) -> usize {
        self.ends.len()
    }

    /// Serialized bytes of one document.
    pub fn raw(&self, doc_id: u32) -> Result<&[u8]> {
        let idx = doc_id as usize;
        let end = *self.ends.get(idx).ok_or_else(|| {
            LexisError::invalid_operation(format!("doc id {doc_id} out of range"))
        })?;
        let start = if idx == 0 { 0 } else { self.ends[idx - 1] };
        Ok(&self.data[start as usize..end as usize])
    }

    /// Decode one document.
    pub fn document(&self, doc_id: u32) -> Result<StoredDocument> {
        bincode::deserialize(self.raw(doc_id)?)
            .map_err(|e| LexisError::corrupt(format!("stored document {doc_id}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::FieldValue;
    use crate::storage::Storage;
    use crate::storage::memory::MemoryStorage;

    #[test]
    fn test_stored_fields_roundtrip() {
        let storage = MemoryStorage::new_default();

        let mut first = StoredDocument::new();
        first.push("title".into(), FieldValue::Text("Hello".into()));
        let empty = StoredDocument::new();
        let mut third = StoredDocument::new();
        third.push("n".into(), FieldValue::U64(7));

        let mut writer = StoredFieldsWriter::new();
        writer.add(&first).unwrap();
        writer.add(&empty).unwrap();
        writer.add(&third).unwrap();
        writer.finish(storage.create_output("s.sto").unwrap()).unwrap();

        let file = storage.read_all("s.sto").unwrap();
        let stored = StoredFields::read(&file, "s.sto").unwrap();
        assert_eq!(stored.doc_count(), 3);
        assert_eq!(stored.document(0).unwrap(), first);
        assert!(stored.document(1).unwrap().is_empty());
        assert_eq!(stored.document(2).unwrap(), third);
        assert!(matches!(
            stored.document(3),
            Err(LexisError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_raw_copy() {
        let storage = MemoryStorage::new_default();
        let mut doc = StoredDocument::new();
        doc.push("a".into(), FieldValue::I64(-4));

        let mut writer = StoredFieldsWriter::new();
        writer.add(&doc).unwrap();
        writer.finish(storage.create_output("a.sto").unwrap()).unwrap();
        let file = storage.read_all("a.sto").unwrap();
        let source = StoredFields::read(&file, "a.sto").unwrap();

        let mut copy = StoredFieldsWriter::new();
        copy.add_raw(source.raw(0).unwrap());
        copy.finish(storage.create_output("b.sto").unwrap()).unwrap();
        let file = storage.read_all("b.sto").unwrap();
        let copied = StoredFields::read(&file, "b.sto").unwrap();
        assert_eq!(copied.document(0).unwrap(), doc);
    }
}
