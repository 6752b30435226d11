//! Document-length table (`.len`).
//!
//! One dense `u32` column per indexed field holding the number of tokens
//! each document has in that field, plus the column total used for average
//! field lengths.

use std::collections::BTreeMap;

use crate::error::{LexisError, Result};
use crate::storage::StorageOutput;
use crate::storage::structured::{StructReader, StructWriter};

pub const MAGIC: &[u8; 4] = b"LXLN";
pub const VERSION: u32 = 1;

/// Accumulates field lengths for a segment under construction.
#[derive(Debug, Default)]
pub struct FieldLengthsWriter {
    doc_count: u32,
    columns: BTreeMap<String, Vec<u32>>,
}

impl FieldLengthsWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the length of `field` in the next document `doc_id`.
    pub fn set(&mut self, field: &str, doc_id: u32, length: u32) {
        let column = self.columns.entry(field.to_string()).or_default();
        if column.len() <= doc_id as usize {
            column.resize(doc_id as usize + 1, 0);
        }
        column[doc_id as usize] = length;
        self.doc_count = self.doc_count.max(doc_id + 1);
    }

    /// Declare the final document count (documents with no indexed fields
    /// still occupy a row).
    pub fn set_doc_count(&mut self, doc_count: u32) {
        self.doc_count = self.doc_count.max(doc_count);
    }

    pub fn finish<W: StorageOutput>(self, output: W) -> Result<()> {
        let mut writer = StructWriter::new(output, MAGIC, VERSION)?;
        writer.write_varint(self.doc_count as u64)?;
        writer.write_varint(self.columns.len() as u64)?;
        for (field, mut column) in self.columns {
            column.resize(self.doc_count as usize, 0);
            let total: u64 = column.iter().map(|&len| len as u64).sum();
            writer.write_string(&field)?;
            writer.write_u64(total)?;
            for len in column {
                writer.write_u32(len)?;
            }
        }
        writer.close()
    }
}

#[derive(Debug, Clone)]
struct LengthColumn {
    field: String,
    total: u64,
    lengths: Vec<u32>,
}

/// Loaded length table of a segment.
#[derive(Debug, Clone, Default)]
pub struct FieldLengths {
    doc_count: u32,
    columns: Vec<LengthColumn>,
}

impl FieldLengths {
    /// Parse a `.len` file.
    pub fn read(file: &[u8], name: &str) -> Result<Self> {
        let mut reader = StructReader::open(file, name, MAGIC, VERSION)?;

        let doc_count = u32::try_from(reader.read_varint()?)
            .map_err(|_| LexisError::corrupt(format!("{name}: doc count overflow")))?;
        let column_count = reader.read_len()?;
        let mut columns = Vec::with_capacity(column_count);
        for _ in 0..column_count {
            let field = reader.read_string()?.to_string();
            let total = reader.read_u64()?;
            let mut lengths = Vec::with_capacity((doc_count as usize).min(file.len() / 4));
            for _ in 0..doc_count {
                lengths.push(reader.read_u32()?);
            }
            if lengths.iter().map(|&len| len as u64).sum::<u64>() != total {
                return Err(LexisError::corrupt(format!(
                    "{name}: total length of '{field}' disagrees with column"
                )));
            }
            columns.push(LengthColumn {
                field,
                total,
                lengths,
            });
        }

        if !reader.is_eof() {
            return Err(LexisError::corrupt(format!("{name}: trailing bytes")));
        }
        Ok(FieldLengths { doc_count, columns })
    }

    fn column(&self, field: &str) -> Option<&LengthColumn> {
        self.columns.iter().find(|c| c.field == field)
    }

    pub fn doc_count(&self) -> u32 {
        self.doc_count
    }

    /// Token count of `field` in `doc_id`; zero if the field is absent.
    pub fn get(&self, doc_id: u32, field: &str) -> u32 {
        self.column(field)
            .and_then(|c| c.lengths.get(doc_id as usize).copied())
            .unwrap_or(0)
    }

    /// Sum of `field` lengths over all documents of the segment.
    pub fn total(&self, field: &str) -> u64 {
        self.column(field).map_or(0, |c| c.total)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.field.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;
    use crate::storage::memory::MemoryStorage;

    #[test]
    fn test_lengths_roundtrip() {
        let storage = MemoryStorage::new_default();

        let mut writer = FieldLengthsWriter::new();
        writer.set("body", 0, 4);
        writer.set("body", 2, 3);
        writer.set("title", 1, 2);
        writer.set_doc_count(4);
        writer.finish(storage.create_output("x.len").unwrap()).unwrap();

        let file = storage.read_all("x.len").unwrap();
        let lengths = FieldLengths::read(&file, "x.len").unwrap();
        assert_eq!(lengths.doc_count(), 4);
        assert_eq!(lengths.get(0, "body"), 4);
        assert_eq!(lengths.get(1, "body"), 0);
        assert_eq!(lengths.get(2, "body"), 3);
        assert_eq!(lengths.get(3, "body"), 0);
        assert_eq!(lengths.total("body"), 7);
        assert_eq!(lengths.total("title"), 2);
        assert_eq!(lengths.get(0, "missing"), 0);
        assert_eq!(lengths.fields().collect::<Vec<_>>(), vec!["body", "title"]);
    }
}
