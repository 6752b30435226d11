//! Deletion bitmaps (`<segment>_<gen>.del`).
//!
//! A segment is immutable except for its deletion bitmap. The writer owns
//! the only mutable [`SegmentDeletions`] per segment; every commit that
//! changes it writes a new generation file, and readers load the
//! generation named by their manifest into an immutable [`LiveDocs`].

use std::sync::Arc;

use bit_vec::BitVec;

use crate::error::{LexisError, Result};
use crate::storage::StorageOutput;
use crate::storage::structured::{StructReader, StructWriter};

pub const MAGIC: &[u8; 4] = b"LXDL";
pub const VERSION: u32 = 1;

/// Immutable view of which documents of a segment are deleted.
#[derive(Debug, Clone, Default)]
pub struct LiveDocs {
    bits: Option<Arc<BitVec>>,
    deleted: u32,
}

impl LiveDocs {
    /// No deletions.
    pub fn all_live() -> Self {
        Self::default()
    }

    pub fn is_deleted(&self, doc_id: u32) -> bool {
        self.bits
            .as_ref()
            .is_some_and(|bits| bits.get(doc_id as usize).unwrap_or(false))
    }

    pub fn deleted_count(&self) -> u32 {
        self.deleted
    }

    pub fn has_deletions(&self) -> bool {
        self.deleted > 0
    }

    /// Parse a `.del` file for a segment of `doc_count` documents.
    pub fn read(file: &[u8], name: &str, doc_count: u32) -> Result<Self> {
        let mut reader = StructReader::open(file, name, MAGIC, VERSION)?;

        let stored_count = reader.read_varint()?;
        if stored_count != doc_count as u64 {
            return Err(LexisError::corrupt(format!(
                "{name}: bitmap covers {stored_count} docs, segment has {doc_count}"
            )));
        }
        let deleted = reader.read_varint()?;
        let bytes = reader.read_bytes()?;
        if !reader.is_eof() {
            return Err(LexisError::corrupt(format!("{name}: trailing bytes")));
        }

        let mut bits = BitVec::from_bytes(bytes);
        if bits.len() < doc_count as usize {
            return Err(LexisError::corrupt(format!("{name}: bitmap too short")));
        }
        bits.truncate(doc_count as usize);
        let counted = bits.iter().filter(|&deleted| deleted).count() as u64;
        if counted != deleted {
            return Err(LexisError::corrupt(format!(
                "{name}: header says {deleted} deletions, bitmap has {counted}"
            )));
        }

        Ok(LiveDocs {
            bits: Some(Arc::new(bits)),
            deleted: deleted as u32,
        })
    }
}

/// The writer's mutable deletion bitmap for one segment.
///
/// Not `Clone`: there is exactly one writable handle per segment.
#[derive(Debug)]
pub struct SegmentDeletions {
    segment_id: String,
    bits: BitVec,
    deleted: u32,
    dirty: bool,
}

impl SegmentDeletions {
    pub fn new(segment_id: impl Into<String>, doc_count: u32) -> Self {
        SegmentDeletions {
            segment_id: segment_id.into(),
            bits: BitVec::from_elem(doc_count as usize, false),
            deleted: 0,
            dirty: false,
        }
    }

    /// Start from the committed state of a segment.
    pub fn from_live_docs(segment_id: impl Into<String>, doc_count: u32, live: &LiveDocs) -> Self {
        let bits = match &live.bits {
            Some(bits) => (**bits).clone(),
            None => BitVec::from_elem(doc_count as usize, false),
        };
        SegmentDeletions {
            segment_id: segment_id.into(),
            bits,
            deleted: live.deleted,
            dirty: false,
        }
    }

    pub fn segment_id(&self) -> &str {
        &self.segment_id
    }

    pub fn doc_count(&self) -> u32 {
        self.bits.len() as u32
    }

    /// Mark a document deleted. Idempotent; returns whether it was live.
    pub fn delete(&mut self, doc_id: u32) -> Result<bool> {
        if doc_id as usize >= self.bits.len() {
            return Err(LexisError::invalid_operation(format!(
                "doc id {doc_id} out of range for segment {}",
                self.segment_id
            )));
        }
        if self.bits[doc_id as usize] {
            return Ok(false);
        }
        self.bits.set(doc_id as usize, true);
        self.deleted += 1;
        self.dirty = true;
        Ok(true)
    }

    pub fn is_deleted(&self, doc_id: u32) -> bool {
        self.bits.get(doc_id as usize).unwrap_or(false)
    }

    pub fn deleted_count(&self) -> u32 {
        self.deleted
    }

    /// Whether deletions were added since the last commit.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Freeze the current state for a reader snapshot.
    pub fn live_docs(&self) -> LiveDocs {
        if self.deleted == 0 {
            return LiveDocs::all_live();
        }
        LiveDocs {
            bits: Some(Arc::new(self.bits.clone())),
            deleted: self.deleted,
        }
    }

    pub fn write<W: StorageOutput>(&self, output: W) -> Result<()> {
        let mut writer = StructWriter::new(output, MAGIC, VERSION)?;
        writer.write_varint(self.bits.len() as u64)?;
        writer.write_varint(self.deleted as u64)?;
        writer.write_bytes(&self.bits.to_bytes())?;
        writer.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;
    use crate::storage::memory::MemoryStorage;

    #[test]
    fn test_delete_is_idempotent() {
        let mut deletions = SegmentDeletions::new("seg", 10);

        assert!(deletions.delete(3).unwrap());
        assert!(!deletions.delete(3).unwrap());
        assert_eq!(deletions.deleted_count(), 1);
        assert!(deletions.is_deleted(3));
        assert!(!deletions.is_deleted(4));
        assert!(deletions.is_dirty());
        assert!(deletions.delete(10).is_err());
    }

    #[test]
    fn test_write_and_read_bitmap() {
        let storage = MemoryStorage::new_default();
        let mut deletions = SegmentDeletions::new("seg", 13);
        deletions.delete(0).unwrap();
        deletions.delete(12).unwrap();
        deletions.write(storage.create_output("seg_1.del").unwrap()).unwrap();

        let file = storage.read_all("seg_1.del").unwrap();
        let live = LiveDocs::read(&file, "seg_1.del", 13).unwrap();
        assert_eq!(live.deleted_count(), 2);
        assert!(live.is_deleted(0));
        assert!(live.is_deleted(12));
        assert!(!live.is_deleted(5));

        assert!(LiveDocs::read(&file, "seg_1.del", 14).is_err());

        let reopened = SegmentDeletions::from_live_docs("seg", 13, &live);
        assert_eq!(reopened.deleted_count(), 2);
        assert!(!reopened.is_dirty());
    }

    #[test]
    fn test_snapshot_is_frozen() {
        let mut deletions = SegmentDeletions::new("seg", 4);
        let before = deletions.live_docs();
        deletions.delete(1).unwrap();
        let after = deletions.live_docs();

        assert!(!before.is_deleted(1));
        assert!(after.is_deleted(1));
    }
}
