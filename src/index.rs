//! Index handle and snapshot publication.
//!
//! An [`Index`] is an ordered list of segments plus a generation counter,
//! described on storage by the newest `MANIFEST_<generation>.json`. In
//! memory the current list lives in an immutable [`Snapshot`] behind an
//! `ArcSwap`; a commit builds a new snapshot and swaps the pointer, so
//! readers holding the old one are never disturbed.

use std::path::Path;
use std::sync::Arc;

use ahash::AHashMap;
use arc_swap::ArcSwap;
use log::{debug, info};

use crate::error::{LexisError, Result};
use crate::schema::Schema;
use crate::search::Searcher;
use crate::segment::files::FileTracker;
use crate::segment::{SegmentMeta, SegmentReader};
use crate::storage::Storage;
use crate::storage::file::FileStorage;
use crate::storage::memory::MemoryStorage;
use crate::storage::StorageConfig;

pub mod manifest;
pub mod merge_policy;
pub mod reader;
pub mod writer;

pub use manifest::Manifest;
pub use merge_policy::{MergePolicy, MergePolicyConfig, TieredMergeConfig};
pub use reader::{IndexReader, LexiconEntry};
pub use writer::{IndexWriter, IndexWriterConfig};

/// The segment list of one commit, frozen.
#[derive(Debug)]
pub struct Snapshot {
    generation: u64,
    schema: Arc<Schema>,
    segments: Vec<SegmentReader>,
    /// Logical id of the first document of each segment.
    doc_bases: Vec<u64>,
    max_doc: u64,
}

impl Snapshot {
    pub(crate) fn new(generation: u64, schema: Arc<Schema>, segments: Vec<SegmentReader>) -> Self {
        let mut doc_bases = Vec::with_capacity(segments.len());
        let mut max_doc = 0u64;
        for segment in &segments {
            doc_bases.push(max_doc);
            max_doc += segment.doc_count() as u64;
        }
        Snapshot {
            generation,
            schema,
            segments,
            doc_bases,
            max_doc,
        }
    }

    /// Open the segments of `manifest`, reusing already loaded segment
    /// files from `previous` where the ids match.
    pub(crate) fn load(
        tracker: &Arc<FileTracker>,
        schema: Arc<Schema>,
        manifest: &Manifest,
        previous: Option<&Snapshot>,
    ) -> Result<Self> {
        let loaded: AHashMap<&str, &SegmentReader> = previous
            .map(|snapshot| snapshot.segments.iter().map(|s| (s.id(), s)).collect())
            .unwrap_or_default();

        let segments = manifest
            .segments
            .iter()
            .map(|meta: &SegmentMeta| match loaded.get(meta.id.as_str()) {
                Some(segment) => segment.reopen(tracker, meta),
                None => SegmentReader::open(tracker, meta),
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Snapshot::new(manifest.generation, schema, segments))
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn segments(&self) -> &[SegmentReader] {
        &self.segments
    }

    pub fn doc_bases(&self) -> &[u64] {
        &self.doc_bases
    }

    /// One past the largest logical id, deleted documents included.
    pub fn max_doc(&self) -> u64 {
        self.max_doc
    }

    pub fn live_doc_count(&self) -> u64 {
        self.segments.iter().map(|s| s.live_doc_count() as u64).sum()
    }

    /// Segment ordinal and segment-local id of a logical id.
    pub fn locate(&self, doc_id: u64) -> Option<(usize, u32)> {
        if doc_id >= self.max_doc {
            return None;
        }
        let ordinal = self.doc_bases.partition_point(|&base| base <= doc_id) - 1;
        Some((ordinal, (doc_id - self.doc_bases[ordinal]) as u32))
    }
}

/// State shared by every handle on one open index.
#[derive(Debug)]
pub(crate) struct IndexShared {
    pub(crate) storage: Arc<dyn Storage>,
    pub(crate) tracker: Arc<FileTracker>,
    pub(crate) schema: Arc<Schema>,
    pub(crate) current: ArcSwap<Snapshot>,
}

impl IndexShared {
    /// Pick up a manifest committed by another process, if there is one.
    pub(crate) fn refresh(&self) -> Result<Arc<Snapshot>> {
        let current = self.current.load_full();
        let newest = manifest::Manifest::generations(self.storage.as_ref())?
            .last()
            .copied()
            .unwrap_or(0);
        if newest <= current.generation() {
            return Ok(current);
        }

        let Some(manifest) = Manifest::load_latest(self.storage.as_ref())? else {
            return Ok(current);
        };
        if manifest.schema != *self.schema {
            return Err(LexisError::schema(format!(
                "manifest {} was written with a different schema",
                manifest.generation
            )));
        }

        let snapshot = Arc::new(Snapshot::load(
            &self.tracker,
            Arc::clone(&self.schema),
            &manifest,
            Some(&current),
        )?);
        debug!("loaded external commit {}", snapshot.generation());

        // Another handle may have moved on meanwhile; never go backwards.
        let previous = self.current.rcu(|old| {
            if old.generation() < snapshot.generation() {
                Arc::clone(&snapshot)
            } else {
                Arc::clone(old)
            }
        });
        if previous.generation() < snapshot.generation() {
            Ok(snapshot)
        } else {
            Ok(self.current.load_full())
        }
    }

    pub(crate) fn publish(&self, snapshot: Arc<Snapshot>) {
        self.current.store(snapshot);
    }
}

/// A handle on an index stored in a [`Storage`].
///
/// Cloning is cheap; all clones share the published snapshot.
#[derive(Debug, Clone)]
pub struct Index {
    shared: Arc<IndexShared>,
}

impl Index {
    /// Create a new, empty index.
    ///
    /// Fails with `InvalidOperation` if the storage already holds one.
    pub fn create(storage: Arc<dyn Storage>, schema: Schema) -> Result<Index> {
        if Manifest::load_latest(storage.as_ref())?.is_some() {
            return Err(LexisError::invalid_operation("storage already contains an index"));
        }
        let manifest = Manifest::empty(schema);
        manifest.publish(storage.as_ref())?;
        info!("created index with {} fields", manifest.schema.len());
        Self::from_manifest(storage, manifest)
    }

    /// Open the newest commit of an existing index.
    pub fn open(storage: Arc<dyn Storage>) -> Result<Index> {
        let manifest = Manifest::load_latest(storage.as_ref())?
            .ok_or_else(|| LexisError::invalid_operation("storage contains no index"))?;
        Self::from_manifest(storage, manifest)
    }

    /// Open the index in `storage`, creating it if needed. An existing index
    /// must have been created with the same schema.
    pub fn open_or_create(storage: Arc<dyn Storage>, schema: Schema) -> Result<Index> {
        match Manifest::load_latest(storage.as_ref())? {
            Some(manifest) if manifest.schema != schema => Err(LexisError::schema(
                "existing index was created with a different schema",
            )),
            Some(manifest) => Self::from_manifest(storage, manifest),
            None => Self::create(storage, schema),
        }
    }

    /// Create an index in a directory on disk.
    pub fn create_in_dir<P: AsRef<Path>>(directory: P, schema: Schema) -> Result<Index> {
        let storage = FileStorage::new(directory, StorageConfig::default())?;
        Self::create(Arc::new(storage), schema)
    }

    /// Open an index in a directory on disk.
    pub fn open_in_dir<P: AsRef<Path>>(directory: P) -> Result<Index> {
        let storage = FileStorage::new(directory, StorageConfig::default())?;
        Self::open(Arc::new(storage))
    }

    /// Create an index that lives only in memory.
    pub fn create_in_memory(schema: Schema) -> Result<Index> {
        Self::create(Arc::new(MemoryStorage::new_default()), schema)
    }

    fn from_manifest(storage: Arc<dyn Storage>, manifest: Manifest) -> Result<Index> {
        let tracker = FileTracker::new(Arc::clone(&storage));
        let schema = Arc::new(manifest.schema.clone());
        let snapshot = Snapshot::load(&tracker, Arc::clone(&schema), &manifest, None)?;
        debug!(
            "opened index generation {} with {} segments",
            snapshot.generation(),
            snapshot.segments().len()
        );

        Ok(Index {
            shared: Arc::new(IndexShared {
                storage,
                tracker,
                schema,
                current: ArcSwap::from_pointee(snapshot),
            }),
        })
    }

    pub(crate) fn shared(&self) -> &Arc<IndexShared> {
        &self.shared
    }

    pub fn schema(&self) -> &Schema {
        &self.shared.schema
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.shared.storage
    }

    /// Generation of the newest commit this handle has seen.
    pub fn generation(&self) -> u64 {
        self.shared.current.load().generation()
    }

    /// Take the write lock and open a writer.
    ///
    /// Fails immediately with `WriterLocked` if another writer is open.
    pub fn writer(&self, config: IndexWriterConfig) -> Result<IndexWriter> {
        IndexWriter::open(Arc::clone(&self.shared), config)
    }

    /// A reader on the newest commit.
    pub fn reader(&self) -> Result<IndexReader> {
        let snapshot = self.shared.refresh()?;
        Ok(IndexReader::new(Arc::clone(&self.shared), snapshot))
    }

    /// A searcher on the newest commit.
    pub fn searcher(&self) -> Result<Searcher> {
        Ok(Searcher::new(self.reader()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldDefinition;

    fn schema() -> Schema {
        Schema::builder()
            .field(FieldDefinition::text("body"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_create_and_open() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let index = Index::create(Arc::clone(&storage), schema()).unwrap();
        assert_eq!(index.generation(), 0);
        assert!(storage.file_exists("MANIFEST_0.json"));

        assert!(Index::create(Arc::clone(&storage), schema()).is_err());

        let reopened = Index::open(Arc::clone(&storage)).unwrap();
        assert_eq!(reopened.schema(), &schema());
    }

    #[test]
    fn test_open_missing_index() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        assert!(matches!(
            Index::open(storage),
            Err(LexisError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_open_or_create_checks_schema() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        Index::open_or_create(Arc::clone(&storage), schema()).unwrap();
        Index::open_or_create(Arc::clone(&storage), schema()).unwrap();

        let other = Schema::builder()
            .field(FieldDefinition::keyword("id"))
            .build()
            .unwrap();
        assert!(matches!(
            Index::open_or_create(storage, other),
            Err(LexisError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_locate() {
        let snapshot = Snapshot {
            generation: 1,
            schema: Arc::new(schema()),
            segments: Vec::new(),
            doc_bases: vec![0, 3, 3, 10],
            max_doc: 12,
        };
        assert_eq!(snapshot.locate(0), Some((0, 0)));
        assert_eq!(snapshot.locate(2), Some((0, 2)));
        assert_eq!(snapshot.locate(3), Some((2, 0)));
        assert_eq!(snapshot.locate(11), Some((3, 1)));
        assert_eq!(snapshot.locate(12), None);
    }

    #[test]
    fn test_create_in_dir() {
        let dir = tempfile::tempdir().unwrap();
        Index::create_in_dir(dir.path(), schema()).unwrap();
        let index = Index::open_in_dir(dir.path()).unwrap();
        assert_eq!(index.reader().unwrap().doc_count(), 0);
    }
}
