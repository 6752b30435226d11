//! The single index writer.
//!
//! The writer owns the storage's `WRITELOCK` for its whole life. Documents
//! are analyzed on arrival and buffered; a flush turns the buffer into a new
//! segment, and [`IndexWriter::commit`] publishes every pending change by
//! writing a new manifest. Merges chosen by the merge policy run on
//! background threads and are folded in at the next commit.
//!
//! Deletions are kept per segment in a [`SegmentDeletions`] bitmap. Each
//! commit that changes a bitmap writes it to a fresh `<id>_<gen>.del` file,
//! so readers of older commits keep reading their own file.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::codec::{DEFAULT_BLOCK_SIZE, check_block_size};
use crate::document::{Document, FieldValue};
use crate::error::{LexisError, Result};
use crate::index::manifest::{self, Manifest};
use crate::index::merge_policy::{
    MergeCandidate, MergePolicy, MergePolicyConfig, MergeSegmentInfo, OptimizePolicy,
};
use crate::index::reader::IndexReader;
use crate::index::{IndexShared, Snapshot};
use crate::query::Query;
use crate::query::scorer::ScoringConfig;
use crate::schema::FieldType;
use crate::segment::builder::{AnalyzedDocument, SegmentBuilder};
use crate::segment::deletions::SegmentDeletions;
use crate::segment::merger::{MergeOutput, merge_segments};
use crate::segment::{
    SegmentReader, core_file_names, deletions_file_name, is_segment_file, new_segment_id,
};
use crate::storage::{Storage, StorageLock};

/// Name of the lock file guarding the single writer.
pub const WRITE_LOCK_NAME: &str = "WRITELOCK";

/// Index writer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexWriterConfig {
    /// Buffered documents that trigger an automatic flush to a segment.
    pub max_buffered_docs: usize,

    /// Postings per skip block in new posting lists (1..=255).
    pub block_size: usize,

    /// Policy choosing which segments to merge after each commit.
    pub merge_policy: MergePolicyConfig,

    /// Run merges on background threads instead of inside `commit`.
    pub background_merges: bool,

    /// Prefix of new segment ids.
    pub segment_name_prefix: String,
}

impl Default for IndexWriterConfig {
    fn default() -> Self {
        IndexWriterConfig {
            max_buffered_docs: 10_000,
            block_size: DEFAULT_BLOCK_SIZE,
            merge_policy: MergePolicyConfig::default(),
            background_merges: true,
            segment_name_prefix: "seg_".to_string(),
        }
    }
}

/// Writer statistics since the writer was opened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub docs_added: u64,
    pub docs_deleted: u64,
    pub segments_flushed: u64,
    pub merges_completed: u64,
    pub commits: u64,
}

/// The writer's view of one segment.
#[derive(Debug)]
struct WriterSegment {
    /// The segment as of its last commit (or as flushed, if never committed).
    reader: SegmentReader,
    deletions: SegmentDeletions,
    committed: bool,
    merging: bool,
}

impl WriterSegment {
    fn new(reader: SegmentReader, committed: bool) -> Self {
        let deletions =
            SegmentDeletions::from_live_docs(reader.id(), reader.doc_count(), reader.live_docs());
        WriterSegment {
            reader,
            deletions,
            committed,
            merging: false,
        }
    }

    /// The segment as it stands with uncommitted deletions.
    fn current_view(&self) -> SegmentReader {
        self.reader.with_live_docs(self.deletions.live_docs())
    }
}

/// A merge handed to a background thread.
#[derive(Debug)]
struct RunningMerge {
    id: String,
    /// Source segments with the deletion state the merge started from.
    sources: Vec<SegmentReader>,
}

#[derive(Debug)]
struct MergeDone {
    id: String,
    result: Result<(MergeOutput, SegmentReader)>,
}

/// Adds, deletes and commits documents. At most one exists per index.
pub struct IndexWriter {
    shared: Arc<IndexShared>,
    config: IndexWriterConfig,
    policy: Box<dyn MergePolicy>,
    lock: Option<Box<dyn StorageLock>>,
    segments: Vec<WriterSegment>,
    buffer: Vec<AnalyzedDocument>,
    /// The last published manifest.
    committed: Manifest,
    running: Vec<RunningMerge>,
    threads: Vec<JoinHandle<()>>,
    merge_tx: Sender<MergeDone>,
    merge_rx: Receiver<MergeDone>,
    merge_errors: Vec<LexisError>,
    stats: WriterStats,
}

impl std::fmt::Debug for IndexWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexWriter")
            .field("config", &self.config)
            .field("policy", &self.policy.name())
            .field("generation", &self.committed.generation)
            .field("segments", &self.segments.len())
            .field("buffered_docs", &self.buffer.len())
            .field("running_merges", &self.running.len())
            .field("closed", &self.lock.is_none())
            .finish()
    }
}

impl IndexWriter {
    pub(crate) fn open(shared: Arc<IndexShared>, config: IndexWriterConfig) -> Result<Self> {
        check_block_size(config.block_size)?;
        if config.max_buffered_docs == 0 {
            return Err(LexisError::invalid_operation("max_buffered_docs must be positive"));
        }

        let lock = shared
            .storage
            .try_lock(WRITE_LOCK_NAME)?
            .ok_or_else(|| LexisError::writer_locked(format!("{WRITE_LOCK_NAME} is held")))?;

        // Holding the lock, the newest manifest on storage is authoritative.
        let committed = Manifest::load_latest(shared.storage.as_ref())?
            .unwrap_or_else(|| Manifest::empty((*shared.schema).clone()));
        if committed.schema != *shared.schema {
            return Err(LexisError::schema(format!(
                "manifest {} was written with a different schema",
                committed.generation
            )));
        }
        let current = shared.current.load_full();
        let snapshot = if current.generation() == committed.generation {
            current
        } else {
            let snapshot = Arc::new(Snapshot::load(
                &shared.tracker,
                Arc::clone(&shared.schema),
                &committed,
                Some(&current),
            )?);
            shared.publish(Arc::clone(&snapshot));
            snapshot
        };
        let segments = snapshot
            .segments()
            .iter()
            .map(|segment| WriterSegment::new(segment.clone(), true))
            .collect();

        let (merge_tx, merge_rx) = crossbeam_channel::unbounded();
        let writer = IndexWriter {
            policy: config.merge_policy.build(),
            shared,
            config,
            lock: Some(lock),
            segments,
            buffer: Vec::new(),
            committed,
            running: Vec::new(),
            threads: Vec::new(),
            merge_tx,
            merge_rx,
            merge_errors: Vec::new(),
            stats: WriterStats::default(),
        };
        writer.remove_orphans();
        debug!(
            "opened writer at generation {} with {} segments",
            writer.committed.generation,
            writer.segments.len()
        );
        Ok(writer)
    }

    fn check_open(&self) -> Result<()> {
        if self.lock.is_none() {
            return Err(LexisError::invalid_operation("index writer is closed"));
        }
        Ok(())
    }

    fn storage(&self) -> &dyn Storage {
        self.shared.storage.as_ref()
    }

    pub fn config(&self) -> &IndexWriterConfig {
        &self.config
    }

    pub fn stats(&self) -> &WriterStats {
        &self.stats
    }

    /// Generation of the last commit.
    pub fn generation(&self) -> u64 {
        self.committed.generation
    }

    /// Documents buffered and not yet flushed.
    pub fn pending_docs(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_closed(&self) -> bool {
        self.lock.is_none()
    }

    /// Validate, analyze and buffer a document.
    ///
    /// A document that fails validation is rejected as a whole; a full
    /// buffer is flushed first, and if that flush fails the document is not
    /// added and the buffer is kept.
    pub fn add_document(&mut self, doc: Document) -> Result<()> {
        self.check_open()?;
        let analyzed = AnalyzedDocument::analyze(&self.shared.schema, &doc)?;
        if self.buffer.len() >= self.config.max_buffered_docs {
            self.flush()?;
        }
        self.buffer.push(analyzed);
        self.stats.docs_added += 1;
        Ok(())
    }

    /// Replace the document sharing `doc`'s unique-field value.
    ///
    /// The delete and the insert become visible in the same commit.
    pub fn update_document(&mut self, doc: Document) -> Result<()> {
        self.check_open()?;
        let schema = Arc::clone(&self.shared.schema);
        let unique = schema
            .unique_field()
            .ok_or_else(|| LexisError::schema("update requires a unique field in the schema"))?;

        let analyzed = AnalyzedDocument::analyze(&schema, &doc)?;
        let key = analyzed.unique_key.clone().ok_or_else(|| {
            LexisError::schema(format!("document has no value for unique field '{}'", unique.name()))
        })?;

        self.delete_term(unique.name(), &key)?;
        if self.buffer.len() >= self.config.max_buffered_docs {
            self.flush()?;
        }
        self.buffer.push(analyzed);
        self.stats.docs_added += 1;
        Ok(())
    }

    /// Delete every document whose `field` holds the term `value`.
    ///
    /// Text values are matched as a single indexed term; numeric values by
    /// their indexed form. Buffered documents added before this call are
    /// deleted too. Returns the number of documents deleted.
    pub fn delete_by_term<V: Into<FieldValue>>(&mut self, field: &str, value: V) -> Result<u64> {
        self.check_open()?;
        let def = self.shared.schema.require_field(field)?;
        if !def.is_indexed() {
            return Err(LexisError::schema(format!("field '{field}' is not indexed")));
        }

        let value = value.into();
        let term = match (def.field_type(), &value) {
            (FieldType::Text | FieldType::Keyword, FieldValue::Text(text)) => text.clone(),
            (FieldType::U64, FieldValue::U64(_))
            | (FieldType::I64, FieldValue::I64(_))
            | (FieldType::F64, FieldValue::F64(_)) => value
                .sortable_term()
                .ok_or_else(|| LexisError::schema("value has no indexed form"))?,
            _ => {
                return Err(LexisError::schema(format!(
                    "cannot delete by a {} value on {:?} field '{field}'",
                    value.kind(),
                    def.field_type()
                )));
            }
        };

        let field = field.to_string();
        self.delete_term(&field, &term)
    }

    fn delete_term(&mut self, field: &str, term: &str) -> Result<u64> {
        let mut deleted = 0u64;

        for segment in &mut self.segments {
            let Some(mut postings) = segment.reader.postings(field, term)? else {
                continue;
            };
            while !postings.is_exhausted() {
                if segment.deletions.delete(postings.doc_id())? {
                    deleted += 1;
                }
                postings.next()?;
            }
        }

        let before = self.buffer.len();
        self.buffer.retain(|doc| !doc.has_term(field, term));
        deleted += (before - self.buffer.len()) as u64;

        self.stats.docs_deleted += deleted;
        debug!("deleted {deleted} documents by {field}:{term}");
        Ok(deleted)
    }

    /// Delete every document matching `query`, buffered ones included
    /// (they are flushed first). Returns the number of documents deleted.
    pub fn delete_by_query(&mut self, query: &Query) -> Result<u64> {
        self.check_open()?;
        self.flush()?;

        let view: Vec<SegmentReader> = self.segments.iter().map(WriterSegment::current_view).collect();
        let snapshot = Arc::new(Snapshot::new(
            self.committed.generation,
            Arc::clone(&self.shared.schema),
            view,
        ));
        let reader = IndexReader::new(Arc::clone(&self.shared), Arc::clone(&snapshot));
        let mut matcher = query.matcher(&reader, &ScoringConfig::default())?;

        let mut deleted = 0u64;
        while !matcher.is_exhausted() {
            if let Some((ordinal, local)) = snapshot.locate(matcher.id())
                && self.segments[ordinal].deletions.delete(local)?
            {
                deleted += 1;
            }
            matcher.next()?;
        }

        self.stats.docs_deleted += deleted;
        debug!("deleted {deleted} documents by query");
        Ok(deleted)
    }

    /// Write the buffered documents to a new, uncommitted segment.
    ///
    /// On failure the partially written files are removed and the buffer is
    /// kept, so the call may be retried.
    pub fn flush(&mut self) -> Result<()> {
        self.check_open()?;
        if self.buffer.is_empty() {
            return Ok(());
        }

        let id = new_segment_id(&self.config.segment_name_prefix);
        match self.build_segment(&id) {
            Ok(reader) => {
                debug!("flushed {} documents to segment {id}", self.buffer.len());
                self.buffer.clear();
                self.segments.push(WriterSegment::new(reader, false));
                self.stats.segments_flushed += 1;
                Ok(())
            }
            Err(e) => {
                warn!("flush of segment {id} failed: {e}");
                self.remove_files(core_file_names(&id));
                Err(e)
            }
        }
    }

    fn build_segment(&self, id: &str) -> Result<SegmentReader> {
        let mut builder = SegmentBuilder::new(Arc::clone(&self.shared.schema), self.config.block_size)?;
        for doc in &self.buffer {
            builder.add(doc)?;
        }
        let meta = builder.finish(self.storage(), id)?;
        SegmentReader::open(&self.shared.tracker, &meta)
    }

    fn remove_files(&self, names: Vec<String>) {
        for name in names {
            if let Err(e) = self.storage().delete_file(&name) {
                warn!("failed to remove {name}: {e}");
            }
        }
    }

    fn has_changes(&self) -> bool {
        !self.buffer.is_empty()
            || self
                .segments
                .iter()
                .any(|s| !s.committed || s.deletions.is_dirty())
    }

    /// Flush the buffer and atomically publish all pending changes.
    ///
    /// Readers opened before the commit keep seeing the previous one.
    pub fn commit(&mut self) -> Result<()> {
        self.check_open()?;
        self.flush()?;
        self.collect_finished_merges()?;

        if self.has_changes() {
            self.publish()?;
        }
        self.schedule_merges()
    }

    /// Write deletion files and the manifest for the current segment list,
    /// then swap the shared snapshot.
    fn publish(&mut self) -> Result<()> {
        let generation = self.committed.generation + 1;
        let mut written = Vec::new();

        match self.prepare_commit(generation, &mut written) {
            Ok((manifest, readers)) => {
                self.finish_commit(manifest, readers);
                Ok(())
            }
            Err(e) => {
                warn!("commit of generation {generation} failed: {e}");
                self.remove_files(written);
                Err(e)
            }
        }
    }

    /// Everything a commit does before the manifest rename becomes visible.
    fn prepare_commit(
        &self,
        generation: u64,
        written: &mut Vec<String>,
    ) -> Result<(Manifest, Vec<Option<SegmentReader>>)> {
        let mut metas = Vec::new();
        let mut readers = Vec::with_capacity(self.segments.len());

        for segment in &self.segments {
            let deletions = &segment.deletions;
            if deletions.deleted_count() == deletions.doc_count() && !segment.merging {
                // Nothing left alive; the segment leaves the index.
                readers.push(None);
                continue;
            }

            let mut meta = segment.reader.meta().clone();
            if deletions.is_dirty() || (!segment.committed && deletions.deleted_count() > 0) {
                let name = deletions_file_name(&meta.id, generation);
                written.push(name.clone());
                deletions.write(self.storage().create_output(&name)?)?;
                meta.del_gen = generation;
                meta.deleted_count = deletions.deleted_count();
            }

            readers.push(Some(segment.reader.reopen(&self.shared.tracker, &meta)?));
            metas.push(meta);
        }

        let manifest = Manifest {
            format_version: Manifest::FORMAT_VERSION,
            generation,
            committed_at: chrono::Utc::now(),
            schema: (*self.shared.schema).clone(),
            segments: metas,
        };
        manifest.publish(self.storage())?;
        Ok((manifest, readers))
    }

    /// Adopt a published manifest: update the writer's segments, swap the
    /// shared snapshot and retire superseded files.
    fn finish_commit(&mut self, manifest: Manifest, readers: Vec<Option<SegmentReader>>) {
        let mut stale: Vec<String> = self.committed.referenced_files();
        let mut kept = Vec::with_capacity(self.segments.len());

        for (mut segment, reader) in std::mem::take(&mut self.segments).into_iter().zip(readers) {
            match reader {
                Some(reader) => {
                    segment.reader = reader;
                    segment.committed = true;
                    segment.deletions.mark_clean();
                    kept.push(segment);
                }
                None => stale.extend(segment.reader.meta().file_names()),
            }
        }
        self.segments = kept;

        let live: ahash::AHashSet<String> = manifest.referenced_files().into_iter().collect();
        stale.retain(|name| !live.contains(name));
        stale.sort();
        stale.dedup();

        let snapshot = Snapshot::new(
            manifest.generation,
            Arc::clone(&self.shared.schema),
            self.segments.iter().map(|s| s.reader.clone()).collect(),
        );
        self.shared.publish(Arc::new(snapshot));

        let previous = std::mem::replace(&mut self.committed, manifest);
        self.stats.commits += 1;
        info!(
            "committed generation {} with {} segments ({} live docs)",
            self.committed.generation,
            self.committed.segments.len(),
            self.committed.live_doc_count()
        );

        if let Err(e) = self.shared.tracker.retire(stale) {
            warn!("failed to remove superseded files: {e}");
        }
        let generations = match Manifest::generations(self.storage()) {
            Ok(generations) => generations,
            Err(e) => {
                warn!("failed to list old manifests: {e}");
                return;
            }
        };
        for generation in generations {
            if generation <= previous.generation {
                let name = manifest::manifest_file_name(generation);
                if let Err(e) = self.storage().delete_file(&name) {
                    warn!("failed to remove old manifest {name}: {e}");
                }
            }
        }
    }

    fn merge_infos(&self) -> Vec<MergeSegmentInfo> {
        self.segments
            .iter()
            .enumerate()
            .filter(|(_, s)| s.committed && !s.merging)
            .map(|(position, s)| MergeSegmentInfo {
                id: s.reader.id().to_string(),
                doc_count: s.reader.doc_count(),
                deleted_count: s.deletions.deleted_count(),
                position,
            })
            .collect()
    }

    fn schedule_merges(&mut self) -> Result<()> {
        let candidates = self.policy.select_merges(&self.merge_infos());
        if candidates.is_empty() {
            return Ok(());
        }
        debug!("{} selected {} merges", self.policy.name(), candidates.len());

        if self.config.background_merges {
            for candidate in candidates {
                self.start_merge(candidate);
            }
            Ok(())
        } else {
            self.run_merges_now(None)
        }
    }

    /// Run merges synchronously until the policy (or `policy_override`) is
    /// satisfied, publishing after each round.
    fn run_merges_now(&mut self, policy_override: Option<&dyn MergePolicy>) -> Result<()> {
        loop {
            let infos = self.merge_infos();
            let candidates = match policy_override {
                Some(policy) => policy.select_merges(&infos),
                None => self.policy.select_merges(&infos),
            };
            if candidates.is_empty() {
                return Ok(());
            }
            for candidate in candidates {
                self.start_merge_inline(candidate)?;
            }
            self.publish()?;
        }
    }

    fn begin_merge(&mut self, candidate: &MergeCandidate) -> RunningMerge {
        let mut sources = Vec::with_capacity(candidate.segments.len());
        for segment in &mut self.segments {
            if candidate.segments.iter().any(|id| id == segment.reader.id()) {
                segment.merging = true;
                sources.push(segment.current_view());
            }
        }
        RunningMerge {
            id: new_segment_id(&self.config.segment_name_prefix),
            sources,
        }
    }

    fn start_merge(&mut self, candidate: MergeCandidate) {
        let merge = self.begin_merge(&candidate);
        debug!(
            "starting background merge {} of {:?} ({:?})",
            merge.id, candidate.segments, candidate.reason
        );

        let storage = Arc::clone(&self.shared.storage);
        let tracker = Arc::clone(&self.shared.tracker);
        let sources = merge.sources.clone();
        let id = merge.id.clone();
        let block_size = self.config.block_size;
        let tx = self.merge_tx.clone();

        let handle = std::thread::spawn(move || {
            let run = || -> Result<(MergeOutput, SegmentReader)> {
                let output = merge_segments(storage.as_ref(), &sources, &id, block_size)?;
                let reader = SegmentReader::open(&tracker, &output.meta)?;
                Ok((output, reader))
            };
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(run))
                .unwrap_or_else(|_| Err(LexisError::invalid_operation("merge thread panicked")));
            // The writer may be gone; its drop cleans up after us.
            let _ = tx.send(MergeDone { id, result });
        });

        self.running.push(merge);
        self.threads.push(handle);
    }

    fn start_merge_inline(&mut self, candidate: MergeCandidate) -> Result<()> {
        let merge = self.begin_merge(&candidate);
        debug!("merging {:?} into {} ({:?})", candidate.segments, merge.id, candidate.reason);

        let result = merge_segments(self.storage(), &merge.sources, &merge.id, self.config.block_size)
            .and_then(|output| {
                let reader = SegmentReader::open(&self.shared.tracker, &output.meta)?;
                Ok((output, reader))
            });
        let id = merge.id.clone();
        self.running.push(merge);
        self.integrate_merge(MergeDone { id, result })
    }

    /// Fold completed background merges into the segment list.
    fn collect_finished_merges(&mut self) -> Result<()> {
        while let Ok(done) = self.merge_rx.try_recv() {
            if let Err(e) = self.integrate_merge(done) {
                self.merge_errors.push(e);
            }
        }
        self.reap_threads();
        Ok(())
    }

    fn reap_threads(&mut self) {
        let (finished, running): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.threads).into_iter().partition(|h| h.is_finished());
        self.threads = running;
        for handle in finished {
            if handle.join().is_err() {
                self.merge_errors
                    .push(LexisError::invalid_operation("merge thread panicked"));
            }
        }
    }

    /// Replace a merge's sources by its output, carrying over deletions made
    /// since the merge started. A failed merge leaves the sources in place.
    fn integrate_merge(&mut self, done: MergeDone) -> Result<()> {
        let Some(position) = self.running.iter().position(|m| m.id == done.id) else {
            return Err(LexisError::invalid_operation(format!("unknown merge {}", done.id)));
        };
        let merge = self.running.swap_remove(position);
        let source_ids: Vec<&str> = merge.sources.iter().map(|s| s.id()).collect();

        let (output, reader) = match done.result {
            Ok(result) => result,
            Err(e) => {
                warn!("merge {} failed: {e}", merge.id);
                for segment in &mut self.segments {
                    if source_ids.contains(&segment.reader.id()) {
                        segment.merging = false;
                    }
                }
                self.remove_files(core_file_names(&merge.id));
                return Err(e);
            }
        };

        // Deletions made while the merge ran, mapped to the new ids.
        let mut merged = WriterSegment::new(reader, false);
        for segment in &self.segments {
            let Some(source_idx) = source_ids.iter().position(|id| *id == segment.reader.id()) else {
                continue;
            };
            let started_from = &merge.sources[source_idx];
            let doc_map = &output.doc_maps[source_idx];
            for doc_id in 0..segment.deletions.doc_count() {
                if segment.deletions.is_deleted(doc_id)
                    && !started_from.is_deleted(doc_id)
                    && let Some(new_id) = doc_map.get(doc_id)
                {
                    merged.deletions.delete(new_id)?;
                }
            }
        }

        let mut insert_at = None;
        let mut remaining = Vec::with_capacity(self.segments.len());
        for segment in std::mem::take(&mut self.segments) {
            if source_ids.contains(&segment.reader.id()) {
                insert_at.get_or_insert(remaining.len());
            } else {
                remaining.push(segment);
            }
        }
        remaining.insert(insert_at.unwrap_or(remaining.len()), merged);
        self.segments = remaining;
        self.stats.merges_completed += 1;
        info!(
            "merged {} segments into {} ({} docs)",
            source_ids.len(),
            output.meta.id,
            output.meta.doc_count
        );
        Ok(())
    }

    /// Block until running merges finish and fold them in. Their result
    /// becomes visible at the next commit. Returns the first merge failure
    /// seen since the last call.
    pub fn wait_merges(&mut self) -> Result<()> {
        while !self.running.is_empty() {
            let Ok(done) = self.merge_rx.recv() else {
                break;
            };
            if let Err(e) = self.integrate_merge(done) {
                self.merge_errors.push(e);
            }
        }
        for handle in std::mem::take(&mut self.threads) {
            if handle.join().is_err() {
                self.merge_errors
                    .push(LexisError::invalid_operation("merge thread panicked"));
            }
        }

        match self.merge_errors.drain(..).next() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Commit everything and merge the whole index into one segment.
    pub fn optimize(&mut self) -> Result<()> {
        self.commit()?;
        self.wait_merges()?;
        if self.has_changes() {
            self.publish()?;
        }
        self.run_merges_now(Some(&OptimizePolicy))
    }

    /// Commit pending changes, wait for merges, publish their results and
    /// release the write lock.
    pub fn close(mut self) -> Result<()> {
        self.commit()?;
        self.wait_merges()?;
        if self.has_changes() {
            self.publish()?;
        }
        self.release_lock()
    }

    /// Discard buffered documents, uncommitted segments and deletions, and
    /// release the write lock. The last commit stays as it is.
    pub fn cancel(mut self) -> Result<()> {
        self.discard_uncommitted();
        self.release_lock()
    }

    fn discard_uncommitted(&mut self) {
        // Merge outputs are never published by a cancelled writer.
        while !self.running.is_empty() {
            let Ok(done) = self.merge_rx.recv() else {
                break;
            };
            if let Some(position) = self.running.iter().position(|m| m.id == done.id) {
                self.running.swap_remove(position);
            }
            if let Ok((output, reader)) = done.result {
                drop(reader);
                self.remove_files(output.meta.file_names());
            }
        }
        for handle in std::mem::take(&mut self.threads) {
            let _ = handle.join();
        }

        self.buffer.clear();
        let mut uncommitted = Vec::new();
        for segment in std::mem::take(&mut self.segments) {
            if segment.committed {
                continue;
            }
            uncommitted.extend(segment.reader.meta().file_names());
        }
        if let Err(e) = self.shared.tracker.retire(uncommitted) {
            warn!("failed to remove uncommitted segments: {e}");
        }
    }

    fn release_lock(&mut self) -> Result<()> {
        match self.lock.take() {
            Some(mut lock) => {
                debug!("releasing {}", lock.name());
                lock.release()
            }
            None => Ok(()),
        }
    }

    /// Remove files no manifest references, left by a writer that crashed
    /// between writing segment files and publishing them.
    fn remove_orphans(&self) {
        let files = match self.storage().list_files() {
            Ok(files) => files,
            Err(e) => {
                warn!("failed to list files for orphan cleanup: {e}");
                return;
            }
        };
        let live: ahash::AHashSet<String> = self.committed.referenced_files().into_iter().collect();
        let newest = manifest::manifest_file_name(self.committed.generation);

        let mut orphans = Vec::new();
        for name in files {
            let stale_manifest = name.starts_with(manifest::MANIFEST_PREFIX) && name != newest;
            let stale_segment_file = is_segment_file(&name) && !live.contains(&name);
            if stale_manifest || stale_segment_file {
                debug!("removing orphan {name}");
                orphans.push(name);
            }
        }
        // Files still open by readers of this process go once they close.
        if let Err(e) = self.shared.tracker.retire(orphans) {
            warn!("failed to remove orphans: {e}");
        }
    }
}

impl Drop for IndexWriter {
    fn drop(&mut self) {
        if self.lock.is_some() {
            if self.has_changes() {
                warn!("index writer dropped with uncommitted changes; discarding them");
            }
            self.discard_uncommitted();
            if let Err(e) = self.release_lock() {
                warn!("failed to release write lock: {e}");
            }
        }
    }
}
