//! Reference counting for segment files.
//!
//! Every open [`SegmentReader`](crate::segment::SegmentReader) holds a
//! [`FileHandle`] for the files it was loaded from. The writer retires files
//! when a merge or a newer deletion generation supersedes them; a retired
//! file is deleted only once no handle references it any more.

use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use log::{debug, warn};
use parking_lot::Mutex;

use crate::error::Result;
use crate::storage::Storage;

#[derive(Debug, Default)]
struct TrackerState {
    refs: AHashMap<String, usize>,
    retired: AHashSet<String>,
}

/// Tracks which index files are referenced by open readers.
#[derive(Debug)]
pub struct FileTracker {
    storage: Arc<dyn Storage>,
    state: Mutex<TrackerState>,
}

impl FileTracker {
    pub fn new(storage: Arc<dyn Storage>) -> Arc<Self> {
        Arc::new(FileTracker {
            storage,
            state: Mutex::new(TrackerState::default()),
        })
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Take a reference on `names` for as long as the returned handle lives.
    pub fn acquire(self: &Arc<Self>, names: Vec<String>) -> FileHandle {
        let mut state = self.state.lock();
        for name in &names {
            *state.refs.entry(name.clone()).or_insert(0) += 1;
        }
        FileHandle {
            tracker: Arc::clone(self),
            names,
        }
    }

    /// Whether any open reader still references `name`.
    pub fn is_referenced(&self, name: &str) -> bool {
        self.state.lock().refs.get(name).is_some_and(|&count| count > 0)
    }

    /// Mark files as superseded. Unreferenced ones are deleted now, the rest
    /// when their last handle is dropped. Every deletion is attempted; the
    /// first failure is returned.
    pub fn retire<I: IntoIterator<Item = String>>(&self, names: I) -> Result<()> {
        let mut to_delete = Vec::new();
        {
            let mut state = self.state.lock();
            for name in names {
                if state.refs.get(&name).is_some_and(|&count| count > 0) {
                    state.retired.insert(name);
                } else {
                    to_delete.push(name);
                }
            }
        }

        let mut first_error = None;
        for name in to_delete {
            debug!("removing superseded file {name}");
            if let Err(e) = self.storage.delete_file(&name) {
                warn!("failed to remove superseded file {name}: {e}");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn release(&self, names: &[String]) {
        let mut to_delete = Vec::new();
        {
            let mut state = self.state.lock();
            for name in names {
                let remaining = match state.refs.get_mut(name) {
                    Some(count) => {
                        *count = count.saturating_sub(1);
                        *count
                    }
                    None => continue,
                };
                if remaining == 0 {
                    state.refs.remove(name);
                    if state.retired.remove(name) {
                        to_delete.push(name.clone());
                    }
                }
            }
        }

        for name in to_delete {
            debug!("removing released file {name}");
            if let Err(e) = self.storage.delete_file(&name) {
                warn!("failed to remove {name}: {e}");
            }
        }
    }
}

/// A counted reference on a set of files.
#[derive(Debug)]
pub struct FileHandle {
    tracker: Arc<FileTracker>,
    names: Vec<String>,
}

impl FileHandle {
    pub fn names(&self) -> &[String] {
        &self.names
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        self.tracker.release(&self.names);
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::error::LexisError;
    use crate::storage::memory::MemoryStorage;
    use crate::storage::{StorageInput, StorageLock, StorageOutput};

    /// Memory storage that refuses to delete one file.
    #[derive(Debug)]
    struct StuckFileStorage {
        inner: MemoryStorage,
        stuck: String,
    }

    impl Storage for StuckFileStorage {
        fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>> {
            self.inner.open_input(name)
        }

        fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
            self.inner.create_output(name)
        }

        fn file_exists(&self, name: &str) -> bool {
            self.inner.file_exists(name)
        }

        fn delete_file(&self, name: &str) -> Result<()> {
            if name == self.stuck {
                return Err(LexisError::storage(format!("cannot delete {name}")));
            }
            self.inner.delete_file(name)
        }

        fn list_files(&self) -> Result<Vec<String>> {
            self.inner.list_files()
        }

        fn file_size(&self, name: &str) -> Result<u64> {
            self.inner.file_size(name)
        }

        fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()> {
            self.inner.rename_file(old_name, new_name)
        }

        fn sync(&self) -> Result<()> {
            self.inner.sync()
        }

        fn try_lock(&self, name: &str) -> Result<Option<Box<dyn StorageLock>>> {
            self.inner.try_lock(name)
        }
    }

    fn touch(storage: &MemoryStorage, name: &str) {
        let mut output = storage.create_output(name).unwrap();
        output.write_all(b"x").unwrap();
        output.close().unwrap();
    }

    #[test]
    fn test_retired_file_survives_until_released() {
        let storage = MemoryStorage::new_default();
        touch(&storage, "a.pst");
        let tracker = FileTracker::new(Arc::new(storage.clone()));

        let first = tracker.acquire(vec!["a.pst".to_string()]);
        let second = tracker.acquire(vec!["a.pst".to_string()]);
        tracker.retire(vec!["a.pst".to_string()]).unwrap();
        assert!(storage.file_exists("a.pst"));

        drop(first);
        assert!(storage.file_exists("a.pst"));
        drop(second);
        assert!(!storage.file_exists("a.pst"));
    }

    #[test]
    fn test_unreferenced_file_is_removed_immediately() {
        let storage = MemoryStorage::new_default();
        touch(&storage, "b.sto");
        let tracker = FileTracker::new(Arc::new(storage.clone()));

        tracker.retire(vec!["b.sto".to_string()]).unwrap();
        assert!(!storage.file_exists("b.sto"));
    }

    #[test]
    fn test_release_without_retire_keeps_file() {
        let storage = MemoryStorage::new_default();
        touch(&storage, "c.tdx");
        let tracker = FileTracker::new(Arc::new(storage.clone()));

        let handle = tracker.acquire(vec!["c.tdx".to_string()]);
        assert!(tracker.is_referenced("c.tdx"));
        drop(handle);
        assert!(!tracker.is_referenced("c.tdx"));
        assert!(storage.file_exists("c.tdx"));
    }

    #[test]
    fn test_failed_delete_does_not_stop_retire() {
        let storage = MemoryStorage::new_default();
        for name in ["1.pst", "2.pst", "3.pst"] {
            touch(&storage, name);
        }
        let tracker = FileTracker::new(Arc::new(StuckFileStorage {
            inner: storage.clone(),
            stuck: "1.pst".to_string(),
        }));

        let result = tracker.retire(vec![
            "1.pst".to_string(),
            "2.pst".to_string(),
            "3.pst".to_string(),
        ]);
        assert!(matches!(result, Err(LexisError::IoFailure(_))));
        assert!(storage.file_exists("1.pst"));
        assert!(!storage.file_exists("2.pst"));
        assert!(!storage.file_exists("3.pst"));
    }
}
