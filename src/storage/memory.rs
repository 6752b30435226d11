//! In-memory storage implementation for testing and temporary indexes.

use std::collections::{BTreeMap, HashSet};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{LexisError, Result};
use crate::storage::{Storage, StorageConfig, StorageInput, StorageLock, StorageOutput};

type FileMap = Arc<Mutex<BTreeMap<String, Arc<[u8]>>>>;

/// An in-memory storage implementation.
///
/// Cloning yields another handle onto the same files, which is how tests
/// simulate two processes opening one index.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    files: FileMap,
    locks: Arc<Mutex<HashSet<String>>>,
    #[allow(dead_code)]
    config: StorageConfig,
}

impl MemoryStorage {
    /// Create a new memory storage.
    pub fn new(config: StorageConfig) -> Self {
        MemoryStorage {
            files: Arc::new(Mutex::new(BTreeMap::new())),
            locks: Arc::new(Mutex::new(HashSet::new())),
            config,
        }
    }

    /// Create a new memory storage with default configuration.
    pub fn new_default() -> Self {
        Self::new(StorageConfig::default())
    }

    /// Get the number of files in storage.
    pub fn file_count(&self) -> usize {
        self.files.lock().len()
    }

    /// Get the total size of all files.
    pub fn total_size(&self) -> u64 {
        self.files.lock().values().map(|data| data.len() as u64).sum()
    }

    /// Overwrite one byte of a stored file. Used to simulate on-disk corruption.
    pub fn corrupt_byte(&self, name: &str, offset: usize) -> Result<()> {
        let mut files = self.files.lock();
        let data = files
            .get(name)
            .ok_or_else(|| LexisError::storage(format!("File not found: {name}")))?;
        if offset >= data.len() {
            return Err(LexisError::invalid_operation(format!(
                "offset {offset} beyond end of {name}"
            )));
        }
        let mut bytes = data.to_vec();
        bytes[offset] ^= 0xFF;
        files.insert(name.to_string(), bytes.into());
        Ok(())
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new_default()
    }
}

impl Storage for MemoryStorage {
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>> {
        let files = self.files.lock();
        let data = files
            .get(name)
            .ok_or_else(|| LexisError::IoFailure(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("File not found: {name}"),
            )))?;

        Ok(Box::new(MemoryInput::new(Arc::clone(data))))
    }

    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
        Ok(Box::new(MemoryOutput::new(
            name.to_string(),
            Arc::clone(&self.files),
        )))
    }

    fn file_exists(&self, name: &str) -> bool {
        self.files.lock().contains_key(name)
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        self.files.lock().remove(name);
        Ok(())
    }

    fn list_files(&self) -> Result<Vec<String>> {
        Ok(self.files.lock().keys().cloned().collect())
    }

    fn file_size(&self, name: &str) -> Result<u64> {
        self.files
            .lock()
            .get(name)
            .map(|data| data.len() as u64)
            .ok_or_else(|| LexisError::storage(format!("File not found: {name}")))
    }

    fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()> {
        let mut files = self.files.lock();
        let data = files
            .remove(old_name)
            .ok_or_else(|| LexisError::storage(format!("File not found: {old_name}")))?;
        files.insert(new_name.to_string(), data);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }

    fn try_lock(&self, name: &str) -> Result<Option<Box<dyn StorageLock>>> {
        let mut locks = self.locks.lock();
        if !locks.insert(name.to_string()) {
            return Ok(None);
        }

        Ok(Some(Box::new(MemoryLock {
            name: name.to_string(),
            locks: Arc::clone(&self.locks),
            released: false,
        })))
    }
}

/// A memory-based input implementation.
#[derive(Debug)]
pub struct MemoryInput {
    cursor: Cursor<Arc<[u8]>>,
}

impl MemoryInput {
    fn new(data: Arc<[u8]>) -> Self {
        MemoryInput {
            cursor: Cursor::new(data),
        }
    }
}

impl Read for MemoryInput {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl Seek for MemoryInput {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.cursor.seek(pos)
    }
}

impl StorageInput for MemoryInput {
    fn size(&self) -> Result<u64> {
        Ok(self.cursor.get_ref().len() as u64)
    }
}

/// A memory-based output. The file becomes visible when the output is closed.
#[derive(Debug)]
pub struct MemoryOutput {
    name: String,
    buffer: Vec<u8>,
    files: FileMap,
    closed: bool,
}

impl MemoryOutput {
    fn new(name: String, files: FileMap) -> Self {
        MemoryOutput {
            name,
            buffer: Vec::new(),
            files,
            closed: false,
        }
    }

    fn publish(&mut self) {
        let data: Arc<[u8]> = Arc::from(self.buffer.as_slice());
        self.files.lock().insert(self.name.clone(), data);
    }
}

impl Write for MemoryOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.closed {
            return Err(std::io::Error::other("Output is closed"));
        }
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl StorageOutput for MemoryOutput {
    fn flush_and_sync(&mut self) -> Result<()> {
        self.publish();
        Ok(())
    }

    fn position(&self) -> u64 {
        self.buffer.len() as u64
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.publish();
            self.closed = true;
        }
        Ok(())
    }
}

impl Drop for MemoryOutput {
    fn drop(&mut self) {
        if !self.closed {
            self.publish();
        }
    }
}

/// A memory-based lock implementation.
#[derive(Debug)]
struct MemoryLock {
    name: String,
    locks: Arc<Mutex<HashSet<String>>>,
    released: bool,
}

impl StorageLock for MemoryLock {
    fn name(&self) -> &str {
        &self.name
    }

    fn release(&mut self) -> Result<()> {
        if !self.released {
            self.locks.lock().remove(&self.name);
            self.released = true;
        }
        Ok(())
    }
}

impl Drop for MemoryLock {
    fn drop(&mut self) {
        self.locks.lock().remove(&self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_storage_roundtrip() {
        let storage = MemoryStorage::new_default();

        let mut output = storage.create_output("seg_0001.sto").unwrap();
        output.write_all(b"stored fields").unwrap();
        // Nothing is visible until the output is closed.
        assert!(!storage.file_exists("seg_0001.sto"));
        output.close().unwrap();

        assert!(storage.file_exists("seg_0001.sto"));
        assert_eq!(storage.file_size("seg_0001.sto").unwrap(), 13);
        assert_eq!(storage.read_all("seg_0001.sto").unwrap(), b"stored fields");
        assert_eq!(storage.file_count(), 1);
        assert_eq!(storage.total_size(), 13);
    }

    #[test]
    fn test_rename_and_delete() {
        let storage = MemoryStorage::new_default();

        let mut output = storage.create_output("MANIFEST_1.json.tmp").unwrap();
        output.write_all(b"{}").unwrap();
        output.close().unwrap();

        storage.rename_file("MANIFEST_1.json.tmp", "MANIFEST_1.json").unwrap();
        assert_eq!(storage.list_files().unwrap(), vec!["MANIFEST_1.json".to_string()]);
        assert!(storage.rename_file("MANIFEST_2.json.tmp", "MANIFEST_2.json").is_err());

        storage.delete_file("MANIFEST_1.json").unwrap();
        assert_eq!(storage.file_count(), 0);
    }

    #[test]
    fn test_clones_share_files_and_locks() {
        let storage = MemoryStorage::new_default();
        let other = storage.clone();

        let lock = storage.try_lock("WRITELOCK").unwrap();
        assert!(lock.is_some());
        assert!(other.try_lock("WRITELOCK").unwrap().is_none());
        drop(lock);
        assert!(other.try_lock("WRITELOCK").unwrap().is_some());

        let mut output = storage.create_output("shared").unwrap();
        output.write_all(&[1, 2, 3]).unwrap();
        output.close().unwrap();
        assert!(other.file_exists("shared"));
    }

    #[test]
    fn test_corrupt_byte() {
        let storage = MemoryStorage::new_default();
        let mut output = storage.create_output("f").unwrap();
        output.write_all(&[0, 0, 0]).unwrap();
        output.close().unwrap();

        storage.corrupt_byte("f", 1).unwrap();
        assert_eq!(storage.read_all("f").unwrap(), vec![0, 0xFF, 0]);
        assert!(storage.corrupt_byte("f", 10).is_err());
    }
}
