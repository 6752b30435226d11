//! Storage abstraction layer for Lexis.
//!
//! Index files are written and read through the [`Storage`] trait so the
//! on-disk and in-memory backends can be swapped without touching the segment
//! or writer code.
//!
//! # Storage Types
//!
//! ## FileStorage
//! - One directory per index
//! - Buffered writes, explicit fsync on close, atomic rename for publication
//! - Write lock implemented as an exclusively created lock file
//!
//! ## MemoryStorage
//! - In-memory storage for testing and temporary indexes
//! - Fast but non-persistent
//!
//! # Example
//!
//! ```
//! use std::io::Write;
//! use lexis::storage::memory::MemoryStorage;
//! use lexis::storage::{Storage, StorageOutput};
//!
//! # fn main() -> lexis::error::Result<()> {
//! let storage = MemoryStorage::new_default();
//! let mut output = storage.create_output("hello.bin")?;
//! output.write_all(b"hi")?;
//! output.close()?;
//! assert_eq!(storage.read_all("hello.bin")?, b"hi".to_vec());
//! # Ok(())
//! # }
//! ```

use std::io::{Read, Seek, Write};

use crate::error::Result;

pub mod file;
pub mod memory;
pub mod structured;

/// A trait for storage backends that can store and retrieve index files.
pub trait Storage: Send + Sync + std::fmt::Debug {
    /// Open a file for reading.
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>>;

    /// Create (or truncate) a file for writing.
    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>>;

    /// Check if a file exists.
    fn file_exists(&self, name: &str) -> bool;

    /// Delete a file. Deleting a missing file is not an error.
    fn delete_file(&self, name: &str) -> Result<()>;

    /// List all files in the storage, sorted by name.
    fn list_files(&self) -> Result<Vec<String>>;

    /// Get the size of a file in bytes.
    fn file_size(&self, name: &str) -> Result<u64>;

    /// Atomically rename a file, replacing any existing target.
    fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()>;

    /// Make completed renames and deletions durable.
    fn sync(&self) -> Result<()>;

    /// Try to take the named exclusive lock without blocking.
    ///
    /// Returns `Ok(None)` when somebody else holds it.
    fn try_lock(&self, name: &str) -> Result<Option<Box<dyn StorageLock>>>;

    /// Read a whole file into memory.
    fn read_all(&self, name: &str) -> Result<Vec<u8>> {
        let mut input = self.open_input(name)?;
        let mut buffer = Vec::with_capacity(input.size()? as usize);
        input.read_to_end(&mut buffer)?;
        Ok(buffer)
    }
}

/// A trait for reading data from storage.
pub trait StorageInput: Read + Seek + Send + std::fmt::Debug {
    /// Get the size of the input stream.
    fn size(&self) -> Result<u64>;
}

/// A trait for writing data to storage.
pub trait StorageOutput: Write + Send + std::fmt::Debug {
    /// Flush and sync the output to storage.
    fn flush_and_sync(&mut self) -> Result<()>;

    /// Get the current position in the output stream.
    fn position(&self) -> u64;

    /// Flush, sync and close the output stream.
    fn close(&mut self) -> Result<()>;
}

impl StorageOutput for Box<dyn StorageOutput> {
    fn flush_and_sync(&mut self) -> Result<()> {
        self.as_mut().flush_and_sync()
    }

    fn position(&self) -> u64 {
        self.as_ref().position()
    }

    fn close(&mut self) -> Result<()> {
        self.as_mut().close()
    }
}

/// An exclusive lock held on a storage. Released on drop.
pub trait StorageLock: Send + Sync + std::fmt::Debug {
    /// Get the name of the lock.
    fn name(&self) -> &str;

    /// Release the lock explicitly.
    fn release(&mut self) -> Result<()>;
}

/// Configuration for storage backends.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Buffer size for I/O operations.
    pub buffer_size: usize,

    /// Whether to fsync files when they are closed.
    pub sync_writes: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            buffer_size: 65536,
            sync_writes: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_config_default() {
        let config = StorageConfig::default();

        assert_eq!(config.buffer_size, 65536);
        assert!(config.sync_writes);
    }
}
