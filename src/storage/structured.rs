//! Structured file I/O for binary index files.
//!
//! Every segment file is a 4-byte magic, a little-endian `u32` format
//! version, a body, and a CRC32 trailer covering everything before it.
//! [`StructWriter`] streams a file out through a [`StorageOutput`];
//! [`StructReader`] parses a fully loaded file after checking the trailer.

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

use crate::error::{LexisError, Result};
use crate::storage::StorageOutput;
use crate::util::varint::{decode_u64, encode_u64};

/// Size of the magic + version header.
pub const HEADER_LEN: usize = 8;

/// Size of the CRC32 trailer.
pub const TRAILER_LEN: usize = 4;

/// A structured file writer for binary data.
pub struct StructWriter<W: StorageOutput> {
    writer: W,
    hasher: crc32fast::Hasher,
    position: u64,
}

impl<W: StorageOutput> StructWriter<W> {
    /// Create a new structured file writer and emit the file header.
    pub fn new(writer: W, magic: &[u8; 4], version: u32) -> Result<Self> {
        let mut struct_writer = StructWriter {
            writer,
            hasher: crc32fast::Hasher::new(),
            position: 0,
        };
        struct_writer.write_raw(magic)?;
        struct_writer.write_u32(version)?;
        Ok(struct_writer)
    }

    /// Write a u8 value.
    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write_raw(&[value])
    }

    /// Write a u32 value (little-endian).
    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.write_raw(&value.to_le_bytes())
    }

    /// Write a u64 value (little-endian).
    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.write_raw(&value.to_le_bytes())
    }

    /// Write a f64 value (little-endian).
    pub fn write_f64(&mut self, value: f64) -> Result<()> {
        self.write_raw(&value.to_le_bytes())
    }

    /// Write a variable-length integer.
    pub fn write_varint(&mut self, value: u64) -> Result<()> {
        self.write_raw(&encode_u64(value))
    }

    /// Write a string with length prefix.
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        self.write_bytes(value.as_bytes())
    }

    /// Write raw bytes with length prefix.
    pub fn write_bytes(&mut self, value: &[u8]) -> Result<()> {
        self.write_varint(value.len() as u64)?;
        self.write_raw(value)
    }

    /// Write raw bytes without length prefix.
    pub fn write_raw(&mut self, value: &[u8]) -> Result<()> {
        self.writer.write_all(value)?;
        self.hasher.update(value);
        self.position += value.len() as u64;
        Ok(())
    }

    /// Get current file position.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Write the CRC32 trailer, then flush, sync and close the output.
    pub fn close(mut self) -> Result<()> {
        let checksum = self.hasher.finalize();
        self.writer.write_u32::<LittleEndian>(checksum)?;
        self.writer.close()?;
        Ok(())
    }
}

/// A structured reader over the bytes of a whole file.
#[derive(Debug, Clone)]
pub struct StructReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> StructReader<'a> {
    /// Validate the header and CRC trailer of `file`, returning a reader
    /// positioned just after the header.
    ///
    /// `name` is only used in error messages.
    pub fn open(file: &'a [u8], name: &str, magic: &[u8; 4], version: u32) -> Result<Self> {
        if file.len() < HEADER_LEN + TRAILER_LEN {
            return Err(LexisError::corrupt(format!(
                "{name}: file too short ({} bytes)",
                file.len()
            )));
        }

        let (body, trailer) = file.split_at(file.len() - TRAILER_LEN);
        let expected = LittleEndian::read_u32(trailer);
        let actual = crc32fast::hash(body);
        if expected != actual {
            return Err(LexisError::corrupt(format!(
                "{name}: checksum mismatch (stored {expected:#010x}, computed {actual:#010x})"
            )));
        }

        if &body[..4] != magic {
            return Err(LexisError::corrupt(format!("{name}: bad magic")));
        }
        let found_version = LittleEndian::read_u32(&body[4..8]);
        if found_version != version {
            return Err(LexisError::corrupt(format!(
                "{name}: unsupported version {found_version}"
            )));
        }

        Ok(StructReader {
            data: body,
            position: HEADER_LEN,
        })
    }

    /// Reader over an arbitrary byte slice without header or trailer.
    pub fn from_slice(data: &'a [u8]) -> Self {
        StructReader { data, position: 0 }
    }

    /// The file body (header included, trailer excluded).
    pub fn body(&self) -> &'a [u8] {
        self.data
    }

    /// Current position within the body.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Move to an absolute position within the body.
    pub fn seek(&mut self, position: usize) -> Result<()> {
        if position > self.data.len() {
            return Err(LexisError::corrupt(format!(
                "seek to {position} beyond end ({})",
                self.data.len()
            )));
        }
        self.position = position;
        Ok(())
    }

    /// Whether all body bytes have been consumed.
    pub fn is_eof(&self) -> bool {
        self.position >= self.data.len()
    }

    /// Read `len` raw bytes.
    pub fn read_raw(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .position
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| LexisError::corrupt("unexpected end of file"))?;
        let slice = &self.data[self.position..end];
        self.position = end;
        Ok(slice)
    }

    /// Read a u8 value.
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_raw(1)?[0])
    }

    /// Read a u32 value (little-endian).
    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.read_raw(4)?))
    }

    /// Read a u64 value (little-endian).
    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(LittleEndian::read_u64(self.read_raw(8)?))
    }

    /// Read a f64 value (little-endian).
    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(LittleEndian::read_f64(self.read_raw(8)?))
    }

    /// Read a variable-length integer.
    pub fn read_varint(&mut self) -> Result<u64> {
        let (value, len) = decode_u64(&self.data[self.position.min(self.data.len())..])?;
        self.position += len;
        Ok(value)
    }

    /// Read a varint length or count of items that each occupy at least one
    /// byte of the remaining input.
    pub fn read_len(&mut self) -> Result<usize> {
        let value = self.read_varint()?;
        let remaining = self.data.len() - self.position;
        usize::try_from(value)
            .ok()
            .filter(|&len| len <= remaining)
            .ok_or_else(|| LexisError::corrupt(format!("implausible length {value}")))
    }

    /// Read length-prefixed raw bytes.
    pub fn read_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.read_len()?;
        self.read_raw(len)
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<&'a str> {
        let bytes = self.read_bytes()?;
        std::str::from_utf8(bytes).map_err(|e| LexisError::corrupt(format!("invalid UTF-8: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;
    use crate::storage::memory::MemoryStorage;

    const MAGIC: &[u8; 4] = b"TEST";

    fn write_sample(storage: &MemoryStorage) {
        let output = storage.create_output("sample").unwrap();
        let mut writer = StructWriter::new(output, MAGIC, 1).unwrap();
        writer.write_u8(42).unwrap();
        writer.write_u32(1234).unwrap();
        writer.write_u64(98765).unwrap();
        writer.write_f64(2.5).unwrap();
        writer.write_varint(300).unwrap();
        writer.write_string("hello").unwrap();
        writer.write_bytes(&[1, 2, 3]).unwrap();
        assert_eq!(writer.position(), 8 + 1 + 4 + 8 + 8 + 2 + 6 + 4);
        writer.close().unwrap();
    }

    #[test]
    fn test_write_then_read() {
        let storage = MemoryStorage::new_default();
        write_sample(&storage);

        let file = storage.read_all("sample").unwrap();
        let mut reader = StructReader::open(&file, "sample", MAGIC, 1).unwrap();
        assert_eq!(reader.read_u8().unwrap(), 42);
        assert_eq!(reader.read_u32().unwrap(), 1234);
        assert_eq!(reader.read_u64().unwrap(), 98765);
        assert_eq!(reader.read_f64().unwrap(), 2.5);
        assert_eq!(reader.read_varint().unwrap(), 300);
        assert_eq!(reader.read_string().unwrap(), "hello");
        assert_eq!(reader.read_bytes().unwrap(), &[1, 2, 3]);
        assert!(reader.is_eof());
        assert!(reader.read_u8().is_err());
    }

    #[test]
    fn test_checksum_detects_flipped_byte() {
        let storage = MemoryStorage::new_default();
        write_sample(&storage);
        storage.corrupt_byte("sample", 10).unwrap();

        let file = storage.read_all("sample").unwrap();
        let result = StructReader::open(&file, "sample", MAGIC, 1);
        assert!(matches!(result, Err(LexisError::CorruptSegment(_))));
    }

    #[test]
    fn test_wrong_magic_and_version() {
        let storage = MemoryStorage::new_default();
        write_sample(&storage);
        let file = storage.read_all("sample").unwrap();

        assert!(StructReader::open(&file, "sample", b"NOPE", 1).is_err());
        assert!(StructReader::open(&file, "sample", MAGIC, 2).is_err());
        assert!(StructReader::open(&file[..6], "sample", MAGIC, 1).is_err());
    }
}
