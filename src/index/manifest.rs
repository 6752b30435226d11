//! Commit manifests.
//!
//! Each commit writes `MANIFEST_<generation>.json` listing the schema and
//! the live segments. The manifest is first written as `<name>.tmp`, synced,
//! then renamed into place; the rename is the only publication point, so a
//! crash at any earlier moment leaves the previous commit intact.

use std::io::Write;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{LexisError, Result};
use crate::schema::Schema;
use crate::segment::SegmentMeta;
use crate::storage::{Storage, StorageOutput};

pub const MANIFEST_PREFIX: &str = "MANIFEST_";
pub const MANIFEST_SUFFIX: &str = ".json";
pub const TEMP_SUFFIX: &str = ".tmp";

/// Name of the manifest file of `generation`.
pub fn manifest_file_name(generation: u64) -> String {
    format!("{MANIFEST_PREFIX}{generation}{MANIFEST_SUFFIX}")
}

/// Generation encoded in a manifest file name.
pub fn parse_generation(name: &str) -> Option<u64> {
    name.strip_prefix(MANIFEST_PREFIX)?
        .strip_suffix(MANIFEST_SUFFIX)?
        .parse()
        .ok()
}

/// The list of segments making up one commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    pub generation: u64,
    pub committed_at: DateTime<Utc>,
    pub schema: Schema,
    pub segments: Vec<SegmentMeta>,
}

impl Manifest {
    pub const FORMAT_VERSION: u32 = 1;

    /// Generation-zero manifest of an empty index.
    pub fn empty(schema: Schema) -> Self {
        Manifest {
            format_version: Self::FORMAT_VERSION,
            generation: 0,
            committed_at: Utc::now(),
            schema,
            segments: Vec::new(),
        }
    }

    /// Total documents, deleted ones included.
    pub fn total_doc_count(&self) -> u64 {
        self.segments.iter().map(|s| s.doc_count as u64).sum()
    }

    pub fn live_doc_count(&self) -> u64 {
        self.segments.iter().map(|s| s.live_doc_count() as u64).sum()
    }

    /// Every segment file this manifest references.
    pub fn referenced_files(&self) -> Vec<String> {
        self.segments.iter().flat_map(SegmentMeta::file_names).collect()
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_json(data: &[u8]) -> Result<Self> {
        let manifest: Manifest = serde_json::from_slice(data)
            .map_err(|e| LexisError::corrupt(format!("unreadable manifest: {e}")))?;
        if manifest.format_version != Self::FORMAT_VERSION {
            return Err(LexisError::corrupt(format!(
                "unsupported manifest version {}",
                manifest.format_version
            )));
        }
        let schema = manifest.schema.clone().reindex()?;
        Ok(Manifest { schema, ..manifest })
    }

    /// Write and atomically publish this manifest.
    pub fn publish(&self, storage: &dyn Storage) -> Result<()> {
        let name = manifest_file_name(self.generation);
        let temp = format!("{name}{TEMP_SUFFIX}");

        let bytes = self.to_json()?;
        let mut output = storage.create_output(&temp)?;
        output.write_all(&bytes)?;
        output.close()?;

        storage.rename_file(&temp, &name)?;
        // The rename has happened; a failure here must not report the
        // commit as lost.
        if let Err(e) = storage.sync() {
            warn!("failed to sync storage after publishing {name}: {e}");
        }
        debug!("published {name} with {} segments", self.segments.len());
        Ok(())
    }

    /// Generations of all manifest files present, ascending.
    pub fn generations(storage: &dyn Storage) -> Result<Vec<u64>> {
        let mut generations: Vec<u64> = storage
            .list_files()?
            .iter()
            .filter_map(|name| parse_generation(name))
            .collect();
        generations.sort_unstable();
        Ok(generations)
    }

    /// Load the newest manifest that parses, if any exists.
    ///
    /// A newer manifest that fails to parse is skipped with a warning; if no
    /// manifest parses at all the last error is returned.
    pub fn load_latest(storage: &dyn Storage) -> Result<Option<Manifest>> {
        let generations = Self::generations(storage)?;
        let mut last_error = None;

        for generation in generations.into_iter().rev() {
            let name = manifest_file_name(generation);
            match storage.read_all(&name).and_then(|data| Self::from_json(&data)) {
                Ok(manifest) if manifest.generation == generation => return Ok(Some(manifest)),
                Ok(manifest) => {
                    warn!(
                        "{name} claims generation {}, skipping",
                        manifest.generation
                    );
                    last_error = Some(LexisError::corrupt(format!(
                        "{name}: generation mismatch"
                    )));
                }
                Err(e) => {
                    warn!("skipping unreadable manifest {name}: {e}");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldDefinition;
    use crate::storage::memory::MemoryStorage;

    fn schema() -> Schema {
        Schema::builder()
            .field(FieldDefinition::text("body"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_file_names() {
        assert_eq!(manifest_file_name(12), "MANIFEST_12.json");
        assert_eq!(parse_generation("MANIFEST_12.json"), Some(12));
        assert_eq!(parse_generation("MANIFEST_12.json.tmp"), None);
        assert_eq!(parse_generation("seg.tdx"), None);
    }

    #[test]
    fn test_publish_and_load_latest() {
        let storage = MemoryStorage::new_default();
        assert!(Manifest::load_latest(&storage).unwrap().is_none());

        let mut manifest = Manifest::empty(schema());
        manifest.publish(&storage).unwrap();
        manifest.generation = 1;
        manifest.segments.push(SegmentMeta::new("abc", 3));
        manifest.publish(&storage).unwrap();

        assert!(!storage.file_exists("MANIFEST_1.json.tmp"));
        let loaded = Manifest::load_latest(&storage).unwrap().unwrap();
        assert_eq!(loaded.generation, 1);
        assert_eq!(loaded.segments, vec![SegmentMeta::new("abc", 3)]);
        assert_eq!(loaded.schema, schema());
        assert!(loaded.schema.field("body").is_some());
        assert_eq!(loaded.total_doc_count(), 3);
    }

    #[test]
    fn test_unpublished_temp_is_ignored() {
        let storage = MemoryStorage::new_default();
        Manifest::empty(schema()).publish(&storage).unwrap();

        let mut output = storage.create_output("MANIFEST_1.json.tmp").unwrap();
        output.write_all(b"{ half written").unwrap();
        output.close().unwrap();

        let loaded = Manifest::load_latest(&storage).unwrap().unwrap();
        assert_eq!(loaded.generation, 0);
    }

    #[test]
    fn test_corrupt_newest_falls_back() {
        let storage = MemoryStorage::new_default();
        Manifest::empty(schema()).publish(&storage).unwrap();

        let mut output = storage.create_output("MANIFEST_1.json").unwrap();
        output.write_all(b"not json").unwrap();
        output.close().unwrap();

        let loaded = Manifest::load_latest(&storage).unwrap().unwrap();
        assert_eq!(loaded.generation, 0);
    }
}
