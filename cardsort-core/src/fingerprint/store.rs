//! Persisted fingerprint store.
//!
//! A single JSON object mapping card id to `{r_phash, g_phash, b_phash}`.
//! Reads tolerate malformed entries (they are counted and skipped). Writes
//! are read-merge-write through a temporary sibling file that is renamed
//! over the store, so an interrupted write never loses persisted entries.

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use super::Fingerprint;
use crate::error::{CardsortError, Result};

/// Well-formed entries read from a store, in store order.
#[derive(Debug, Default)]
pub struct StoreEntries {
    pub entries: Vec<(String, Fingerprint)>,
    /// Entries skipped because a channel hash was missing or malformed.
    pub malformed: usize,
}

/// Outcome of merging new fingerprints into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergeReport {
    /// Ids written that were not present before.
    pub added: usize,
    /// Ids written that replaced an existing entry.
    pub replaced: usize,
    /// Entries in the store after the write.
    pub total: usize,
}

#[derive(Debug, Clone)]
pub struct FingerprintStore {
    path: PathBuf,
}

impl FingerprintStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Create an empty store if none exists yet.
    pub fn ensure_exists(&self) -> Result<()> {
        if !self.exists() {
            self.write_raw(&Map::new())?;
            info!(path = %self.path.display(), "Created empty fingerprint store");
        }
        Ok(())
    }

    /// The store as a raw JSON object. A missing file reads as empty.
    pub fn read_raw(&self) -> Result<Map<String, Value>> {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice::<Value>(&data)? {
            Value::Object(map) => Ok(map),
            other => Err(CardsortError::StoreError(format!(
                "{} is not a JSON object (found {})",
                self.path.display(),
                json_kind(&other)
            ))),
        }
    }

    /// Ids with a well-formed entry. Malformed entries are left out so the
    /// next build hashes those cards again and overwrites them.
    pub fn known_ids(&self) -> Result<HashSet<String>> {
        Ok(self
            .read_raw()?
            .into_iter()
            .filter(|(_, value)| serde_json::from_value::<Fingerprint>(value.clone()).is_ok())
            .map(|(id, _)| id)
            .collect())
    }

    /// Load all well-formed entries. The store must exist.
    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub fn load_entries(&self) -> Result<StoreEntries> {
        if !self.exists() {
            return Err(CardsortError::StoreError(format!(
                "Fingerprint store not found: {}",
                self.path.display()
            )));
        }

        let mut loaded = StoreEntries::default();
        for (id, value) in self.read_raw()? {
            match serde_json::from_value::<Fingerprint>(value) {
                Ok(fingerprint) => loaded.entries.push((id, fingerprint)),
                Err(e) => {
                    debug!(card_id = %id, error = %e, "Invalid hash entry, skipping");
                    loaded.malformed += 1;
                }
            }
        }

        if loaded.malformed > 0 {
            warn!(malformed = loaded.malformed, "Skipped malformed fingerprint entries");
        }
        info!(entries = loaded.entries.len(), "Fingerprint store loaded");
        Ok(loaded)
    }

    /// Merge fingerprints into the persisted store.
    ///
    /// The store is re-read immediately before writing; entries not named in
    /// `fingerprints` are preserved untouched.
    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub fn merge(
        &self,
        fingerprints: impl IntoIterator<Item = (String, Fingerprint)>,
    ) -> Result<MergeReport> {
        let mut current = self.read_raw()?;
        let mut report = MergeReport::default();

        for (id, fingerprint) in fingerprints {
            let value = serde_json::to_value(fingerprint)?;
            match current.insert(id, value) {
                Some(_) => report.replaced += 1,
                None => report.added += 1,
            }
        }

        report.total = current.len();
        self.write_raw(&current)?;
        info!(
            added = report.added,
            replaced = report.replaced,
            total = report.total,
            "Fingerprint store updated"
        );
        Ok(report)
    }

    fn write_raw(&self, map: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let tmp = self.temp_path();
        let json = serde_json::to_vec_pretty(map)?;
        {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            CardsortError::StoreError(format!(
                "Failed to replace {}: {e}",
                self.path.display()
            ))
        })
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::{ChannelHash, HASH_BYTES};

    fn fingerprint(byte: u8) -> Fingerprint {
        let hash = ChannelHash::from_bytes([byte; HASH_BYTES]);
        Fingerprint {
            red: hash,
            green: hash,
            blue: hash,
        }
    }

    #[test]
    fn test_missing_store_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FingerprintStore::new(dir.path().join("hashes.json"));
        assert!(store.read_raw().unwrap().is_empty());
        assert!(store.known_ids().unwrap().is_empty());
        assert!(store.load_entries().is_err());
    }

    #[test]
    fn test_load_skips_malformed_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hashes.json");
        let good = "ab".repeat(32);
        let json = serde_json::json!({
            "good": {"r_phash": good, "g_phash": good, "b_phash": good},
            "short": {"r_phash": "abc", "g_phash": good, "b_phash": good},
            "missing": {"r_phash": good, "g_phash": good},
            "null": null
        });
        std::fs::write(&path, serde_json::to_vec(&json).unwrap()).unwrap();

        let store = FingerprintStore::new(&path);
        let loaded = store.load_entries().unwrap();
        assert_eq!(loaded.entries.len(), 1);
        assert_eq!(loaded.entries[0].0, "good");
        assert_eq!(loaded.malformed, 3);
        let known = store.known_ids().unwrap();
        assert_eq!(known.len(), 1);
        assert!(known.contains("good"));
    }

    #[test]
    fn test_merge_preserves_existing_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hashes.json");
        std::fs::write(&path, r#"{"legacy": {"r_phash": "not-a-hash"}}"#).unwrap();

        let store = FingerprintStore::new(&path);
        let report = store
            .merge(vec![("a".to_string(), fingerprint(1)), ("b".to_string(), fingerprint(2))])
            .unwrap();
        assert_eq!(report.added, 2);
        assert_eq!(report.replaced, 0);
        assert_eq!(report.total, 3);

        let raw = store.read_raw().unwrap();
        assert_eq!(raw["legacy"]["r_phash"], "not-a-hash");

        let report = store.merge(vec![("a".to_string(), fingerprint(9))]).unwrap();
        assert_eq!(report.replaced, 1);
        assert_eq!(report.total, 3);

        let loaded = store.load_entries().unwrap();
        let a = loaded.entries.iter().find(|(id, _)| id == "a").unwrap();
        assert_eq!(a.1, fingerprint(9));
        assert!(!dir.path().join("hashes.json.tmp").exists());
    }

    #[test]
    fn test_non_object_store_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hashes.json");
        std::fs::write(&path, "[1, 2]").unwrap();
        let err = FingerprintStore::new(&path).read_raw().unwrap_err();
        assert!(matches!(err, CardsortError::StoreError(_)));
    }

    #[test]
    fn test_ensure_exists_creates_empty_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = FingerprintStore::new(dir.path().join("nested").join("hashes.json"));
        store.ensure_exists().unwrap();
        assert!(store.exists());
        assert!(store.load_entries().unwrap().entries.is_empty());
    }
}
