//! On-disk image store layout.
//!
//! Images live at `<root>/<c>/<card id>.png`, where `c` is the first
//! character of the id. Card ids are UUIDs, so `c` is one of sixteen hex
//! digits and no directory grows past a sixteenth of the catalog.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::Result;

const SHARDS: &str = "0123456789abcdef";

#[derive(Debug, Clone)]
pub struct ImageStore {
    root: PathBuf,
}

impl ImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn shard_dir(&self, card_id: &str) -> PathBuf {
        let shard = card_id
            .chars()
            .next()
            .map(|c| c.to_ascii_lowercase().to_string())
            .unwrap_or_else(|| "_".to_string());
        self.root.join(shard)
    }

    pub fn path_for(&self, card_id: &str) -> PathBuf {
        self.shard_dir(card_id).join(format!("{card_id}.png"))
    }

    /// Size of the stored image, if present.
    pub fn stored_size(&self, card_id: &str) -> Option<u64> {
        std::fs::metadata(self.path_for(card_id))
            .ok()
            .filter(|m| m.is_file())
            .map(|m| m.len())
    }

    /// Ids of every image in the sixteen shard directories.
    pub fn existing_ids(&self) -> Result<HashSet<String>> {
        let mut ids = HashSet::new();
        for shard in SHARDS.chars() {
            let dir = self.root.join(shard.to_string());
            if !dir.is_dir() {
                continue;
            }
            for entry in std::fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.extension().is_some_and(|e| e == "png") {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        ids.insert(stem.to_string());
                    }
                }
            }
        }
        Ok(ids)
    }

    /// Move flat `*.png` files in the root into their shard directories.
    ///
    /// Returns the number of files moved. Files whose name does not start
    /// with a hex digit are left in place.
    pub fn organize(&self) -> Result<usize> {
        if !self.root.is_dir() {
            return Ok(0);
        }
        for shard in SHARDS.chars() {
            std::fs::create_dir_all(self.root.join(shard.to_string()))?;
        }

        let mut moved = 0usize;
        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            if !path.is_file() || !path.extension().is_some_and(|e| e == "png") {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(first) = name.chars().next().map(|c| c.to_ascii_lowercase()) else {
                continue;
            };
            if !SHARDS.contains(first) {
                continue;
            }

            let target = self.root.join(first.to_string()).join(name);
            match std::fs::rename(&path, &target) {
                Ok(()) => moved += 1,
                Err(e) => warn!(file = %path.display(), error = %e, "Failed to move image"),
            }
        }

        info!(root = %self.root.display(), moved, "Organized images into shard directories");
        Ok(moved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_paths() {
        let store = ImageStore::new("/images");
        assert_eq!(
            store.path_for("A1b2"),
            PathBuf::from("/images/a/A1b2.png")
        );
    }

    #[test]
    fn test_organize_and_scan() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::new(dir.path());
        std::fs::write(dir.path().join("0abc.png"), b"x").unwrap();
        std::fs::write(dir.path().join("f123.png"), b"x").unwrap();
        std::fs::write(dir.path().join("zzz.png"), b"x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        assert_eq!(store.organize().unwrap(), 2);
        assert!(dir.path().join("0").join("0abc.png").is_file());
        assert!(dir.path().join("f").join("f123.png").is_file());
        assert!(dir.path().join("zzz.png").is_file());

        let ids = store.existing_ids().unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains("0abc") && ids.contains("f123"));
        assert_eq!(store.stored_size("f123"), Some(1));
        assert_eq!(store.stored_size("0000"), None);
    }

    #[test]
    fn test_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::new(dir.path().join("absent"));
        assert!(store.existing_ids().unwrap().is_empty());
        assert_eq!(store.organize().unwrap(), 0);
    }
}
