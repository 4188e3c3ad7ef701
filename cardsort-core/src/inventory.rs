//! Collection tracker: a line-oriented file of owned card ids.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckIn {
    Added,
    AlreadyOwned,
}

#[derive(Debug)]
pub struct Collection {
    path: PathBuf,
    owned: HashSet<String>,
}

impl Collection {
    /// Open (creating if needed) the collection file.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let owned = match std::fs::read_to_string(&path) {
            Ok(text) => text
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                std::fs::File::create(&path)?;
                HashSet::new()
            }
            Err(e) => return Err(e.into()),
        };

        info!(path = %path.display(), cards = owned.len(), "Collection opened");
        Ok(Self { path, owned })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.owned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owned.is_empty()
    }

    pub fn contains(&self, card_id: &str) -> bool {
        self.owned.contains(card_id)
    }

    /// Record a card, appending it to the file if it is new.
    pub fn check_in(&mut self, card_id: &str) -> Result<CheckIn> {
        if self.owned.contains(card_id) {
            debug!(card_id, "Card already in collection");
            return Ok(CheckIn::AlreadyOwned);
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{card_id}")?;
        self.owned.insert(card_id.to_string());
        debug!(card_id, "Card added to collection");
        Ok(CheckIn::Added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_in_appends_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Collection").join("Collection.txt");

        let mut collection = Collection::open(&path).unwrap();
        assert!(collection.is_empty());
        assert_eq!(collection.check_in("abc").unwrap(), CheckIn::Added);
        assert_eq!(collection.check_in("abc").unwrap(), CheckIn::AlreadyOwned);
        assert_eq!(collection.check_in("def").unwrap(), CheckIn::Added);

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "abc\ndef\n");

        let reopened = Collection::open(&path).unwrap();
        assert_eq!(reopened.len(), 2);
        assert!(reopened.contains("def"));
    }
}
