//! Checksums of prototype source files, used to detect changes on reload

use sha2::{Digest, Sha256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// SHA256 checksum of file content
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum(String);

impl Checksum {
    /// Compute checksum from raw bytes
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        Self(format!("{:x}", hash))
    }

    /// Compute checksum from text
    pub fn of_text(content: &str) -> Self {
        Self::from_bytes(content.as_bytes())
    }

    /// Get the hex string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Verify that content matches this checksum
    pub fn verify(&self, content: &str) -> bool {
        *self == Self::of_text(content)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Checksums of every file read by a directory load
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumTable(BTreeMap<PathBuf, Checksum>);

impl ChecksumTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: PathBuf, checksum: Checksum) {
        self.0.insert(path, checksum);
    }

    pub fn get(&self, path: &Path) -> Option<&Checksum> {
        self.0.get(path)
    }

    pub fn remove(&mut self, path: &Path) -> Option<Checksum> {
        self.0.remove(path)
    }

    /// Whether `content` differs from what was recorded for `path`
    pub fn is_changed(&self, path: &Path, content: &str) -> bool {
        self.0.get(path).map(|c| !c.verify(content)).unwrap_or(true)
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.0.keys().map(PathBuf::as_path)
    }

    pub fn merge(&mut self, other: ChecksumTable) {
        self.0.extend(other.0);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_consistency() {
        let content = "- type: widget\n  id: A\n";
        assert_eq!(Checksum::of_text(content), Checksum::of_text(content));
    }

    #[test]
    fn test_checksum_different_content() {
        assert_ne!(Checksum::of_text("id: A"), Checksum::of_text("id: B"));
    }

    #[test]
    fn test_checksum_verification() {
        let checksum = Checksum::of_text("id: A");
        assert!(checksum.verify("id: A"));
        assert!(!checksum.verify("id: B"));
    }

    #[test]
    fn test_table_change_detection() {
        let mut table = ChecksumTable::new();
        let path = PathBuf::from("widgets.yml");
        assert!(table.is_changed(&path, "id: A"));

        table.insert(path.clone(), Checksum::of_text("id: A"));
        assert!(!table.is_changed(&path, "id: A"));
        assert!(table.is_changed(&path, "id: B"));
    }
}
