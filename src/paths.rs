//! On-disk layout of a kgscope data directory.
//!
//! ```text
//! <data_dir>/
//!   chunks/chunk-<md5>.json   one checkpoint record per processed chunk
//!   graph.json                aggregate of every chunk graph
//!   index.json                triple → provenance index
//!   labels.json               label tree cache
//!   db/graph.redb             persistent memory store
//! ```

use std::io::Write;
use std::path::{Path, PathBuf};

/// Paths derived from one data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    pub root: PathBuf,
    /// `root/chunks/`
    pub chunks_dir: PathBuf,
    /// `root/graph.json`
    pub graph_file: PathBuf,
    /// `root/index.json`
    pub index_file: PathBuf,
    /// `root/labels.json`
    pub labels_file: PathBuf,
    /// `root/db/`
    pub db_dir: PathBuf,
}

impl DataPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            chunks_dir: root.join("chunks"),
            graph_file: root.join("graph.json"),
            index_file: root.join("index.json"),
            labels_file: root.join("labels.json"),
            db_dir: root.join("db"),
            root,
        }
    }

    /// Create the data and checkpoint directories. Idempotent.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(&self.chunks_dir)
    }
}

/// Write `contents` to a sibling temp file, then rename over `path`.
///
/// Readers see either the old file or the new one, never a partial write.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);
    {
        let mut f = std::fs::File::create(&tmp)?;
        f.write_all(contents)?;
        f.sync_all()?;
    }
    std::fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_derive_from_root() {
        let paths = DataPaths::new("/data/kg");
        assert_eq!(paths.chunks_dir, PathBuf::from("/data/kg/chunks"));
        assert_eq!(paths.index_file, PathBuf::from("/data/kg/index.json"));
        assert_eq!(paths.labels_file, PathBuf::from("/data/kg/labels.json"));
        assert_eq!(paths.db_dir, PathBuf::from("/data/kg/db"));
    }

    #[test]
    fn atomic_write_replaces_and_leaves_no_temp() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested/out.json");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"two");
        assert!(!dir.path().join("nested/out.json.tmp").exists());
    }
}
