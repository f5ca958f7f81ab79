//! Content-addressed checkpoints: one JSON record per processed chunk.
//!
//! A record is stored as `chunk-<md5 of text>.json`. Re-processing a chunk
//! whose checkpoint exists and holds the same text reuses the record; a
//! checkpoint holding different text is a [`CheckpointError::Collision`] that
//! needs an operator to resolve.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CheckpointError;
use crate::graph::Graph;
use crate::paths::write_atomic;
use crate::provenance::ProvenanceTag;

/// The persisted outcome of processing one chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub text: String,
    /// MD5 hex digest of `text`.
    pub hash: String,
    /// Extraction time in seconds.
    pub time: f64,
    pub graph: Graph,
    /// Checkpoint id plus document metadata; applied to everything in `graph`.
    pub tags: ProvenanceTag,
    /// Why extraction failed, when the chunk was kept with an empty graph.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<String>,
}

/// MD5 hex digest of chunk text.
pub fn content_hash(text: &str) -> String {
    format!("{:x}", md5::compute(text.as_bytes()))
}

/// Checkpoint file name for a hash.
pub fn file_name(hash: &str) -> String {
    format!("chunk-{hash}.json")
}

/// Mean and median extraction time over stored records.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ProcessingStats {
    pub chunks: usize,
    pub failed: usize,
    pub mean_secs: f64,
    pub median_secs: f64,
}

/// Directory of checkpoint records.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> CheckpointError + '_ {
        move |source| CheckpointError::Io {
            path: path.display().to_string(),
            source,
        }
    }

    /// Accepts `chunk-<hash>.json`, `chunk-<hash>` or a bare hash.
    ///
    /// Anything that is not a hex digest is rejected, so ids taken from a
    /// request can never name a path outside the directory.
    fn hash_of(id: &str) -> Option<&str> {
        let id = id.strip_prefix("chunk-").unwrap_or(id);
        let id = id.strip_suffix(".json").unwrap_or(id);
        (!id.is_empty() && id.chars().all(|c| c.is_ascii_hexdigit())).then_some(id)
    }

    pub fn path_for(&self, hash: &str) -> PathBuf {
        self.dir.join(file_name(hash))
    }

    /// Load a record by checkpoint id. `None` if it does not exist.
    pub fn load(&self, id: &str) -> Result<Option<ChunkRecord>, CheckpointError> {
        let Some(hash) = Self::hash_of(id) else {
            return Ok(None);
        };
        let path = self.path_for(hash);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Self::io_err(&path)(e)),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| CheckpointError::Serialization {
                path: path.display().to_string(),
                message: e.to_string(),
            })
    }

    /// The stored record for `text`, if one exists.
    ///
    /// A checkpoint with the same hash but different text is a collision.
    pub fn lookup(&self, text: &str) -> Result<Option<ChunkRecord>, CheckpointError> {
        let hash = content_hash(text);
        match self.load(&hash)? {
            Some(record) if record.text == text => Ok(Some(record)),
            Some(_) => Err(CheckpointError::Collision {
                path: self.path_for(&hash).display().to_string(),
                hash,
            }),
            None => Ok(None),
        }
    }

    /// Persist a record atomically under its hash.
    pub fn save(&self, record: &ChunkRecord) -> Result<PathBuf, CheckpointError> {
        let path = self.path_for(&record.hash);
        let json =
            serde_json::to_vec_pretty(record).map_err(|e| CheckpointError::Serialization {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        write_atomic(&path, &json).map_err(Self::io_err(&path))?;
        Ok(path)
    }

    /// Checkpoint file names, sorted.
    pub fn ids(&self) -> Result<Vec<String>, CheckpointError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(Self::io_err(&self.dir)(e)),
        };
        let mut ids: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|name| name.starts_with("chunk-") && name.ends_with(".json"))
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Every stored record, in id order.
    pub fn records(&self) -> Result<Vec<ChunkRecord>, CheckpointError> {
        let mut out = Vec::new();
        for id in self.ids()? {
            if let Some(record) = self.load(&id)? {
                out.push(record);
            }
        }
        Ok(out)
    }

    /// Timing summary over every stored record.
    pub fn stats(&self) -> Result<ProcessingStats, CheckpointError> {
        let records = self.records()?;
        let failed = records.iter().filter(|r| r.errors.is_some()).count();
        let mut times: Vec<f64> = records.iter().map(|r| r.time).collect();
        if times.is_empty() {
            return Ok(ProcessingStats::default());
        }
        times.sort_by(f64::total_cmp);
        Ok(ProcessingStats {
            chunks: times.len(),
            failed,
            mean_secs: times.iter().sum::<f64>() / times.len() as f64,
            median_secs: times[times.len() / 2],
        })
    }
}
