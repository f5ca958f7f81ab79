//! Triple → provenance index built from checkpoint records.
//!
//! Persisted as a JSON object keyed by the triple literal
//! (`("subject", "relation", "object")`), each value the list of tags that
//! produced the triple.

use std::collections::BTreeMap;
use std::path::Path;

use crate::checkpoint::ChunkRecord;
use crate::error::IndexError;
use crate::graph::Triple;
use crate::paths::write_atomic;
use crate::provenance::{self, ProvenanceTag};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceIndex {
    entries: BTreeMap<Triple, Vec<ProvenanceTag>>,
}

impl SourceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `triple` was observed under `tag`. Returns whether it changed.
    pub fn insert(&mut self, triple: Triple, tag: ProvenanceTag) -> bool {
        provenance::accumulate(self.entries.entry(triple).or_default(), &tag)
    }

    pub fn get(&self, triple: &Triple) -> Option<&[ProvenanceTag]> {
        self.entries.get(triple).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Triple, &[ProvenanceTag])> {
        self.entries.iter().map(|(t, tags)| (t, tags.as_slice()))
    }

    /// Index every relation of every record under that record's tag.
    pub fn from_checkpoints<'a>(records: impl IntoIterator<Item = &'a ChunkRecord>) -> Self {
        let mut index = Self::new();
        for record in records {
            for triple in &record.graph.relations {
                index.insert(triple.clone(), record.tags.clone());
            }
        }
        tracing::info!(triples = index.len(), "source index built");
        index
    }

    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        let keyed: BTreeMap<String, &Vec<ProvenanceTag>> = self
            .entries
            .iter()
            .map(|(t, tags)| (t.to_literal(), tags))
            .collect();
        let json = serde_json::to_vec_pretty(&keyed).map_err(|e| IndexError::Serialization {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        write_atomic(path, &json).map_err(|source| IndexError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, IndexError> {
        let content = std::fs::read_to_string(path).map_err(|source| IndexError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let keyed: BTreeMap<String, Vec<ProvenanceTag>> =
            serde_json::from_str(&content).map_err(|e| IndexError::Serialization {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        let entries = keyed
            .into_iter()
            .map(|(key, tags)| Ok((Triple::parse_literal(&key)?, tags)))
            .collect::<Result<_, IndexError>>()?;
        Ok(Self { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{content_hash, file_name};
    use crate::graph::Graph;

    fn record(text: &str, triples: &[(&str, &str, &str)]) -> ChunkRecord {
        let hash = content_hash(text);
        let mut graph = Graph::new();
        for (s, r, o) in triples {
            graph.insert_relation(Triple::new(*s, *r, *o));
        }
        ChunkRecord {
            text: text.into(),
            tags: ProvenanceTag::new(file_name(&hash)).with_document("fema.pdf"),
            hash,
            time: 0.5,
            graph,
            errors: None,
        }
    }

    #[test]
    fn builds_from_records_accumulating_sources() {
        let a = record("chunk a", &[("FEMA", "aids", "Texas"), ("FEMA", "runs", "NIMS")]);
        let b = record("chunk b", &[("FEMA", "aids", "Texas")]);
        let index = SourceIndex::from_checkpoints([&a, &b, &a]);

        assert_eq!(index.len(), 2);
        assert_eq!(
            index.get(&Triple::new("FEMA", "aids", "Texas")).unwrap(),
            &[a.tags.clone(), b.tags.clone()]
        );
        assert_eq!(
            index.get(&Triple::new("FEMA", "runs", "NIMS")).unwrap(),
            &[a.tags.clone()]
        );
    }

    #[test]
    fn save_then_load_is_identity() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("index.json");
        let mut index = SourceIndex::new();
        index.insert(
            Triple::new("Smith, \"J\"", "works (at)", "O'Neil"),
            ProvenanceTag::new("chunk-1.json").with_pages(1, 2),
        );
        index.insert(Triple::new("a", "r", "b"), ProvenanceTag::new("chunk-2.json"));
        index.save(&path).unwrap();

        assert_eq!(SourceIndex::load(&path).unwrap(), index);
        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(raw.get("(\"a\", \"r\", \"b\")").is_some());
    }

    #[test]
    fn malformed_key_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("index.json");
        std::fs::write(&path, r#"{"a, r, b": []}"#).unwrap();
        assert!(matches!(
            SourceIndex::load(&path),
            Err(IndexError::MalformedKey { .. })
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(matches!(
            SourceIndex::load(&dir.path().join("nope.json")),
            Err(IndexError::Io { .. })
        ));
    }
}
