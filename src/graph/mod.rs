//! Entity-relation graph data model.
//!
//! - [`Triple`]: an ordered (subject, relation, object) fact over string entities
//! - [`Graph`]: set-semantics container produced by one extraction run
//! - [`TaggedGraph`]: a store snapshot where every entity and relation carries
//!   its accumulated provenance tags
//!
//! The in-memory, petgraph-backed index used by the memory store lives in
//! [`index`]; k-hop path enumeration over it lives in [`traverse`].

pub mod index;
pub mod traverse;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, StoreError};
use crate::provenance::ProvenanceTag;

/// A (subject, relation, object) fact.
///
/// Serialized as a three-element JSON array to match extraction output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "(String, String, String)", into = "(String, String, String)")]
pub struct Triple {
    pub subject: String,
    pub relation: String,
    pub object: String,
}

impl Triple {
    pub fn new(
        subject: impl Into<String>,
        relation: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            relation: relation.into(),
            object: object.into(),
        }
    }

    /// Render as a round-trippable literal: `("subject", "relation", "object")`.
    ///
    /// Components use JSON string quoting, so any character survives.
    pub fn to_literal(&self) -> String {
        let quote = |s: &str| serde_json::Value::String(s.to_string()).to_string();
        format!(
            "({}, {}, {})",
            quote(&self.subject),
            quote(&self.relation),
            quote(&self.object)
        )
    }

    /// Parse a literal produced by [`Triple::to_literal`].
    pub fn parse_literal(literal: &str) -> Result<Self, IndexError> {
        let malformed = || IndexError::MalformedKey {
            key: literal.to_string(),
        };
        let inner = literal
            .trim()
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .ok_or_else(malformed)?;
        let parts: [String; 3] =
            serde_json::from_str(&format!("[{inner}]")).map_err(|_| malformed())?;
        let [subject, relation, object] = parts;
        Ok(Self {
            subject,
            relation,
            object,
        })
    }
}

impl From<(String, String, String)> for Triple {
    fn from((subject, relation, object): (String, String, String)) -> Self {
        Self {
            subject,
            relation,
            object,
        }
    }
}

impl From<Triple> for (String, String, String) {
    fn from(t: Triple) -> Self {
        (t.subject, t.relation, t.object)
    }
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} --> {} --> {}", self.subject, self.relation, self.object)
    }
}

/// An extracted graph: entities, relations, and raw edge labels.
///
/// All three collections have set semantics; inserting a duplicate is a no-op.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Graph {
    #[serde(default)]
    pub entities: BTreeSet<String>,
    #[serde(default)]
    pub relations: BTreeSet<Triple>,
    /// Relation labels as extracted, before entity resolution.
    #[serde(default)]
    pub edges: BTreeSet<String>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entity. Returns `false` if it was already present.
    pub fn insert_entity(&mut self, entity: impl Into<String>) -> bool {
        self.entities.insert(entity.into())
    }

    /// Add a relation, its endpoints, and its edge label.
    pub fn insert_relation(&mut self, triple: Triple) -> bool {
        self.entities.insert(triple.subject.clone());
        self.entities.insert(triple.object.clone());
        self.edges.insert(triple.relation.clone());
        self.relations.insert(triple)
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relations.is_empty() && self.edges.is_empty()
    }

    /// Union `other` into `self`.
    pub fn merge(&mut self, other: &Graph) {
        self.entities.extend(other.entities.iter().cloned());
        self.relations.extend(other.relations.iter().cloned());
        self.edges.extend(other.edges.iter().cloned());
    }

    /// Union of many chunk graphs.
    pub fn aggregate<'a>(graphs: impl IntoIterator<Item = &'a Graph>) -> Graph {
        let mut out = Graph::new();
        for g in graphs {
            out.merge(g);
        }
        out
    }

    /// Relations of `self` that are absent from `big`.
    pub fn missing_relations<'a>(&'a self, big: &Graph) -> Vec<&'a Triple> {
        self.relations
            .iter()
            .filter(|r| !big.relations.contains(*r))
            .collect()
    }

    /// Write as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io { source: e })?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| StoreError::Serialization {
            message: format!("failed to serialize graph: {e}"),
        })?;
        std::fs::write(path, json).map_err(|e| StoreError::Io { source: e })
    }

    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let content = std::fs::read_to_string(path).map_err(|e| StoreError::Io { source: e })?;
        serde_json::from_str(&content).map_err(|e| StoreError::Serialization {
            message: format!("failed to parse graph {}: {e}", path.display()),
        })
    }
}

/// Snapshot of a graph store with accumulated tags on every element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaggedGraph {
    pub entities: BTreeMap<String, Vec<ProvenanceTag>>,
    pub relations: BTreeMap<Triple, Vec<ProvenanceTag>>,
}

impl TaggedGraph {
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn relation_count(&self) -> usize {
        self.relations.len()
    }

    /// Tags of an entity, empty if unknown.
    pub fn tags_of(&self, entity: &str) -> &[ProvenanceTag] {
        self.entities.get(entity).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_graph() -> Graph {
        let mut g = Graph::new();
        g.insert_relation(Triple::new("Bianca", "EDGE", "Portia"));
        g.insert_relation(Triple::new("Portia", "EDGE", "Fabian"));
        g.insert_entity("Loner");
        g
    }

    #[test]
    fn duplicate_insertion_is_noop() {
        let mut g = sample_graph();
        assert!(!g.insert_entity("Bianca"));
        assert!(!g.insert_relation(Triple::new("Bianca", "EDGE", "Portia")));
        assert_eq!(g.entities.len(), 4);
        assert_eq!(g.relations.len(), 2);
    }

    #[test]
    fn save_then_load_preserves_graph() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested/graph.json");
        let g = sample_graph();
        g.save(&path).unwrap();
        assert_eq!(Graph::load(&path).unwrap(), g);
    }

    #[test]
    fn relations_serialize_as_arrays() {
        let mut g = Graph::new();
        g.insert_relation(Triple::new("a", "r", "b"));
        let json = serde_json::to_value(&g).unwrap();
        assert_eq!(json["relations"][0], serde_json::json!(["a", "r", "b"]));
    }

    #[test]
    fn aggregate_and_missing_relations() {
        let mut a = Graph::new();
        a.insert_relation(Triple::new("x", "r", "y"));
        let mut b = Graph::new();
        b.insert_relation(Triple::new("y", "r", "z"));

        let all = Graph::aggregate([&a, &b]);
        assert_eq!(all.relations.len(), 2);
        assert!(a.missing_relations(&all).is_empty());
        assert_eq!(all.missing_relations(&a).len(), 1);
    }

    #[test]
    fn literal_round_trip_with_awkward_text() {
        let t = Triple::new("Smith, \"J\"", "works (at)", "O'Neil & Co");
        let lit = t.to_literal();
        assert_eq!(Triple::parse_literal(&lit).unwrap(), t);
    }

    #[test]
    fn malformed_literal_is_rejected() {
        assert!(Triple::parse_literal("a, r, b").is_err());
        assert!(Triple::parse_literal("(\"a\", \"r\")").is_err());
    }

    proptest! {
        #[test]
        fn save_then_load_is_identity(
            rels in proptest::collection::vec(("[a-zA-Z ]{1,8}", "[a-z_ ]{1,6}", "[a-zA-Z ]{1,8}"), 0..12),
            extra in proptest::collection::vec("[a-zA-Z]{1,8}", 0..5),
        ) {
            let mut g = Graph::new();
            for (s, r, o) in rels {
                g.insert_relation(Triple::new(s, r, o));
            }
            for e in extra {
                g.insert_entity(e);
            }
            let dir = tempfile::TempDir::new().unwrap();
            let path = dir.path().join("g.json");
            g.save(&path).unwrap();
            prop_assert_eq!(Graph::load(&path).unwrap(), g);
        }
    }
}
