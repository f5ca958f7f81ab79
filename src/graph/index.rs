//! In-memory tagged entity graph.
//!
//! Uses `petgraph` for the graph structure and `DashMap` for O(1) lookups of
//! entity nodes and relation edges. Every entity and every relation edge owns
//! its list of provenance tags.

use std::sync::{RwLock, RwLockReadGuard};

use dashmap::DashMap;
use petgraph::Direction;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;

use crate::provenance::{self, ProvenanceTag};

use super::{TaggedGraph, Triple};

/// Edge weight: relation label plus the tags it was observed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeData {
    pub relation: String,
    pub tags: Vec<ProvenanceTag>,
}

/// In-memory entity graph backed by petgraph.
///
/// Structural writes (new nodes, new edges, edge tag appends) happen under the
/// graph write lock, which also serializes concurrent upserts of the same
/// relation. Entity tag appends go through the `DashMap` entry lock.
pub struct KnowledgeGraph {
    /// Directed graph: nodes are entity ids, edges carry [`EdgeData`].
    graph: RwLock<DiGraph<String, EdgeData>>,
    /// Entity id → NodeIndex.
    node_index: DashMap<String, NodeIndex>,
    /// Triple → EdgeIndex. Only touched while holding the graph lock.
    edge_index: DashMap<Triple, EdgeIndex>,
    /// Entity id → accumulated tags.
    entity_tags: DashMap<String, Vec<ProvenanceTag>>,
}

impl KnowledgeGraph {
    pub fn new() -> Self {
        Self {
            graph: RwLock::new(DiGraph::new()),
            node_index: DashMap::new(),
            edge_index: DashMap::new(),
            entity_tags: DashMap::new(),
        }
    }

    fn node_in(
        graph: &mut DiGraph<String, EdgeData>,
        node_index: &DashMap<String, NodeIndex>,
        id: &str,
    ) -> NodeIndex {
        if let Some(idx) = node_index.get(id) {
            return *idx.value();
        }
        let idx = graph.add_node(id.to_string());
        node_index.insert(id.to_string(), idx);
        idx
    }

    /// Ensure a node exists for the entity, returning its NodeIndex.
    fn ensure_node(&self, id: &str) -> NodeIndex {
        if let Some(idx) = self.node_index.get(id) {
            return *idx.value();
        }
        let mut graph = self.graph.write().expect("graph lock poisoned");
        Self::node_in(&mut graph, &self.node_index, id)
    }

    /// Create the entity if needed and append `tag` if not already present.
    ///
    /// Returns whether anything changed.
    pub fn upsert_entity(&self, id: &str, tag: Option<&ProvenanceTag>) -> bool {
        let created = !self.node_index.contains_key(id);
        self.ensure_node(id);
        let mut entry = self.entity_tags.entry(id.to_string()).or_default();
        let appended = tag.is_some_and(|t| provenance::accumulate(entry.value_mut(), t));
        created || appended
    }

    /// Create the relation edge (and its endpoints) if needed and append `tag`.
    ///
    /// Returns whether anything changed.
    pub fn upsert_relation(&self, triple: &Triple, tag: Option<&ProvenanceTag>) -> bool {
        let mut graph = self.graph.write().expect("graph lock poisoned");
        let existing = self.edge_index.get(triple).map(|e| *e.value());
        if let Some(ei) = existing {
            return match (graph.edge_weight_mut(ei), tag) {
                (Some(edge), Some(t)) => provenance::accumulate(&mut edge.tags, t),
                _ => false,
            };
        }

        let s = Self::node_in(&mut graph, &self.node_index, &triple.subject);
        let o = Self::node_in(&mut graph, &self.node_index, &triple.object);
        drop_none(self.entity_tags.entry(triple.subject.clone()).or_default());
        drop_none(self.entity_tags.entry(triple.object.clone()).or_default());
        let edge = EdgeData {
            relation: triple.relation.clone(),
            tags: tag.into_iter().cloned().collect(),
        };
        let ei = graph.add_edge(s, o, edge);
        self.edge_index.insert(triple.clone(), ei);
        true
    }

    /// Check if an entity exists.
    pub fn has_node(&self, id: &str) -> bool {
        self.node_index.contains_key(id)
    }

    /// NodeIndex of an entity, if present.
    pub fn node_of(&self, id: &str) -> Option<NodeIndex> {
        self.node_index.get(id).map(|idx| *idx.value())
    }

    /// Number of entities.
    pub fn node_count(&self) -> usize {
        self.node_index.len()
    }

    /// Number of relation edges.
    pub fn relation_count(&self) -> usize {
        self.edge_index.len()
    }

    /// Accumulated tags of an entity.
    pub fn entity_tags(&self, id: &str) -> Vec<ProvenanceTag> {
        self.entity_tags
            .get(id)
            .map(|t| t.value().clone())
            .unwrap_or_default()
    }

    /// Accumulated tags of a relation, `None` if the relation is unknown.
    pub fn relation_tags(&self, triple: &Triple) -> Option<Vec<ProvenanceTag>> {
        let graph = self.graph.read().expect("graph lock poisoned");
        let ei = self.edge_index.get(triple).map(|e| *e.value())?;
        graph.edge_weight(ei).map(|e| e.tags.clone())
    }

    /// Outgoing relations of an entity with their tags.
    pub fn triples_from(&self, subject: &str) -> Vec<(Triple, Vec<ProvenanceTag>)> {
        let graph = self.graph.read().expect("graph lock poisoned");
        let Some(idx) = self.node_of(subject) else {
            return vec![];
        };
        graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|e| {
                let object = graph[e.target()].clone();
                let data = e.weight();
                (
                    Triple::new(subject, data.relation.clone(), object),
                    data.tags.clone(),
                )
            })
            .collect()
    }

    /// Read access to the underlying petgraph for traversal.
    pub fn graph(&self) -> RwLockReadGuard<'_, DiGraph<String, EdgeData>> {
        self.graph.read().expect("graph lock poisoned")
    }

    /// Remove every entity and relation.
    pub fn clear(&self) {
        let mut graph = self.graph.write().expect("graph lock poisoned");
        graph.clear();
        self.node_index.clear();
        self.edge_index.clear();
        self.entity_tags.clear();
    }

    /// Copy out every entity and relation with its tags.
    pub fn snapshot(&self) -> TaggedGraph {
        let graph = self.graph.read().expect("graph lock poisoned");
        let mut out = TaggedGraph::default();
        for idx in graph.node_indices() {
            let id = graph[idx].clone();
            let tags = self.entity_tags(&id);
            out.entities.insert(id, tags);
        }
        for e in graph.edge_references() {
            let triple = Triple::new(
                graph[e.source()].clone(),
                e.weight().relation.clone(),
                graph[e.target()].clone(),
            );
            out.relations.insert(triple, e.weight().tags.clone());
        }
        out
    }

    /// Load a snapshot, merging tags into anything already present.
    pub fn bulk_load(&self, snapshot: &TaggedGraph) -> usize {
        let mut count = 0;
        for (id, tags) in &snapshot.entities {
            self.upsert_entity(id, None);
            for tag in tags {
                self.upsert_entity(id, Some(tag));
            }
            count += 1;
        }
        for (triple, tags) in &snapshot.relations {
            self.upsert_relation(triple, None);
            for tag in tags {
                self.upsert_relation(triple, Some(tag));
            }
            count += 1;
        }
        count
    }
}

/// Release a DashMap entry guard immediately; used to create empty tag lists.
fn drop_none<T>(_guard: T) {}

impl Default for KnowledgeGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for KnowledgeGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeGraph")
            .field("entities", &self.node_count())
            .field("relations", &self.relation_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(id: &str) -> ProvenanceTag {
        ProvenanceTag::new(format!("chunk-{id}.json"))
    }

    #[test]
    fn insert_and_query() {
        let kg = KnowledgeGraph::new();
        let t = Triple::new("Sun", "is a", "Star");
        assert!(kg.upsert_relation(&t, Some(&tag("a"))));

        assert!(kg.has_node("Sun"));
        assert!(kg.has_node("Star"));
        assert_eq!(kg.node_count(), 2);
        assert_eq!(kg.relation_count(), 1);

        let out = kg.triples_from("Sun");
        assert_eq!(out, vec![(t, vec![tag("a")])]);
    }

    #[test]
    fn relation_tags_accumulate_idempotently() {
        let kg = KnowledgeGraph::new();
        let t = Triple::new("a", "r", "b");
        kg.upsert_relation(&t, Some(&tag("1")));
        assert!(!kg.upsert_relation(&t, Some(&tag("1"))));
        assert!(kg.upsert_relation(&t, Some(&tag("2"))));

        assert_eq!(kg.relation_tags(&t).unwrap(), vec![tag("1"), tag("2")]);
        assert_eq!(kg.relation_count(), 1);
    }

    #[test]
    fn entity_tags_accumulate_idempotently() {
        let kg = KnowledgeGraph::new();
        assert!(kg.upsert_entity("FEMA", Some(&tag("1"))));
        assert!(!kg.upsert_entity("FEMA", Some(&tag("1"))));
        assert_eq!(kg.entity_tags("FEMA"), vec![tag("1")]);
    }

    #[test]
    fn parallel_relations_are_distinct_edges() {
        let kg = KnowledgeGraph::new();
        kg.upsert_relation(&Triple::new("a", "r1", "b"), None);
        kg.upsert_relation(&Triple::new("a", "r2", "b"), None);
        assert_eq!(kg.relation_count(), 2);
        assert_eq!(kg.triples_from("a").len(), 2);
    }

    #[test]
    fn snapshot_and_bulk_load_round_trip() {
        let kg = KnowledgeGraph::new();
        kg.upsert_entity("lonely", Some(&tag("x")));
        kg.upsert_relation(&Triple::new("a", "r", "b"), Some(&tag("y")));

        let snap = kg.snapshot();
        let copy = KnowledgeGraph::new();
        copy.bulk_load(&snap);
        assert_eq!(copy.snapshot(), snap);
    }

    #[test]
    fn clear_empties_everything() {
        let kg = KnowledgeGraph::new();
        kg.upsert_relation(&Triple::new("a", "r", "b"), None);
        kg.clear();
        assert_eq!(kg.node_count(), 0);
        assert_eq!(kg.relation_count(), 0);
        assert!(kg.triples_from("a").is_empty());
    }
}
