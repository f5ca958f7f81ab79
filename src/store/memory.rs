//! In-process graph store.

use std::path::Path;
use std::sync::Mutex;

use crate::graph::index::KnowledgeGraph;
use crate::graph::traverse::{self, Direction, Neighbor};
use crate::graph::{TaggedGraph, Triple};
use crate::provenance::ProvenanceTag;

use super::durable::DurableGraph;
use super::{GraphStore, StoreResult};

/// petgraph-backed store, optionally mirrored to redb.
///
/// With a durable mirror, every write commits to redb first and then applies
/// to memory under one lock, so both views see the same merge order.
pub struct MemoryGraphStore {
    graph: KnowledgeGraph,
    durable: Option<DurableGraph>,
    write_lock: Mutex<()>,
}

impl MemoryGraphStore {
    /// A volatile store.
    pub fn new() -> Self {
        Self {
            graph: KnowledgeGraph::new(),
            durable: None,
            write_lock: Mutex::new(()),
        }
    }

    /// A store persisted under `data_dir`, loading whatever is already there.
    pub fn open(data_dir: &Path) -> StoreResult<Self> {
        let durable = DurableGraph::open(data_dir)?;
        let graph = KnowledgeGraph::new();
        let loaded = graph.bulk_load(&durable.load_all()?);
        tracing::info!(
            path = %data_dir.display(),
            elements = loaded,
            "opened persistent memory store"
        );
        Ok(Self {
            graph,
            durable: Some(durable),
            write_lock: Mutex::new(()),
        })
    }

    /// Build a volatile store from a snapshot.
    pub fn from_snapshot(snapshot: &TaggedGraph) -> Self {
        let store = Self::new();
        store.graph.bulk_load(snapshot);
        store
    }

    /// The underlying in-memory graph.
    pub fn graph(&self) -> &KnowledgeGraph {
        &self.graph
    }

    pub fn is_persistent(&self) -> bool {
        self.durable.is_some()
    }
}

impl Default for MemoryGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryGraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryGraphStore")
            .field("graph", &self.graph)
            .field("persistent", &self.is_persistent())
            .finish()
    }
}

impl GraphStore for MemoryGraphStore {
    fn backend(&self) -> &str {
        "memory"
    }

    fn k_hop_neighbors(
        &self,
        entity: &str,
        k: usize,
        direction: Direction,
    ) -> StoreResult<Vec<Neighbor>> {
        Ok(traverse::k_hop_paths(&self.graph, entity, k, direction))
    }

    fn upsert_entity(&self, id: &str, tag: Option<&ProvenanceTag>) -> StoreResult<bool> {
        let _guard = self.write_lock.lock().expect("store write lock poisoned");
        if let Some(db) = &self.durable {
            db.upsert_entity(id, tag)?;
        }
        Ok(self.graph.upsert_entity(id, tag))
    }

    fn upsert_relation(&self, triple: &Triple, tag: Option<&ProvenanceTag>) -> StoreResult<bool> {
        let _guard = self.write_lock.lock().expect("store write lock poisoned");
        if let Some(db) = &self.durable {
            db.upsert_relation(triple, tag)?;
        }
        Ok(self.graph.upsert_relation(triple, tag))
    }

    fn clear(&self) -> StoreResult<()> {
        let _guard = self.write_lock.lock().expect("store write lock poisoned");
        if let Some(db) = &self.durable {
            db.clear()?;
        }
        self.graph.clear();
        Ok(())
    }

    fn snapshot(&self) -> StoreResult<TaggedGraph> {
        Ok(self.graph.snapshot())
    }
}
