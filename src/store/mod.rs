//! Graph storage behind a narrow traversal + upsert interface.
//!
//! Two backends implement [`GraphStore`], chosen once when the store is
//! opened (see [`open_store`]):
//!
//! - [`MemoryGraphStore`]: petgraph in memory, optionally mirrored to redb
//! - [`Neo4jGraphStore`]: Cypher over Bolt via `neo4rs`
//!
//! Store calls are single blocking round trips with no internal retries.
//! Writes merge provenance tags (create with `[tag]`, else append if absent).

pub mod durable;
pub mod memory;
pub mod neo4j;

use std::path::Path;
use std::sync::Arc;

use crate::config::StoreBackend;
use crate::error::StoreError;
use crate::graph::{Graph, TaggedGraph, Triple};
use crate::provenance::ProvenanceTag;

pub use crate::graph::traverse::{Direction, Neighbor};
pub use memory::MemoryGraphStore;
pub use neo4j::{Neo4jConfig, Neo4jGraphStore};

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Counts from a bulk [`GraphStore::upload`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadStats {
    pub entities: usize,
    pub relations: usize,
    /// Upserts that created an element or appended a tag.
    pub changed: usize,
}

/// A graph backend the retrieval engine can traverse and write to.
pub trait GraphStore: Send + Sync {
    /// Short backend name used in logs and errors.
    fn backend(&self) -> &str;

    /// Every entity within `k` hops of `entity`, one entry per shortest path,
    /// sorted ascending by hop count.
    ///
    /// An unknown entity yields an empty list. An unreachable store is
    /// [`StoreError::Unavailable`], never an empty list.
    fn k_hop_neighbors(
        &self,
        entity: &str,
        k: usize,
        direction: Direction,
    ) -> StoreResult<Vec<Neighbor>>;

    /// Create the entity or append `tag` to it. Returns whether anything changed.
    fn upsert_entity(&self, id: &str, tag: Option<&ProvenanceTag>) -> StoreResult<bool>;

    /// Create the relation (and endpoints) or append `tag` to it.
    fn upsert_relation(&self, triple: &Triple, tag: Option<&ProvenanceTag>) -> StoreResult<bool>;

    /// Remove every entity and relation.
    fn clear(&self) -> StoreResult<()>;

    /// Every entity and relation with its accumulated tags.
    fn snapshot(&self) -> StoreResult<TaggedGraph>;

    /// Upsert every entity and relation of an extracted graph under one tag.
    fn upload(&self, graph: &Graph, tag: Option<&ProvenanceTag>) -> StoreResult<UploadStats> {
        let mut stats = UploadStats::default();
        for entity in &graph.entities {
            stats.changed += usize::from(self.upsert_entity(entity, tag)?);
            stats.entities += 1;
        }
        for triple in &graph.relations {
            stats.changed += usize::from(self.upsert_relation(triple, tag)?);
            stats.relations += 1;
        }
        tracing::debug!(
            backend = self.backend(),
            entities = stats.entities,
            relations = stats.relations,
            changed = stats.changed,
            "uploaded graph"
        );
        Ok(stats)
    }
}

/// Open the configured backend.
pub fn open_store(backend: &StoreBackend, data_dir: &Path) -> StoreResult<Arc<dyn GraphStore>> {
    match backend {
        StoreBackend::Memory { persist: false } => Ok(Arc::new(MemoryGraphStore::new())),
        StoreBackend::Memory { persist: true } => {
            Ok(Arc::new(MemoryGraphStore::open(data_dir)?))
        }
        StoreBackend::Neo4j(config) => Ok(Arc::new(Neo4jGraphStore::new(config.clone())?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_counts_changes_once() {
        let store = MemoryGraphStore::new();
        let mut g = Graph::new();
        g.insert_relation(Triple::new("Bianca", "EDGE", "Portia"));
        let tag = ProvenanceTag::new("chunk-a.json");

        let first = store.upload(&g, Some(&tag)).unwrap();
        assert_eq!(first.entities, 2);
        assert_eq!(first.relations, 1);
        assert!(first.changed > 0);

        let second = store.upload(&g, Some(&tag)).unwrap();
        assert_eq!(second.changed, 0);
    }

    #[test]
    fn open_store_selects_backend() {
        let dir = tempfile::TempDir::new().unwrap();
        let mem = open_store(&StoreBackend::Memory { persist: false }, dir.path()).unwrap();
        assert_eq!(mem.backend(), "memory");
        let neo = open_store(&StoreBackend::Neo4j(Neo4jConfig::default()), dir.path()).unwrap();
        assert_eq!(neo.backend(), "neo4j");
    }
}
