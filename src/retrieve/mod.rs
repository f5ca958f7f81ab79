//! Query-time retrieval: from target entities to ranked, provenance-tagged
//! evidence and a synthesized answer.
//!
//! ```text
//! question ─▶ entities ─┬─▶ PathAssembler ─────┐
//!                       └─▶ NeighborAssembler ─┴─▶ TripleIndex ─▶ EvidenceSelector ─▶ AnswerSynthesizer
//! ```
//!
//! Both assemblers read the store through [`MultiHopTraversal`].

pub mod answer;
pub mod evidence;
pub mod neighbor;
pub mod path;

use serde::{Deserialize, Serialize};

use crate::graph::Triple;
use crate::provenance::ProvenanceTag;
use crate::store::{Direction, GraphStore, Neighbor, StoreResult};

pub use answer::{AnswerSynthesizer, QueryPipeline, QueryResponse};
pub use evidence::{EvidenceSelector, SelectedEvidence, TripleIndex};
pub use neighbor::NeighborAssembler;
pub use path::{PathAssembler, PathSegment};

/// A candidate triple with the provenance it was found with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub triple: Triple,
    pub tags: Vec<ProvenanceTag>,
}

impl Candidate {
    pub fn new(triple: Triple, tags: Vec<ProvenanceTag>) -> Self {
        Self { triple, tags }
    }
}

/// Ordered, provenance-carrying k-hop neighbor lists from one store call.
pub struct MultiHopTraversal<'a> {
    store: &'a dyn GraphStore,
}

impl<'a> MultiHopTraversal<'a> {
    pub fn new(store: &'a dyn GraphStore) -> Self {
        Self { store }
    }

    /// Neighbors of `entity` within `k` hops, ascending by hop count.
    ///
    /// Store failures propagate unchanged. Per-edge tag lists are padded or
    /// cut so they stay aligned with the edge labels.
    pub fn neighbors(
        &self,
        entity: &str,
        k: usize,
        direction: Direction,
    ) -> StoreResult<Vec<Neighbor>> {
        let mut hits = self.store.k_hop_neighbors(entity, k, direction)?;
        hits.sort_by_key(Neighbor::hops);
        for hit in &mut hits {
            hit.path_tags.resize(hit.path_relations.len(), Vec::new());
        }
        tracing::debug!(
            entity,
            hops = k,
            backend = self.store.backend(),
            neighbors = hits.len(),
            "k-hop traversal"
        );
        Ok(hits)
    }
}
