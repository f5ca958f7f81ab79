//! Neighbor-based subgraph: outgoing relations reached from each target entity.

use rayon::prelude::*;

use crate::graph::Triple;
use crate::store::{Direction, GraphStore, Neighbor, StoreResult};

use super::{Candidate, MultiHopTraversal};

/// Collects `hops`-hop outgoing relations of each target entity.
pub struct NeighborAssembler<'a> {
    traversal: MultiHopTraversal<'a>,
    hops: usize,
}

impl<'a> NeighborAssembler<'a> {
    pub fn new(store: &'a dyn GraphStore, hops: usize) -> Self {
        Self {
            traversal: MultiHopTraversal::new(store),
            hops,
        }
    }

    /// One candidate per reached neighbor: the stored edge that reached it.
    ///
    /// For a neighbor `n` hops out this is `(path_nodes[n-1], relation, id)`,
    /// so every emitted triple exists in the store. The shorter hops of the
    /// same path are emitted by the nearer neighbors. Only the first tag of
    /// the edge is carried. Targets are queried in parallel; output keeps
    /// target order.
    pub fn assemble(&self, targets: &[String]) -> StoreResult<Vec<Candidate>> {
        let per_target: Vec<Vec<Candidate>> = targets
            .par_iter()
            .map(|target| -> StoreResult<Vec<Candidate>> {
                let hits = self
                    .traversal
                    .neighbors(target, self.hops, Direction::Outgoing)?;
                Ok(hits.into_iter().filter_map(last_hop).collect())
            })
            .collect::<StoreResult<_>>()?;
        Ok(per_target.into_iter().flatten().collect())
    }
}

fn last_hop(hit: Neighbor) -> Option<Candidate> {
    let relation = hit.path_relations.last()?;
    let from = hit.path_nodes.iter().rev().nth(1)?;
    let first_tag = hit.path_tags.last().and_then(|tags| tags.first().cloned());
    Some(Candidate::new(
        Triple::new(from.as_str(), relation.as_str(), hit.id.as_str()),
        first_tag.into_iter().collect(),
    ))
}
