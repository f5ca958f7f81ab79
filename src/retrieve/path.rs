//! Path-based subgraph: stitch a path through the target entities.

use serde::{Deserialize, Serialize};

use crate::cancel::CancellationToken;
use crate::error::ScopeResult;
use crate::graph::Triple;
use crate::provenance::ProvenanceTag;
use crate::store::{Direction, GraphStore};

use super::{Candidate, MultiHopTraversal};

/// A contiguous run of nodes and edges between linked target entities.
///
/// `nodes` always has one more element than `relations`; `tags` is aligned
/// with `relations`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PathSegment {
    pub nodes: Vec<String>,
    pub relations: Vec<String>,
    pub tags: Vec<Vec<ProvenanceTag>>,
}

impl PathSegment {
    fn starting_at(entity: &str) -> Self {
        Self {
            nodes: vec![entity.to_string()],
            ..Default::default()
        }
    }

    /// Alternating node / edge sequence: `[n0, r0, n1, r1, n2]`.
    pub fn sequence(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.nodes.len() + self.relations.len());
        for (i, node) in self.nodes.iter().enumerate() {
            if i > 0 {
                out.push(self.relations[i - 1].clone());
            }
            out.push(node.clone());
        }
        out
    }

    /// One triple per hop, each with that hop's tags.
    ///
    /// Paths ignore edge direction, so triples follow walk order rather
    /// than storage order: a stored `B -r-> A` crossed from `A` comes out
    /// as `(A, r, B)`.
    pub fn triples(&self) -> Vec<Candidate> {
        self.relations
            .iter()
            .enumerate()
            .map(|(i, relation)| {
                Candidate::new(
                    Triple::new(&self.nodes[i], relation, &self.nodes[i + 1]),
                    self.tags.get(i).cloned().unwrap_or_default(),
                )
            })
            .collect()
    }

    pub fn hop_count(&self) -> usize {
        self.relations.len()
    }
}

/// Builds path segments through an ordered target entity list.
pub struct PathAssembler<'a> {
    traversal: MultiHopTraversal<'a>,
    hops: usize,
}

impl<'a> PathAssembler<'a> {
    pub fn new(store: &'a dyn GraphStore, hops: usize) -> Self {
        Self {
            traversal: MultiHopTraversal::new(store),
            hops,
        }
    }

    /// Walk from `targets[0]`, linking each next reachable target.
    ///
    /// The nearest remaining target within `hops` (edge direction ignored)
    /// extends the current segment and becomes the anchor. When none is
    /// reachable, the segment is closed and a new one starts at the next
    /// unconsumed target. The last segment is always emitted. No targets, no
    /// segments.
    pub fn assemble(
        &self,
        targets: &[String],
        cancel: &CancellationToken,
    ) -> ScopeResult<Vec<PathSegment>> {
        let Some((first, rest)) = targets.split_first() else {
            return Ok(vec![]);
        };
        let mut anchor = first.clone();
        let mut candidates: Vec<String> = rest.to_vec();
        let mut segment = PathSegment::starting_at(&anchor);
        let mut segments = Vec::new();

        while !candidates.is_empty() {
            cancel.check("path assembly")?;
            let hits = self
                .traversal
                .neighbors(&anchor, self.hops, Direction::Both)?;

            let found = hits
                .into_iter()
                .find(|n| n.id != anchor && candidates.contains(&n.id));

            match found {
                Some(hit) => {
                    tracing::debug!(from = %anchor, to = %hit.id, hops = hit.hops(), "linked target");
                    segment.nodes.extend(hit.path_nodes.into_iter().skip(1));
                    segment.relations.extend(hit.path_relations);
                    segment.tags.extend(hit.path_tags);
                    candidates.retain(|c| *c != hit.id);
                    anchor = hit.id;
                }
                None => {
                    tracing::debug!(from = %anchor, "no target within reach, new segment");
                    segments.push(std::mem::take(&mut segment));
                    anchor = candidates.remove(0);
                    segment = PathSegment::starting_at(&anchor);
                }
            }
        }
        segments.push(segment);

        tracing::debug!(targets = targets.len(), segments = segments.len(), "path assembly done");
        Ok(segments)
    }
}
