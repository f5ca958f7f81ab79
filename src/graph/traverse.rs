//! k-hop path enumeration.
//!
//! BFS from a start entity that records every shortest path to each entity
//! reached within `max_hops`, the same shape a graph database returns for an
//! `ALL SHORTEST` pattern query. Results are ordered by hop count, then by
//! discovery order.

use std::collections::HashMap;

use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

use crate::provenance::ProvenanceTag;

use super::index::{EdgeData, KnowledgeGraph};

/// Which edges a traversal may follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Only subject → object.
    Outgoing,
    /// Either way; paths ignore edge direction.
    Both,
}

/// One entity reached by a k-hop query, with the path that reached it.
///
/// `path_nodes` runs from the start entity to `id` inclusive, so it is always
/// one longer than `path_relations`. `path_tags` is aligned 1:1 with
/// `path_relations`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Neighbor {
    pub id: String,
    pub path_nodes: Vec<String>,
    pub path_relations: Vec<String>,
    pub path_tags: Vec<Vec<ProvenanceTag>>,
}

impl Neighbor {
    /// Number of hops from the start entity.
    pub fn hops(&self) -> usize {
        self.path_relations.len()
    }
}

fn incident(
    graph: &DiGraph<String, EdgeData>,
    node: NodeIndex,
    direction: Direction,
) -> Vec<(EdgeIndex, NodeIndex)> {
    let mut out: Vec<(EdgeIndex, NodeIndex)> = graph
        .edges_directed(node, petgraph::Direction::Outgoing)
        .map(|e| (e.id(), e.target()))
        .collect();
    if direction == Direction::Both {
        out.extend(
            graph
                .edges_directed(node, petgraph::Direction::Incoming)
                .map(|e| (e.id(), e.source())),
        );
    }
    // petgraph walks adjacency lists newest-first; restore insertion order.
    out.sort_by_key(|(e, _)| e.index());
    out
}

/// Every shortest path from `entity` to each entity within `max_hops`.
///
/// The start entity itself is never reported. An unknown start entity yields
/// an empty list.
pub fn k_hop_paths(
    kg: &KnowledgeGraph,
    entity: &str,
    max_hops: usize,
    direction: Direction,
) -> Vec<Neighbor> {
    let Some(start) = kg.node_of(entity) else {
        return vec![];
    };
    let graph = kg.graph();

    let mut depth: HashMap<NodeIndex, usize> = HashMap::from([(start, 0)]);
    let mut preds: HashMap<NodeIndex, Vec<(NodeIndex, EdgeIndex)>> = HashMap::new();
    let mut reached: Vec<NodeIndex> = Vec::new();
    let mut frontier = vec![start];

    for d in 1..=max_hops {
        let mut next = Vec::new();
        for &node in &frontier {
            for (edge, other) in incident(&graph, node, direction) {
                if other == node {
                    continue;
                }
                match depth.get(&other) {
                    None => {
                        depth.insert(other, d);
                        preds.entry(other).or_default().push((node, edge));
                        next.push(other);
                        reached.push(other);
                    }
                    Some(&od) if od == d => preds.entry(other).or_default().push((node, edge)),
                    Some(_) => {}
                }
            }
        }
        if next.is_empty() {
            break;
        }
        frontier = next;
    }

    let mut out = Vec::new();
    for target in reached {
        for (nodes, edges) in unwind(&preds, start, target) {
            out.push(Neighbor {
                id: graph[target].clone(),
                path_nodes: nodes.iter().map(|&n| graph[n].clone()).collect(),
                path_relations: edges.iter().map(|&e| graph[e].relation.clone()).collect(),
                path_tags: edges.iter().map(|&e| graph[e].tags.clone()).collect(),
            });
        }
    }
    out
}

type PathParts = (Vec<NodeIndex>, Vec<EdgeIndex>);

/// Expand the predecessor DAG into every start → target path.
fn unwind(
    preds: &HashMap<NodeIndex, Vec<(NodeIndex, EdgeIndex)>>,
    start: NodeIndex,
    target: NodeIndex,
) -> Vec<PathParts> {
    if target == start {
        return vec![(vec![start], vec![])];
    }
    let Some(incoming) = preds.get(&target) else {
        return vec![];
    };
    let mut paths = Vec::new();
    for &(prev, edge) in incoming {
        for (mut nodes, mut edges) in unwind(preds, start, prev) {
            nodes.push(target);
            edges.push(edge);
            paths.push((nodes, edges));
        }
    }
    paths
}
