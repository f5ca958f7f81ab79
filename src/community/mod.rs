//! Recursive community partitioning of the entity graph.
//!
//! The graph is split into communities by a [`Partitioner`]. Communities
//! larger than the subdivision threshold are split again on their induced
//! subgraph; smaller ones become groups of leaves. Wrappers around a single
//! element are collapsed, so no [`Branch`] in the result has one child.
//!
//! Labeling, tag accumulation and tree queries live in [`label`].

pub mod label;
pub mod partition;

pub use partition::{GirvanNewmanPartitioner, LouvainPartitioner, PartitionerKind};

use std::collections::HashMap;

use petgraph::algo::tarjan_scc;
use petgraph::graph::{NodeIndex, UnGraph};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::cancel::CancellationToken;
use crate::error::EngineError;
use crate::graph::TaggedGraph;
use crate::provenance::ProvenanceTag;

/// Undirected entity topology handed to a [`Partitioner`].
pub type Topology = UnGraph<String, ()>;

// ---------------------------------------------------------------------------
// Tree
// ---------------------------------------------------------------------------

/// A node of the community tree.
///
/// Serialized untagged: branches carry `children`, leaves carry `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommunityNode {
    Branch(Branch),
    Leaf(Leaf),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub children: Vec<CommunityNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Concatenated descendant leaf tags, once accumulated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<ProvenanceTag>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leaf {
    /// Position of the entity in the partitioned graph.
    #[serde(default)]
    pub index: usize,
    #[serde(rename = "id")]
    pub entity_id: String,
    #[serde(default)]
    pub tags: Vec<ProvenanceTag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl CommunityNode {
    pub fn leaf(index: usize, entity_id: impl Into<String>, tags: Vec<ProvenanceTag>) -> Self {
        Self::Leaf(Leaf {
            index,
            entity_id: entity_id.into(),
            tags,
            label: None,
        })
    }

    /// A branch over `children`, or the only child itself.
    pub fn group(mut children: Vec<CommunityNode>) -> Self {
        if children.len() == 1 {
            return children.remove(0);
        }
        Self::Branch(Branch {
            children,
            label: None,
            tags: None,
        })
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Self::Leaf(_))
    }

    pub fn children(&self) -> &[CommunityNode] {
        match self {
            Self::Branch(b) => &b.children,
            Self::Leaf(_) => &[],
        }
    }

    /// Assigned label; a leaf falls back to its entity id.
    pub fn label(&self) -> Option<&str> {
        match self {
            Self::Branch(b) => b.label.as_deref(),
            Self::Leaf(l) => Some(l.label.as_deref().unwrap_or(&l.entity_id)),
        }
    }

    /// Tags of this node; `None` for a branch not yet accumulated.
    pub fn tags(&self) -> Option<&[ProvenanceTag]> {
        match self {
            Self::Branch(b) => b.tags.as_deref(),
            Self::Leaf(l) => Some(&l.tags),
        }
    }

    /// Entity ids of every leaf, left to right.
    pub fn leaf_ids(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Leaf(l) => out.push(&l.entity_id),
            Self::Branch(b) => b.children.iter().for_each(|c| c.collect_leaves(out)),
        }
    }

    pub fn branch_count(&self) -> usize {
        match self {
            Self::Leaf(_) => 0,
            Self::Branch(b) => 1 + b.children.iter().map(Self::branch_count).sum::<usize>(),
        }
    }
}

// ---------------------------------------------------------------------------
// Partitioning capability
// ---------------------------------------------------------------------------

/// Splits a graph's nodes into disjoint communities using topology only.
///
/// Every node of `graph` must appear in exactly one returned community.
/// Returning a single community holding every node means "cannot split".
pub trait Partitioner: Send + Sync {
    fn partition(&self, graph: &Topology) -> Vec<Vec<NodeIndex>>;
}

/// Connected components, largest first. Never splits a connected graph.
#[derive(Debug, Clone, Copy, Default)]
pub struct ComponentPartitioner;

impl Partitioner for ComponentPartitioner {
    fn partition(&self, graph: &Topology) -> Vec<Vec<NodeIndex>> {
        let mut components = tarjan_scc(graph);
        for c in &mut components {
            c.sort();
        }
        components.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        components
    }
}

// ---------------------------------------------------------------------------
// Recursive partitioning
// ---------------------------------------------------------------------------

/// Build the undirected topology of a store snapshot.
///
/// Nodes follow the snapshot's entity order; parallel and self edges are kept
/// out so partitioners see plain adjacency.
pub fn topology(snapshot: &TaggedGraph) -> Topology {
    let mut graph = Topology::default();
    let mut ids: HashMap<&str, NodeIndex> = HashMap::new();
    for entity in snapshot.entities.keys() {
        ids.insert(entity, graph.add_node(entity.clone()));
    }
    for triple in snapshot.relations.keys() {
        let (Some(&a), Some(&b)) = (ids.get(triple.subject.as_str()), ids.get(triple.object.as_str()))
        else {
            continue;
        };
        if a != b && graph.find_edge(a, b).is_none() {
            graph.add_edge(a, b, ());
        }
    }
    graph
}

/// Recursive partitioner over a [`Partitioner`] capability.
pub struct CommunityPartitioner<'a> {
    partitioner: &'a dyn Partitioner,
    subdivision_threshold: usize,
}

impl<'a> CommunityPartitioner<'a> {
    pub fn new(partitioner: &'a dyn Partitioner, subdivision_threshold: usize) -> Self {
        Self {
            partitioner,
            subdivision_threshold,
        }
    }

    /// Partition a snapshot into a community tree with leaf tags resolved.
    ///
    /// `None` for a graph with no entities.
    pub fn build(
        &self,
        snapshot: &TaggedGraph,
        cancel: &CancellationToken,
    ) -> Result<Option<CommunityNode>, EngineError> {
        let graph = topology(snapshot);
        if graph.node_count() == 0 {
            return Ok(None);
        }
        let resolve = |node: NodeIndex, id: &str| {
            CommunityNode::leaf(node.index(), id, snapshot.tags_of(id).to_vec())
        };
        let all: Vec<NodeIndex> = graph.node_indices().collect();
        let tree = self.split(&graph, &all, &resolve, cancel)?;
        tracing::info!(
            entities = graph.node_count(),
            branches = tree.branch_count(),
            "community tree built"
        );
        Ok(Some(tree))
    }

    /// Split `members` of the full graph. Node indices always refer to `full`.
    fn split<F>(
        &self,
        full: &Topology,
        members: &[NodeIndex],
        resolve: &F,
        cancel: &CancellationToken,
    ) -> Result<CommunityNode, EngineError>
    where
        F: Fn(NodeIndex, &str) -> CommunityNode + Sync,
    {
        cancel.check("partition")?;
        let (sub, back) = induced(full, members);
        let communities: Vec<Vec<NodeIndex>> = self
            .partitioner
            .partition(&sub)
            .into_iter()
            .filter(|c| !c.is_empty())
            .map(|c| c.into_iter().filter_map(|i| back.get(i.index()).copied()).collect())
            .collect();
        let progress = communities.len() > 1;
        tracing::debug!(
            members = members.len(),
            communities = communities.len(),
            "partitioned"
        );

        let children = communities
            .par_iter()
            .map(|community| {
                if progress && community.len() > self.subdivision_threshold {
                    self.split(full, community, resolve, cancel)
                } else {
                    Ok(CommunityNode::group(
                        community.iter().map(|&n| resolve(n, &full[n])).collect(),
                    ))
                }
            })
            .collect::<Result<Vec<_>, EngineError>>()?;
        Ok(CommunityNode::group(children))
    }
}

/// Subgraph of `full` induced by `members`, with a map back to `full` indices.
fn induced(full: &Topology, members: &[NodeIndex]) -> (Topology, Vec<NodeIndex>) {
    let mut sub = Topology::default();
    let mut local: HashMap<NodeIndex, NodeIndex> = HashMap::with_capacity(members.len());
    for &n in members {
        local.insert(n, sub.add_node(full[n].clone()));
    }
    for edge in full.raw_edges() {
        if let (Some(&a), Some(&b)) = (local.get(&edge.source()), local.get(&edge.target())) {
            sub.add_edge(a, b, ());
        }
    }
    (sub, members.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Triple;
    use proptest::prelude::*;

    fn snapshot(entities: &[&str], edges: &[(&str, &str)]) -> TaggedGraph {
        let mut g = TaggedGraph::default();
        for e in entities {
            g.entities
                .insert(e.to_string(), vec![ProvenanceTag::new(format!("chunk-{e}.json"))]);
        }
        for (a, b) in edges {
            g.relations.insert(Triple::new(*a, "r", *b), vec![]);
        }
        g
    }

    /// Splits by entity-name prefix: everything before the first `.` is the
    /// community at this depth, so `a.x.1` and `a.x.2` separate one level down.
    struct PrefixPartitioner;

    impl Partitioner for PrefixPartitioner {
        fn partition(&self, graph: &Topology) -> Vec<Vec<NodeIndex>> {
            let depth = graph
                .node_weights()
                .map(|w| {
                    let first = graph.node_weights().next().map(String::as_str).unwrap_or("");
                    common_segments(first, w)
                })
                .min()
                .unwrap_or(0);
            let mut groups: Vec<(String, Vec<NodeIndex>)> = Vec::new();
            for n in graph.node_indices() {
                let key = graph[n].split('.').nth(depth).unwrap_or("").to_string();
                match groups.iter_mut().find(|(k, _)| *k == key) {
                    Some((_, v)) => v.push(n),
                    None => groups.push((key, vec![n])),
                }
            }
            groups.into_iter().map(|(_, v)| v).collect()
        }
    }

    fn common_segments(a: &str, b: &str) -> usize {
        a.split('.').zip(b.split('.')).take_while(|(x, y)| x == y).count()
    }

    #[test]
    fn twelve_nodes_with_one_large_community() {
        let mut names: Vec<String> = (0..5).map(|i| format!("big.p.{i}")).collect();
        names.extend((0..4).map(|i| format!("big.q.{i}")));
        names.extend(["x", "y", "z"].map(String::from));
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let g = snapshot(&refs, &[]);

        let tree = CommunityPartitioner::new(&PrefixPartitioner, 8)
            .build(&g, &CancellationToken::new())
            .unwrap()
            .unwrap();
        let root = tree.children();
        assert_eq!(root.len(), 4);
        assert_eq!(root.iter().filter(|c| !c.is_leaf()).count(), 1);
        assert_eq!(root.iter().filter(|c| c.is_leaf()).count(), 3);

        let big = root.iter().find(|c| !c.is_leaf()).unwrap();
        assert_eq!(big.leaf_ids().len(), 9);
        assert_eq!(big.children().len(), 2);
        assert!(big.children().iter().all(|c| !c.is_leaf()));
    }

    #[test]
    fn threshold_size_community_is_a_leaf_group() {
        let names: Vec<String> = (0..8).map(|i| format!("g.{i}")).chain(["solo".into()]).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let tree = CommunityPartitioner::new(&PrefixPartitioner, 8)
            .build(&snapshot(&refs, &[]), &CancellationToken::new())
            .unwrap()
            .unwrap();
        let group = &tree.children()[0];
        assert_eq!(group.children().len(), 8);
        assert!(group.children().iter().all(CommunityNode::is_leaf));
    }

    #[test]
    fn components_partition_and_leaf_tags_resolve() {
        let g = snapshot(
            &["a", "b", "c", "d", "e"],
            &[("a", "b"), ("b", "c"), ("d", "e")],
        );
        let tree = CommunityPartitioner::new(&ComponentPartitioner, 8)
            .build(&g, &CancellationToken::new())
            .unwrap()
            .unwrap();
        assert_eq!(tree.children().len(), 2);
        assert_eq!(tree.children()[0].leaf_ids(), vec!["a", "b", "c"]);
        let CommunityNode::Leaf(leaf) = &tree.children()[1].children()[0] else {
            panic!("expected leaf");
        };
        assert_eq!(leaf.entity_id, "d");
        assert_eq!(leaf.tags, vec![ProvenanceTag::new("chunk-d.json")]);
    }

    #[test]
    fn unsplittable_community_stops_recursing() {
        let names: Vec<String> = (0..12).map(|i| format!("n{i}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let edges: Vec<(&str, &str)> = refs.windows(2).map(|w| (w[0], w[1])).collect();
        let tree = CommunityPartitioner::new(&ComponentPartitioner, 4)
            .build(&snapshot(&refs, &edges), &CancellationToken::new())
            .unwrap()
            .unwrap();
        assert_eq!(tree.children().len(), 12);
        assert_eq!(tree.branch_count(), 1);
    }

    #[test]
    fn single_entity_collapses_to_leaf() {
        let tree = CommunityPartitioner::new(&ComponentPartitioner, 8)
            .build(&snapshot(&["only"], &[]), &CancellationToken::new())
            .unwrap()
            .unwrap();
        assert!(tree.is_leaf());
        assert!(
            CommunityPartitioner::new(&ComponentPartitioner, 8)
                .build(&TaggedGraph::default(), &CancellationToken::new())
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn cancelled_partition_returns_error() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = CommunityPartitioner::new(&ComponentPartitioner, 8)
            .build(&snapshot(&["a", "b"], &[]), &cancel);
        assert!(matches!(result, Err(EngineError::Cancelled { .. })));
    }

    #[test]
    fn cache_format_round_trips() {
        let tree = CommunityNode::group(vec![
            CommunityNode::leaf(0, "FEMA", vec![ProvenanceTag::new("chunk-1.json")]),
            CommunityNode::leaf(1, "NIMS", vec![]),
        ]);
        let json = serde_json::to_value(&tree).unwrap();
        assert_eq!(json["children"][0]["id"], "FEMA");
        assert_eq!(json["children"][1]["index"], 1);
        let back: CommunityNode = serde_json::from_value(json).unwrap();
        assert_eq!(back, tree);
    }

    fn assert_no_single_child(node: &CommunityNode) {
        if let CommunityNode::Branch(b) = node {
            assert!(b.children.len() >= 2, "branch with {} children", b.children.len());
            b.children.iter().for_each(assert_no_single_child);
        }
    }

    /// Halves every community, or refuses to split when `stubborn` is set
    /// and the graph is odd-sized.
    struct Halving {
        stubborn: bool,
    }

    impl Partitioner for Halving {
        fn partition(&self, graph: &Topology) -> Vec<Vec<NodeIndex>> {
            let nodes: Vec<NodeIndex> = graph.node_indices().collect();
            if self.stubborn && nodes.len() % 2 == 1 {
                return vec![nodes];
            }
            let mid = nodes.len().div_ceil(2);
            let (a, b) = nodes.split_at(mid);
            vec![a.to_vec(), b.to_vec()]
        }
    }

    proptest! {
        #[test]
        fn no_branch_has_one_child(
            n in 1usize..60,
            threshold in 1usize..10,
            stubborn in any::<bool>(),
        ) {
            let names: Vec<String> = (0..n).map(|i| format!("e{i:03}")).collect();
            let refs: Vec<&str> = names.iter().map(String::as_str).collect();
            let partitioner = Halving { stubborn };
            let tree = CommunityPartitioner::new(&partitioner, threshold)
                .build(&snapshot(&refs, &[]), &CancellationToken::new())
                .unwrap()
                .unwrap();
            assert_no_single_child(&tree);
            let mut leaves: Vec<&str> = tree.leaf_ids();
            leaves.sort();
            prop_assert_eq!(leaves, refs);
        }
    }
}
