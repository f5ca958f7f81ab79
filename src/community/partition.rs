//! Partitioners that split a connected graph.
//!
//! [`GirvanNewmanPartitioner`] removes the most central edge until the graph
//! falls apart. [`LouvainPartitioner`] moves nodes between communities while
//! modularity improves, then splits any community that is not connected.

use std::collections::{BTreeMap, HashMap, VecDeque};

use petgraph::graph::NodeIndex;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::{ComponentPartitioner, Partitioner, Topology};

/// Which partitioning capability a label build uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionerKind {
    /// First level of Girvan-Newman edge-betweenness splitting.
    #[default]
    GirvanNewman,
    /// Single-level Louvain modularity optimization.
    Louvain,
    /// Connected components only; a connected graph is never split.
    Components,
}

impl PartitionerKind {
    pub fn build(self) -> std::sync::Arc<dyn Partitioner> {
        match self {
            Self::GirvanNewman => std::sync::Arc::new(GirvanNewmanPartitioner),
            Self::Louvain => std::sync::Arc::new(LouvainPartitioner::default()),
            Self::Components => std::sync::Arc::new(ComponentPartitioner),
        }
    }
}

/// Sorted, deduplicated neighbor lists over `0..node_count`. Self loops dropped.
fn adjacency(graph: &Topology) -> Vec<Vec<usize>> {
    let mut adj = vec![Vec::new(); graph.node_count()];
    for edge in graph.raw_edges() {
        let (a, b) = (edge.source().index(), edge.target().index());
        if a != b {
            adj[a].push(b);
            adj[b].push(a);
        }
    }
    for neighbors in &mut adj {
        neighbors.sort_unstable();
        neighbors.dedup();
    }
    adj
}

/// Connected pieces of the subgraph induced by `members`.
fn pieces(adj: &[Vec<usize>], members: &[usize]) -> Vec<Vec<usize>> {
    let mut inside = vec![false; adj.len()];
    for &m in members {
        inside[m] = true;
    }
    let mut out = Vec::new();
    for &start in members {
        if !inside[start] {
            continue;
        }
        inside[start] = false;
        let mut stack = vec![start];
        let mut piece = Vec::new();
        while let Some(v) = stack.pop() {
            piece.push(v);
            for &w in &adj[v] {
                if inside[w] {
                    inside[w] = false;
                    stack.push(w);
                }
            }
        }
        piece.sort_unstable();
        out.push(piece);
    }
    out
}

fn all_pieces(adj: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let everyone: Vec<usize> = (0..adj.len()).collect();
    pieces(adj, &everyone)
}

/// Largest first, ties by lowest member.
fn ordered(mut parts: Vec<Vec<usize>>) -> Vec<Vec<NodeIndex>> {
    parts.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    parts
        .into_iter()
        .map(|p| p.into_iter().map(NodeIndex::new).collect())
        .collect()
}

// ---------------------------------------------------------------------------
// Girvan-Newman
// ---------------------------------------------------------------------------

/// Splits along the edges with the highest betweenness.
///
/// A graph that is already disconnected is split into its components. A
/// connected one loses its most central edge (ties go to the lowest node
/// pair) until it has more than one component.
#[derive(Debug, Clone, Copy, Default)]
pub struct GirvanNewmanPartitioner;

impl Partitioner for GirvanNewmanPartitioner {
    fn partition(&self, graph: &Topology) -> Vec<Vec<NodeIndex>> {
        let mut adj = adjacency(graph);
        let mut parts = all_pieces(&adj);
        let mut removed = 0usize;
        while parts.len() == 1 {
            let edges = edge_list(&adj);
            let Some((a, b)) = most_central_edge(&adj, &edges) else {
                break;
            };
            adj[a].retain(|&n| n != b);
            adj[b].retain(|&n| n != a);
            removed += 1;
            parts = all_pieces(&adj);
        }
        tracing::trace!(removed, communities = parts.len(), "girvan-newman split");
        ordered(parts)
    }
}

fn edge_list(adj: &[Vec<usize>]) -> Vec<(usize, usize)> {
    adj.iter()
        .enumerate()
        .flat_map(|(a, ns)| ns.iter().filter(move |&&b| a < b).map(move |&b| (a, b)))
        .collect()
}

fn most_central_edge(adj: &[Vec<usize>], edges: &[(usize, usize)]) -> Option<(usize, usize)> {
    let ids: HashMap<(usize, usize), usize> =
        edges.iter().enumerate().map(|(i, &e)| (e, i)).collect();
    let scores = (0..adj.len())
        .into_par_iter()
        .map(|source| source_credit(adj, &ids, edges.len(), source))
        .reduce(
            || vec![0.0; edges.len()],
            |mut acc, part| {
                acc.iter_mut().zip(part).for_each(|(a, p)| *a += p);
                acc
            },
        );
    let mut best: Option<(usize, f64)> = None;
    for (i, &score) in scores.iter().enumerate() {
        if best.is_none_or(|(_, top)| score > top + 1e-9) {
            best = Some((i, score));
        }
    }
    best.map(|(i, _)| edges[i])
}

/// Brandes dependency accumulation from one source, per edge.
fn source_credit(
    adj: &[Vec<usize>],
    ids: &HashMap<(usize, usize), usize>,
    edge_count: usize,
    source: usize,
) -> Vec<f64> {
    let n = adj.len();
    let mut credit = vec![0.0; edge_count];
    let mut sigma = vec![0.0f64; n];
    let mut dist = vec![usize::MAX; n];
    let mut preds: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut order = Vec::with_capacity(n);
    sigma[source] = 1.0;
    dist[source] = 0;

    let mut queue = VecDeque::from([source]);
    while let Some(v) = queue.pop_front() {
        order.push(v);
        for &w in &adj[v] {
            if dist[w] == usize::MAX {
                dist[w] = dist[v] + 1;
                queue.push_back(w);
            }
            if dist[w] == dist[v] + 1 {
                sigma[w] += sigma[v];
                preds[w].push(v);
            }
        }
    }

    let mut delta = vec![0.0f64; n];
    for &w in order.iter().rev() {
        for &v in &preds[w] {
            let c = sigma[v] / sigma[w] * (1.0 + delta[w]);
            if let Some(&id) = ids.get(&(v.min(w), v.max(w))) {
                credit[id] += c;
            }
            delta[v] += c;
        }
    }
    credit
}

// ---------------------------------------------------------------------------
// Louvain
// ---------------------------------------------------------------------------

/// Local-moving modularity optimization over node index order.
///
/// Deterministic: nodes are visited in index order and ties keep the current
/// community.
#[derive(Debug, Clone, Copy)]
pub struct LouvainPartitioner {
    /// Upper bound on full sweeps over the nodes.
    pub max_passes: usize,
}

impl Default for LouvainPartitioner {
    fn default() -> Self {
        Self { max_passes: 100 }
    }
}

impl Partitioner for LouvainPartitioner {
    fn partition(&self, graph: &Topology) -> Vec<Vec<NodeIndex>> {
        let adj = adjacency(graph);
        let degree: Vec<f64> = adj.iter().map(|ns| ns.len() as f64).collect();
        let two_m: f64 = degree.iter().sum();
        if two_m == 0.0 {
            return ordered(all_pieces(&adj));
        }

        let mut community: Vec<usize> = (0..adj.len()).collect();
        let mut totals = degree.clone();
        for pass in 0..self.max_passes {
            let mut moved = 0usize;
            for v in 0..adj.len() {
                let own = community[v];
                totals[own] -= degree[v];

                let mut links: BTreeMap<usize, f64> = BTreeMap::new();
                links.insert(own, 0.0);
                for &w in &adj[v] {
                    *links.entry(community[w]).or_default() += 1.0;
                }
                let gain = |c: usize, w: f64| w - degree[v] * totals[c] / two_m;

                let mut best = (own, gain(own, links.get(&own).copied().unwrap_or(0.0)));
                for (&c, &w) in &links {
                    let g = gain(c, w);
                    if g > best.1 + 1e-12 {
                        best = (c, g);
                    }
                }
                community[v] = best.0;
                totals[best.0] += degree[v];
                if best.0 != own {
                    moved += 1;
                }
            }
            tracing::trace!(pass, moved, "louvain sweep");
            if moved == 0 {
                break;
            }
        }

        let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (v, &c) in community.iter().enumerate() {
            groups.entry(c).or_default().push(v);
        }
        let parts = groups
            .into_values()
            .flat_map(|members| pieces(&adj, &members))
            .collect();
        ordered(parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two cliques of `a` and `b` nodes joined by one bridge edge.
    fn bridged_cliques(a: usize, b: usize) -> Topology {
        let mut g = Topology::default();
        let nodes: Vec<NodeIndex> = (0..a + b).map(|i| g.add_node(format!("n{i}"))).collect();
        for (lo, hi) in [(0, a), (a, a + b)] {
            for i in lo..hi {
                for j in i + 1..hi {
                    g.add_edge(nodes[i], nodes[j], ());
                }
            }
        }
        g.add_edge(nodes[a - 1], nodes[a], ());
        g
    }

    fn sizes(parts: &[Vec<NodeIndex>]) -> Vec<usize> {
        parts.iter().map(Vec::len).collect()
    }

    fn assert_is_partition(parts: &[Vec<NodeIndex>], n: usize) {
        let mut all: Vec<usize> = parts.iter().flatten().map(|i| i.index()).collect();
        all.sort_unstable();
        assert_eq!(all, (0..n).collect::<Vec<_>>());
    }

    #[test]
    fn girvan_newman_cuts_the_bridge_first() {
        let parts = GirvanNewmanPartitioner.partition(&bridged_cliques(9, 3));
        assert_eq!(sizes(&parts), vec![9, 3]);
        assert_is_partition(&parts, 12);
    }

    #[test]
    fn girvan_newman_splits_a_clique_eventually() {
        let g = bridged_cliques(5, 1);
        let inner: Vec<NodeIndex> = g.node_indices().take(5).collect();
        let (clique, _) = super::super::induced(&g, &inner);
        let parts = GirvanNewmanPartitioner.partition(&clique);
        assert!(parts.len() > 1);
        assert_is_partition(&parts, 5);
    }

    #[test]
    fn louvain_separates_weakly_joined_cliques() {
        let parts = LouvainPartitioner::default().partition(&bridged_cliques(9, 3));
        assert_eq!(sizes(&parts), vec![9, 3]);
        assert_is_partition(&parts, 12);
    }

    #[test]
    fn edgeless_graphs_split_into_singletons() {
        let mut g = Topology::default();
        for i in 0..3 {
            g.add_node(format!("n{i}"));
        }
        for kind in [PartitionerKind::GirvanNewman, PartitionerKind::Louvain] {
            assert_eq!(sizes(&kind.build().partition(&g)), vec![1, 1, 1]);
        }
        assert!(GirvanNewmanPartitioner.partition(&Topology::default()).is_empty());
    }

    #[test]
    fn components_kind_never_splits_a_connected_graph() {
        let parts = PartitionerKind::Components
            .build()
            .partition(&bridged_cliques(9, 3));
        assert_eq!(parts.len(), 1);
    }

    #[test]
    fn kind_parses_from_snake_case() {
        #[derive(Deserialize)]
        struct Wrap {
            partitioner: PartitionerKind,
        }
        let w: Wrap = toml::from_str(r#"partitioner = "girvan_newman""#).unwrap();
        assert_eq!(w.partitioner, PartitionerKind::GirvanNewman);
        let w: Wrap = toml::from_str(r#"partitioner = "louvain""#).unwrap();
        assert_eq!(w.partitioner, PartitionerKind::Louvain);
    }
}
