//! End-to-end tests for the kgscope engine.
//!
//! These drive ingestion, retrieval and the label tree through the public
//! engine API with in-process model and partitioner fakes.

use std::collections::HashSet;
use std::sync::Arc;

use petgraph::graph::NodeIndex;

use kgscope::cancel::CancellationToken;
use kgscope::community::label::label_paths_to;
use kgscope::community::{CommunityNode, ComponentPartitioner, Partitioner, Topology};
use kgscope::config::{IngestConfig, ScopeConfig, StoreBackend};
use kgscope::engine::{Capabilities, Engine};
use kgscope::error::{LabelError, LlmError, ScopeError};
use kgscope::graph::{Graph, Triple};
use kgscope::llm::{GraphExtractor, LanguageModel};
use kgscope::retrieve::PathAssembler;
use kgscope::store::MemoryGraphStore;

/// Reads `subject relation object` word triplets; question entities are the
/// capitalized words. Reranking keeps candidate order, optionally slipping in
/// a triple that was never a candidate.
#[derive(Default)]
struct TripletModel {
    foreign: Option<Triple>,
}

impl GraphExtractor for TripletModel {
    fn extract_graph(&self, text: &str) -> Result<Graph, LlmError> {
        let words: Vec<&str> = text.split_whitespace().collect();
        let mut graph = Graph::new();
        for w in words.chunks(3) {
            if let [s, r, o] = w {
                graph.insert_relation(Triple::new(*s, *r, *o));
            }
        }
        Ok(graph)
    }

    fn extract_entities(&self, text: &str) -> Result<Vec<String>, LlmError> {
        Ok(text
            .split_whitespace()
            .filter(|w| w.chars().next().is_some_and(char::is_uppercase))
            .map(str::to_string)
            .collect())
    }
}

impl LanguageModel for TripletModel {
    fn summarize(&self, items: &[String]) -> Result<String, LlmError> {
        Ok(items.join("/"))
    }

    fn rerank(&self, _: &str, k: usize, candidates: &[Triple]) -> Result<Vec<Triple>, LlmError> {
        let mut out: Vec<Triple> = self.foreign.iter().cloned().collect();
        out.extend(candidates.iter().cloned());
        out.truncate(k);
        Ok(out)
    }

    fn verbalize(&self, triples: &[Triple]) -> Result<Vec<String>, LlmError> {
        Ok(triples
            .iter()
            .map(|t| format!("{} {} {}", t.subject, t.relation, t.object))
            .collect())
    }

    fn answer(&self, question: &str, evidence: &[String]) -> Result<String, LlmError> {
        Ok(format!("{question}: {}", evidence.join("; ")))
    }
}

/// Groups nodes by the dotted name segment at the first depth where they differ.
struct PrefixPartitioner;

impl Partitioner for PrefixPartitioner {
    fn partition(&self, graph: &Topology) -> Vec<Vec<NodeIndex>> {
        let first = graph.node_weights().next().cloned().unwrap_or_default();
        let depth = graph
            .node_weights()
            .map(|w| {
                first
                    .split('.')
                    .zip(w.split('.'))
                    .take_while(|(a, b)| a == b)
                    .count()
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

fn engine_with(
    dir: &std::path::Path,
    model: TripletModel,
    partitioner: Arc<dyn Partitioner>,
) -> Engine {
    let config = ScopeConfig {
        data_dir: dir.to_path_buf(),
        store: StoreBackend::Memory { persist: false },
        ingest: IngestConfig {
            chunk_size: 60,
            chunk_overlap: 0,
            skip_errors: true,
        },
        ..Default::default()
    };
    let model = Arc::new(model);
    Engine::with_capabilities(
        config,
        Capabilities {
            store: Arc::new(MemoryGraphStore::new()),
            model: model.clone(),
            extractor: model,
            partitioner,
        },
    )
    .unwrap()
}

fn test_engine(dir: &std::path::Path) -> Engine {
    engine_with(dir, TripletModel::default(), Arc::new(ComponentPartitioner))
}

#[test]
fn bianca_to_fabian_through_portia() {
    let dir = tempfile::TempDir::new().unwrap();
    let engine = test_engine(dir.path());
    let cancel = CancellationToken::new();
    engine
        .ingest_text(
            "cast.txt",
            "Bianca EDGE Portia\u{c}Portia EDGE Fabian",
            &cancel,
        )
        .unwrap();
    engine.build_index().unwrap();

    let segments = PathAssembler::new(engine.store(), 2)
        .assemble(&["Bianca".to_string(), "Fabian".to_string()], &cancel)
        .unwrap();
    assert_eq!(segments.len(), 1);
    assert_eq!(
        segments[0].sequence(),
        vec!["Bianca", "EDGE", "Portia", "EDGE", "Fabian"]
    );

    let response = engine.query("Bianca Fabian", &cancel).unwrap();
    assert_eq!(
        response.triples,
        vec![
            Triple::new("Bianca", "EDGE", "Portia"),
            Triple::new("Portia", "EDGE", "Fabian"),
        ]
    );
    assert_eq!(response.statements.len(), response.triples.len());
    assert_eq!(response.sources.len(), response.triples.len());
    let doc = response.sources[0][0].document.as_deref();
    assert_eq!(doc, Some("cast.txt"));
    assert!(response.answer.starts_with("Bianca Fabian:"));
    assert!(response.graph.is_none());
}

#[test]
fn unreachable_target_starts_a_new_segment() {
    let dir = tempfile::TempDir::new().unwrap();
    let engine = test_engine(dir.path());
    let cancel = CancellationToken::new();
    engine
        .ingest_text("abc.txt", "A r X X r B C r D", &cancel)
        .unwrap();

    let targets: Vec<String> = ["A", "B", "C"].iter().map(|s| s.to_string()).collect();
    let segments = PathAssembler::new(engine.store(), 2)
        .assemble(&targets, &cancel)
        .unwrap();
    assert_eq!(segments.len(), 2);
    assert_eq!(segments[0].nodes, vec!["A", "X", "B"]);
    assert_eq!(segments[1].nodes, vec!["C"]);
    assert!(segments[1].relations.is_empty());
}

#[test]
fn foreign_rerank_triple_never_reaches_the_answer() {
    let dir = tempfile::TempDir::new().unwrap();
    let model = TripletModel {
        foreign: Some(Triple::new("Mallory", "invented", "Everything")),
    };
    let engine = engine_with(dir.path(), model, Arc::new(ComponentPartitioner));
    let cancel = CancellationToken::new();
    engine
        .ingest_text("a.txt", "Alice knows Bob Bob knows Carol", &cancel)
        .unwrap();

    let response = engine.query("Alice Carol", &cancel).unwrap();
    assert!(!response.triples.is_empty());
    assert!(
        response
            .triples
            .iter()
            .all(|t| t.subject != "Mallory")
    );
    assert_eq!(response.statements.len(), response.triples.len());
    assert_eq!(response.sources.len(), response.triples.len());
    assert!(!response.answer.contains("Mallory"));
}

#[test]
fn twelve_entity_label_tree_has_one_branch() {
    let dir = tempfile::TempDir::new().unwrap();
    let engine = engine_with(dir.path(), TripletModel::default(), Arc::new(PrefixPartitioner));
    let cancel = CancellationToken::new();
    engine
        .ingest_text(
            "org.txt",
            "big.p.0 r big.p.1 big.p.2 r big.p.3 big.p.4 r big.q.0 \
             big.q.1 r big.q.2 big.q.3 r x y r z",
            &cancel,
        )
        .unwrap();
    assert_eq!(engine.info().unwrap().entities, 12);

    let tree = engine.build_labels(false, &cancel).unwrap().unwrap();
    let root = tree.children();
    assert_eq!(root.len(), 4);
    assert_eq!(root.iter().filter(|c| c.is_leaf()).count(), 3);
    let branches: Vec<&CommunityNode> = root.iter().filter(|c| !c.is_leaf()).collect();
    assert_eq!(branches.len(), 1);
    assert_eq!(branches[0].leaf_ids().len(), 9);
    assert!(branches[0].label().is_some());
    assert!(branches[0].tags().is_some_and(|t| !t.is_empty()));

    let found = engine.find_label("x").unwrap().unwrap();
    assert!(found.is_leaf());
}

#[test]
fn label_paths_keep_exactly_the_requested_leaves() {
    let dir = tempfile::TempDir::new().unwrap();
    let engine = engine_with(dir.path(), TripletModel::default(), Arc::new(PrefixPartitioner));
    let cancel = CancellationToken::new();
    engine
        .ingest_text(
            "org.txt",
            "big.p.0 r big.p.1 big.q.0 r big.q.1 x r y",
            &cancel,
        )
        .unwrap();
    let tree = engine.build_labels(false, &cancel).unwrap().unwrap();

    let wanted: HashSet<String> = ["big.p.1", "y", "missing"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let pruned = label_paths_to(&tree, &wanted).unwrap();
    let mut leaves = pruned.leaf_ids();
    leaves.sort();
    assert_eq!(leaves, vec!["big.p.1", "y"]);

    let nothing: HashSet<String> = ["nobody".to_string()].into();
    assert!(label_paths_to(&tree, &nothing).is_none());
    assert!(engine.label_paths(&nothing).unwrap().is_none());
}

#[test]
fn query_attaches_label_subtree_once_built() {
    let dir = tempfile::TempDir::new().unwrap();
    let engine = test_engine(dir.path());
    let cancel = CancellationToken::new();
    engine
        .ingest_text("a.txt", "Alice knows Bob Carol likes Dave", &cancel)
        .unwrap();

    assert!(matches!(
        engine.find_label("Alice"),
        Err(ScopeError::Label(LabelError::NotBuilt))
    ));
    engine.build_labels(false, &cancel).unwrap();

    let response = engine.query("Alice Bob", &cancel).unwrap();
    let graph = response.graph.unwrap();
    let mut leaves = graph.leaf_ids();
    leaves.sort();
    assert_eq!(leaves, vec!["Alice", "Bob"]);
}

#[test]
fn cancelled_query_is_an_error() {
    let dir = tempfile::TempDir::new().unwrap();
    let engine = test_engine(dir.path());
    engine
        .ingest_text("a.txt", "Alice knows Bob", &CancellationToken::new())
        .unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();
    assert!(matches!(
        engine.query("Alice Bob", &cancel),
        Err(ScopeError::Engine(_))
    ));
}
