//! Label tree: bottom-up labeling, tag accumulation and tree queries.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::cancel::CancellationToken;
use crate::error::{LabelError, ScopeResult};
use crate::llm::LanguageModel;
use crate::paths::write_atomic;
use crate::provenance::ProvenanceTag;

use super::{Branch, CommunityNode};

// ---------------------------------------------------------------------------
// Build
// ---------------------------------------------------------------------------

/// Label every node post-order: leaves by entity id, branches by a model
/// summary of their children's labels.
pub fn label_tree(
    node: &mut CommunityNode,
    model: &dyn LanguageModel,
    cancel: &CancellationToken,
) -> ScopeResult<()> {
    match node {
        CommunityNode::Leaf(leaf) => {
            leaf.label = Some(leaf.entity_id.clone());
        }
        CommunityNode::Branch(branch) => {
            for child in &mut branch.children {
                label_tree(child, model, cancel)?;
            }
            cancel.check("label")?;
            let labels: Vec<String> = branch
                .children
                .iter()
                .filter_map(|c| c.label().map(str::to_string))
                .collect();
            let label = model.summarize(&labels)?;
            tracing::debug!(children = labels.len(), label = %label, "labeled branch");
            branch.label = Some(label);
        }
    }
    Ok(())
}

/// Fill in branch tags post-order as the concatenation of child tags.
///
/// Order is preserved and duplicates are kept. Branches that already carry
/// tags are left as they are.
pub fn accumulate_tags(node: &mut CommunityNode) -> &[ProvenanceTag] {
    match node {
        CommunityNode::Leaf(leaf) => &leaf.tags,
        CommunityNode::Branch(branch) => {
            if branch.tags.is_none() {
                let mut tags = Vec::new();
                for child in &mut branch.children {
                    tags.extend_from_slice(accumulate_tags(child));
                }
                branch.tags = Some(tags);
            }
            branch.tags.as_deref().unwrap_or(&[])
        }
    }
}

/// Label then accumulate tags. On error the tree is left unlabeled.
pub fn build_label_tree(
    tree: &CommunityNode,
    model: &dyn LanguageModel,
    cancel: &CancellationToken,
) -> ScopeResult<CommunityNode> {
    let mut labeled = tree.clone();
    label_tree(&mut labeled, model, cancel)?;
    accumulate_tags(&mut labeled);
    tracing::info!(
        leaves = labeled.leaf_ids().len(),
        branches = labeled.branch_count(),
        "label tree built"
    );
    Ok(labeled)
}

/// Model calls and input words a labeling run will spend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LabelEstimate {
    /// One summarize call per branch.
    pub calls: usize,
    /// Whitespace-separated words across all summarize inputs. Branch labels
    /// not yet produced count as one word.
    pub tokens: usize,
}

pub fn label_call_estimate(node: &CommunityNode) -> LabelEstimate {
    match node {
        CommunityNode::Leaf(_) => LabelEstimate::default(),
        CommunityNode::Branch(branch) => {
            let mut est = LabelEstimate {
                calls: 1,
                tokens: 0,
            };
            for child in &branch.children {
                est.tokens += match child {
                    CommunityNode::Leaf(l) => l.entity_id.split_whitespace().count(),
                    CommunityNode::Branch(b) => b
                        .label
                        .as_deref()
                        .map_or(1, |l| l.split_whitespace().count()),
                };
                let inner = label_call_estimate(child);
                est.calls += inner.calls;
                est.tokens += inner.tokens;
            }
            est
        }
    }
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Root-to-leaf path to `entity`, each branch pruned to its one relevant child.
pub fn label_path_to(node: &CommunityNode, entity: &str) -> Option<CommunityNode> {
    match node {
        CommunityNode::Leaf(leaf) => (leaf.entity_id == entity).then(|| node.clone()),
        CommunityNode::Branch(branch) => branch
            .children
            .iter()
            .find_map(|c| label_path_to(c, entity))
            .map(|child| pruned(branch, vec![child])),
    }
}

/// Subtree holding exactly the leaves whose id is in `entities`.
///
/// Branches without a matching descendant are dropped. `None` if nothing
/// matches.
pub fn label_paths_to(node: &CommunityNode, entities: &HashSet<String>) -> Option<CommunityNode> {
    match node {
        CommunityNode::Leaf(leaf) => entities.contains(&leaf.entity_id).then(|| node.clone()),
        CommunityNode::Branch(branch) => {
            let children: Vec<CommunityNode> = branch
                .children
                .iter()
                .filter_map(|c| label_paths_to(c, entities))
                .collect();
            (!children.is_empty()).then(|| pruned(branch, children))
        }
    }
}

fn pruned(branch: &Branch, children: Vec<CommunityNode>) -> CommunityNode {
    CommunityNode::Branch(Branch {
        children,
        label: branch.label.clone(),
        tags: branch.tags.clone(),
    })
}

/// First node in pre-order whose label, or leaf id, equals `label`.
pub fn find_label<'a>(node: &'a CommunityNode, label: &str) -> Option<&'a CommunityNode> {
    let hit = match node {
        CommunityNode::Leaf(leaf) => {
            leaf.entity_id == label || leaf.label.as_deref() == Some(label)
        }
        CommunityNode::Branch(branch) => branch.label.as_deref() == Some(label),
    };
    if hit {
        return Some(node);
    }
    node.children().iter().find_map(|c| find_label(c, label))
}

/// Parent → child label pairs in pre-order, for drawing the dendrogram.
///
/// Unlabeled branches appear as the empty string.
pub fn dendrogram_edges(node: &CommunityNode) -> Vec<(String, String)> {
    let mut edges = Vec::new();
    collect_edges(node, &mut edges);
    edges
}

fn collect_edges(node: &CommunityNode, edges: &mut Vec<(String, String)>) {
    let parent = node.label().unwrap_or_default();
    for child in node.children() {
        edges.push((parent.to_string(), child.label().unwrap_or_default().to_string()));
        collect_edges(child, edges);
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// On-disk label tree, written atomically.
#[derive(Debug, Clone)]
pub struct LabelCache {
    path: PathBuf,
}

impl LabelCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// The cached tree, or `None` when no cache has been written.
    pub fn load(&self) -> Result<Option<CommunityNode>, LabelError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(LabelError::Io {
                    path: self.path.display().to_string(),
                    source,
                });
            }
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| LabelError::Serialization {
                path: self.path.display().to_string(),
                message: e.to_string(),
            })
    }

    pub fn save(&self, tree: &CommunityNode) -> Result<(), LabelError> {
        let json = serde_json::to_vec_pretty(tree).map_err(|e| LabelError::Serialization {
            path: self.path.display().to_string(),
            message: e.to_string(),
        })?;
        write_atomic(&self.path, &json).map_err(|source| LabelError::Io {
            path: self.path.display().to_string(),
            source,
        })?;
        tracing::info!(path = %self.path.display(), "label cache written");
        Ok(())
    }

    /// Remove the cache so the next build starts fresh. Missing is fine.
    pub fn invalidate(&self) -> Result<(), LabelError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(LabelError::Io {
                path: self.path.display().to_string(),
                source,
            }),
        }
    }
}
