//! Candidate deduplication, reranking and verbalization.

use std::collections::{HashMap, HashSet};

use crate::error::LlmError;
use crate::graph::Triple;
use crate::llm::LanguageModel;
use crate::provenance::{self, ProvenanceTag};
use crate::source_index::SourceIndex;

use super::Candidate;
use super::path::PathSegment;

/// Ordered candidate list, deduplicated by exact triple equality.
///
/// A triple seen more than once keeps its first position and the merged
/// (append-if-absent) tags of every occurrence.
#[derive(Debug, Clone, Default)]
pub struct TripleIndex {
    entries: Vec<Candidate>,
    positions: HashMap<Triple, usize>,
}

impl TripleIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Path triples (one per hop, segment order) followed by neighbor triples.
    pub fn from_parts(segments: &[PathSegment], neighbors: Vec<Candidate>) -> Self {
        let mut index = Self::new();
        for candidate in segments.iter().flat_map(PathSegment::triples) {
            index.push(candidate);
        }
        for candidate in neighbors {
            index.push(candidate);
        }
        index
    }

    /// Add a candidate, merging into an existing equal triple.
    pub fn push(&mut self, candidate: Candidate) {
        match self.positions.get(&candidate.triple) {
            Some(&i) => {
                provenance::merge(&mut self.entries[i].tags, &candidate.tags);
            }
            None => {
                let mut tags = Vec::with_capacity(candidate.tags.len());
                provenance::merge(&mut tags, &candidate.tags);
                self.positions.insert(candidate.triple.clone(), self.entries.len());
                self.entries.push(Candidate::new(candidate.triple, tags));
            }
        }
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.entries
    }

    pub fn triples(&self) -> Vec<Triple> {
        self.entries.iter().map(|c| c.triple.clone()).collect()
    }

    /// First position of `triple` in the candidate list.
    pub fn position(&self, triple: &Triple) -> Option<usize> {
        self.positions.get(triple).copied()
    }

    pub fn tags(&self, triple: &Triple) -> Option<&[ProvenanceTag]> {
        self.position(triple).map(|i| self.entries[i].tags.as_slice())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Reranked triples with their provenance and statements, index-aligned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectedEvidence {
    pub triples: Vec<Triple>,
    pub sources: Vec<Vec<ProvenanceTag>>,
    pub statements: Vec<String>,
}

impl SelectedEvidence {
    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }

    /// Every subject and object mentioned by the selected triples.
    pub fn entities(&self) -> HashSet<String> {
        self.triples
            .iter()
            .flat_map(|t| [t.subject.clone(), t.object.clone()])
            .collect()
    }
}

/// Asks the model to rerank and verbalize candidates, keeping provenance.
pub struct EvidenceSelector<'a> {
    model: &'a dyn LanguageModel,
    fallback: Option<&'a SourceIndex>,
}

impl<'a> EvidenceSelector<'a> {
    pub fn new(model: &'a dyn LanguageModel) -> Self {
        Self {
            model,
            fallback: None,
        }
    }

    /// Consult a persisted index for candidates that carry no tags.
    pub fn with_source_index(mut self, index: &'a SourceIndex) -> Self {
        self.fallback = Some(index);
        self
    }

    /// Rerank `index` for `question`, keep at most `k`, and verbalize.
    ///
    /// Reranked triples that are not candidates are logged and dropped, as
    /// are repeats. The result only ever contains candidate triples, and
    /// `triples`, `sources` and `statements` always have the same length.
    pub fn select(
        &self,
        question: &str,
        k: usize,
        index: &TripleIndex,
    ) -> Result<SelectedEvidence, LlmError> {
        if index.is_empty() || k == 0 {
            return Ok(SelectedEvidence::default());
        }

        let reranked = self.model.rerank(question, k, &index.triples())?;

        let mut selected = SelectedEvidence::default();
        let mut seen: HashSet<&Triple> = HashSet::new();
        for triple in &reranked {
            if selected.triples.len() == k {
                break;
            }
            let Some(tags) = index.tags(triple) else {
                tracing::warn!(%triple, "reranked triple is not among the candidates; dropped");
                continue;
            };
            if !seen.insert(triple) {
                continue;
            }
            let tags = if tags.is_empty() {
                self.fallback
                    .and_then(|f| f.get(triple))
                    .map(<[ProvenanceTag]>::to_vec)
                    .unwrap_or_default()
            } else {
                tags.to_vec()
            };
            selected.triples.push(triple.clone());
            selected.sources.push(tags);
        }

        let mut statements = self.model.verbalize(&selected.triples)?;
        if statements.len() != selected.triples.len() {
            tracing::warn!(
                expected = selected.triples.len(),
                got = statements.len(),
                "verbalized statement count does not match triples"
            );
            statements.truncate(selected.triples.len());
            for triple in &selected.triples[statements.len()..] {
                statements.push(format!(
                    "'{}' {} '{}'",
                    triple.subject, triple.relation, triple.object
                ));
            }
        }
        selected.statements = statements;

        tracing::info!(
            candidates = index.len(),
            selected = selected.triples.len(),
            "evidence selected"
        );
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tag(id: &str) -> ProvenanceTag {
        ProvenanceTag::new(format!("chunk-{id}.json"))
    }

    fn t(s: &str, o: &str) -> Triple {
        Triple::new(s, "r", o)
    }

    /// Returns a fixed rerank result and a fixed number of statements.
    struct Scripted {
        rerank: Vec<Triple>,
        statements: Option<usize>,
    }

    impl LanguageModel for Scripted {
        fn summarize(&self, _: &[String]) -> Result<String, LlmError> {
            Ok("x".into())
        }
        fn rerank(&self, _: &str, _: usize, _: &[Triple]) -> Result<Vec<Triple>, LlmError> {
            Ok(self.rerank.clone())
        }
        fn verbalize(&self, triples: &[Triple]) -> Result<Vec<String>, LlmError> {
            let n = self.statements.unwrap_or(triples.len());
            Ok((0..n).map(|i| format!("s{i}")).collect())
        }
        fn answer(&self, _: &str, _: &[String]) -> Result<String, LlmError> {
            Ok("a".into())
        }
    }

    #[test]
    fn index_dedups_and_merges_tags() {
        let mut index = TripleIndex::new();
        index.push(Candidate::new(t("a", "b"), vec![tag("1")]));
        index.push(Candidate::new(t("b", "c"), vec![]));
        index.push(Candidate::new(t("a", "b"), vec![tag("2"), tag("1")]));
        assert_eq!(index.len(), 2);
        assert_eq!(index.position(&t("a", "b")), Some(0));
        assert_eq!(index.tags(&t("a", "b")).unwrap(), &[tag("1"), tag("2")]);
    }

    #[test]
    fn foreign_and_repeated_triples_are_dropped() {
        let mut index = TripleIndex::new();
        index.push(Candidate::new(t("a", "b"), vec![tag("1")]));
        index.push(Candidate::new(t("b", "c"), vec![tag("2")]));
        let model = Scripted {
            rerank: vec![t("x", "y"), t("b", "c"), t("b", "c"), t("a", "b")],
            statements: None,
        };
        let out = EvidenceSelector::new(&model).select("q", 5, &index).unwrap();
        assert_eq!(out.triples, vec![t("b", "c"), t("a", "b")]);
        assert_eq!(out.sources, vec![vec![tag("2")], vec![tag("1")]]);
        assert_eq!(out.statements.len(), 2);
    }

    #[test]
    fn result_is_truncated_to_k() {
        let mut index = TripleIndex::new();
        for o in ["b", "c", "d"] {
            index.push(Candidate::new(t("a", o), vec![]));
        }
        let model = Scripted {
            rerank: index.triples(),
            statements: None,
        };
        let out = EvidenceSelector::new(&model).select("q", 2, &index).unwrap();
        assert_eq!(out.triples.len(), 2);
    }

    #[test]
    fn statement_count_mismatch_is_realigned() {
        let mut index = TripleIndex::new();
        index.push(Candidate::new(t("a", "b"), vec![]));
        index.push(Candidate::new(t("b", "c"), vec![]));

        let short = Scripted {
            rerank: index.triples(),
            statements: Some(1),
        };
        let out = EvidenceSelector::new(&short).select("q", 5, &index).unwrap();
        assert_eq!(out.statements, vec!["s0".to_string(), "'b' r 'c'".to_string()]);

        let long = Scripted {
            rerank: index.triples(),
            statements: Some(4),
        };
        let out = EvidenceSelector::new(&long).select("q", 5, &index).unwrap();
        assert_eq!(out.statements.len(), 2);
    }

    #[test]
    fn untagged_candidates_fall_back_to_source_index() {
        let mut index = TripleIndex::new();
        index.push(Candidate::new(t("a", "b"), vec![]));
        let mut sources = SourceIndex::new();
        sources.insert(t("a", "b"), tag("9"));
        let model = Scripted {
            rerank: index.triples(),
            statements: None,
        };
        let out = EvidenceSelector::new(&model)
            .with_source_index(&sources)
            .select("q", 5, &index)
            .unwrap();
        assert_eq!(out.sources, vec![vec![tag("9")]]);
    }

    #[test]
    fn empty_candidates_skip_the_model() {
        let model = Scripted {
            rerank: vec![t("x", "y")],
            statements: None,
        };
        let out = EvidenceSelector::new(&model)
            .select("q", 5, &TripleIndex::new())
            .unwrap();
        assert!(out.is_empty());
    }

    proptest! {
        #[test]
        fn selection_is_an_aligned_subset_of_candidates(
            edges in prop::collection::vec((0u8..5, 0u8..5, any::<bool>()), 0..12),
            picks in prop::collection::vec((0u8..6, 0u8..6), 0..16),
            k in 0usize..6,
            statements in prop::option::of(0usize..8),
        ) {
            let name = |i: u8| format!("n{i}");
            let mut index = TripleIndex::new();
            for (s, o, tagged) in &edges {
                let tags = if *tagged { vec![tag(&format!("{s}{o}"))] } else { vec![] };
                index.push(Candidate::new(t(&name(*s), &name(*o)), tags));
            }
            let model = Scripted {
                rerank: picks.iter().map(|(s, o)| t(&name(*s), &name(*o))).collect(),
                statements,
            };
            let out = EvidenceSelector::new(&model).select("q", k, &index).unwrap();

            prop_assert!(out.triples.len() <= k);
            prop_assert_eq!(out.sources.len(), out.triples.len());
            prop_assert_eq!(out.statements.len(), out.triples.len());
            let distinct: HashSet<&Triple> = out.triples.iter().collect();
            prop_assert_eq!(distinct.len(), out.triples.len());
            for (triple, sources) in out.triples.iter().zip(&out.sources) {
                prop_assert_eq!(index.tags(triple), Some(sources.as_slice()));
            }
        }
    }
}
