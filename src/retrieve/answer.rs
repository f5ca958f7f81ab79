//! Answer synthesis and the end-to-end query pipeline.

use serde::{Deserialize, Serialize};

use crate::cancel::CancellationToken;
use crate::community::CommunityNode;
use crate::community::label::label_paths_to;
use crate::config::QueryConfig;
use crate::error::{LlmError, ScopeResult};
use crate::graph::Triple;
use crate::llm::{GraphExtractor, LanguageModel};
use crate::provenance::ProvenanceTag;
use crate::source_index::SourceIndex;
use crate::store::GraphStore;

use super::evidence::{EvidenceSelector, TripleIndex};
use super::neighbor::NeighborAssembler;
use super::path::PathAssembler;

/// Produces the final answer from selected evidence.
pub struct AnswerSynthesizer<'a> {
    model: &'a dyn LanguageModel,
}

impl<'a> AnswerSynthesizer<'a> {
    pub fn new(model: &'a dyn LanguageModel) -> Self {
        Self { model }
    }

    pub fn synthesize(&self, question: &str, statements: &[String]) -> Result<String, LlmError> {
        self.model.answer(question, statements)
    }
}

/// What a query returns to its caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub query: String,
    pub answer: String,
    /// One statement per selected triple.
    pub statements: Vec<String>,
    /// Provenance per statement, index-aligned with `statements`.
    pub sources: Vec<Vec<ProvenanceTag>>,
    /// The selected triples, index-aligned with `statements`.
    pub triples: Vec<Triple>,
    /// Label-tree subtree covering the entities of the selected triples.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph: Option<CommunityNode>,
}

/// Everything one query needs, borrowed for the duration of the request.
pub struct QueryPipeline<'a> {
    pub store: &'a dyn GraphStore,
    pub model: &'a dyn LanguageModel,
    pub extractor: &'a dyn GraphExtractor,
    pub settings: &'a QueryConfig,
    pub source_index: Option<&'a SourceIndex>,
    pub labels: Option<&'a CommunityNode>,
}

impl QueryPipeline<'_> {
    /// Answer `question`.
    ///
    /// Target entities are exactly the entities extracted from the question.
    /// Cancellation is checked between steps; a cancelled query returns
    /// `EngineError::Cancelled` and leaves nothing behind.
    pub fn run(&self, question: &str, cancel: &CancellationToken) -> ScopeResult<QueryResponse> {
        let targets = self.extractor.extract_entities(question)?;
        tracing::info!(entities = ?targets, "query targets");
        cancel.check("query")?;

        let segments = PathAssembler::new(self.store, self.settings.path_hops)
            .assemble(&targets, cancel)?;
        cancel.check("query")?;

        let neighbors =
            NeighborAssembler::new(self.store, self.settings.neighbor_hops).assemble(&targets)?;
        cancel.check("query")?;

        let index = TripleIndex::from_parts(&segments, neighbors);
        let mut selector = EvidenceSelector::new(self.model);
        if let Some(sources) = self.source_index {
            selector = selector.with_source_index(sources);
        }
        let evidence = selector.select(question, self.settings.rerank_k, &index)?;
        cancel.check("query")?;

        let answer = AnswerSynthesizer::new(self.model).synthesize(question, &evidence.statements)?;
        let graph = self
            .labels
            .and_then(|tree| label_paths_to(tree, &evidence.entities()));

        Ok(QueryResponse {
            query: question.to_string(),
            answer,
            statements: evidence.statements,
            sources: evidence.sources,
            triples: evidence.triples,
            graph,
        })
    }
}
