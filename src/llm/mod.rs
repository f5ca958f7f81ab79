//! Text-generation capabilities consumed by retrieval, labeling and ingestion.
//!
//! [`LanguageModel`] covers the four typed query-time contracts (summarize,
//! rerank, verbalize, answer). [`GraphExtractor`] covers turning raw text into
//! a [`Graph`]. [`OllamaClient`] implements both against a local Ollama server;
//! tests substitute in-process fakes.

pub mod ollama;
pub mod prompt;

use crate::error::LlmError;
use crate::graph::{Graph, Triple};

pub use ollama::{OllamaClient, OllamaConfig};

/// Typed request/response text generation.
///
/// Each call is one blocking round trip with no internal retries. A timeout
/// is [`LlmError::Timeout`], never an empty result.
pub trait LanguageModel: Send + Sync {
    /// One or two words describing a list of entity names or labels.
    fn summarize(&self, items: &[String]) -> Result<String, LlmError>;

    /// At most `k` of `candidates`, most relevant to `question` first.
    ///
    /// Implementations should return elements of `candidates`; callers verify
    /// this and drop anything else.
    fn rerank(&self, question: &str, k: usize, candidates: &[Triple])
    -> Result<Vec<Triple>, LlmError>;

    /// One natural-language statement per triple, index-aligned.
    fn verbalize(&self, triples: &[Triple]) -> Result<Vec<String>, LlmError>;

    /// Final answer from the question and the evidence statements.
    fn answer(&self, question: &str, evidence: &[String]) -> Result<String, LlmError>;
}

/// Graph extraction from raw text.
pub trait GraphExtractor: Send + Sync {
    /// Entities and relations mentioned in `text`.
    fn extract_graph(&self, text: &str) -> Result<Graph, LlmError>;

    /// Entities of interest in a question, in discovery order.
    ///
    /// The order is significant: retrieval walks targets in the order
    /// returned here.
    fn extract_entities(&self, text: &str) -> Result<Vec<String>, LlmError>;
}
