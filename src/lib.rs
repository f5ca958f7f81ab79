// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # kgscope
//!
//! Provenance-aware subgraph retrieval over an entity-relation graph, with a
//! hierarchical community index ("label tree") for scoping results.
//!
//! ## Architecture
//!
//! - **Graph model** (`graph`, `provenance`): triples, set-semantics graphs,
//!   append-only provenance tags
//! - **Stores** (`store`): petgraph in memory (optionally on redb) or Neo4j
//! - **Retrieval** (`retrieve`): multi-hop paths, neighbors, deduplicated
//!   evidence, reranking and answer synthesis through a [`llm::LanguageModel`]
//! - **Community index** (`community`): recursive partitioning, bottom-up
//!   labeling, pruned path queries
//! - **Ingestion** (`ingest`, `checkpoint`, `source_index`): word-window
//!   chunking with content-addressed checkpoints
//!
//! ## Library usage
//!
//! ```no_run
//! use kgscope::cancel::CancellationToken;
//! use kgscope::config::ScopeConfig;
//! use kgscope::engine::Engine;
//!
//! let engine = Engine::open(ScopeConfig::default()).unwrap();
//! let response = engine
//!     .query("How is FEMA related to NIMS?", &CancellationToken::new())
//!     .unwrap();
//! println!("{}", response.answer);
//! ```

pub mod cancel;
pub mod checkpoint;
pub mod community;
pub mod config;
pub mod engine;
pub mod error;
pub mod escape;
pub mod graph;
mod http;
pub mod ingest;
pub mod llm;
pub mod paths;
pub mod provenance;
pub mod retrieve;
pub mod source_index;
pub mod store;
