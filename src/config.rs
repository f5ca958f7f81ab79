//! kgscope configuration, persisted as TOML.
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration: in-memory store, local Ollama, on-disk artifacts under
//! `.kgscope/`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::community::PartitionerKind;
use crate::error::ConfigError;
use crate::llm::OllamaConfig;
use crate::paths::DataPaths;
use crate::store::Neo4jConfig;

/// Which graph store to open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreBackend {
    /// petgraph in memory; mirrored to `<data_dir>/db/` when `persist`.
    Memory {
        #[serde(default)]
        persist: bool,
    },
    Neo4j(Neo4jConfig),
}

impl Default for StoreBackend {
    fn default() -> Self {
        Self::Memory { persist: true }
    }
}

fn default_path_hops() -> usize {
    2
}
fn default_neighbor_hops() -> usize {
    1
}
fn default_rerank_k() -> usize {
    5
}

/// Query-time traversal and ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Search radius when linking one target entity to the next.
    #[serde(default = "default_path_hops")]
    pub path_hops: usize,
    #[serde(default = "default_neighbor_hops")]
    pub neighbor_hops: usize,
    /// Triples kept after reranking.
    #[serde(default = "default_rerank_k")]
    pub rerank_k: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            path_hops: default_path_hops(),
            neighbor_hops: default_neighbor_hops(),
            rerank_k: default_rerank_k(),
        }
    }
}

fn default_subdivision_threshold() -> usize {
    8
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommunityConfig {
    /// Communities larger than this are split again.
    #[serde(default = "default_subdivision_threshold")]
    pub subdivision_threshold: usize,
    /// Algorithm used to split a community.
    #[serde(default)]
    pub partitioner: PartitionerKind,
}

impl Default for CommunityConfig {
    fn default() -> Self {
        Self {
            subdivision_threshold: default_subdivision_threshold(),
            partitioner: PartitionerKind::default(),
        }
    }
}

fn default_chunk_size() -> usize {
    100
}
fn default_chunk_overlap() -> usize {
    10
}
fn default_skip_errors() -> bool {
    true
}

/// Streaming ingestion windows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Words per chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Words shared by consecutive chunks.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    /// Keep failed chunks as empty graphs instead of aborting.
    #[serde(default = "default_skip_errors")]
    pub skip_errors: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            skip_errors: default_skip_errors(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".kgscope")
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub store: StoreBackend,
    #[serde(default)]
    pub llm: OllamaConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub community: CommunityConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            store: StoreBackend::default(),
            llm: OllamaConfig::default(),
            query: QueryConfig::default(),
            community: CommunityConfig::default(),
            ingest: IngestConfig::default(),
        }
    }
}

impl ScopeConfig {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Load `path` if it exists, defaults otherwise; then apply the environment.
    pub fn resolve(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) if p.exists() => Self::load(p)?,
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Save to a TOML file.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(path, content).map_err(|e| ConfigError::Write {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// Apply `KGSCOPE_*` overrides read through `var`.
    ///
    /// Any `KGSCOPE_DB_*` variable selects the Neo4j backend.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        let db = [
            "KGSCOPE_DB_URL",
            "KGSCOPE_DB_USER",
            "KGSCOPE_DB_PASSWORD",
            "KGSCOPE_DB_DATABASE",
        ]
        .map(|k| var(k));
        if db.iter().any(Option::is_some) {
            if !matches!(self.store, StoreBackend::Neo4j(_)) {
                self.store = StoreBackend::Neo4j(Neo4jConfig::default());
            }
            if let StoreBackend::Neo4j(neo) = &mut self.store {
                let [url, user, password, database] = db;
                if let Some(v) = url {
                    neo.url = v;
                }
                if let Some(v) = user {
                    neo.user = v;
                }
                if let Some(v) = password {
                    neo.password = v;
                }
                if let Some(v) = database {
                    neo.database = v;
                }
            }
        }
        if let Some(model) = var("KGSCOPE_MODEL") {
            self.llm.model = model;
        }
    }

    pub fn paths(&self) -> DataPaths {
        DataPaths::new(&self.data_dir)
    }
}
