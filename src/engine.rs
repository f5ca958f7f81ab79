//! Engine facade: top-level API for kgscope.
//!
//! The `Engine` owns the graph store, the model capabilities, the checkpoint
//! directory, and the load-once caches of the derived artifacts (source index
//! and label tree). Derived artifacts are read-only once loaded; rebuilding
//! one swaps the cached `Arc`, so in-flight queries keep the version they
//! started with.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, RwLock};

use serde::Serialize;

use crate::cancel::CancellationToken;
use crate::checkpoint::{CheckpointStore, ChunkRecord, ProcessingStats};
use crate::community::label::{self, LabelCache, LabelEstimate};
use crate::community::{CommunityNode, CommunityPartitioner, Partitioner};
use crate::config::ScopeConfig;
use crate::error::{EngineError, LabelError, ScopeResult};
use crate::graph::{Graph, Triple};
use crate::ingest::{IngestStats, StreamingBuilder, document_pieces};
use crate::llm::{GraphExtractor, LanguageModel, OllamaClient};
use crate::paths::DataPaths;
use crate::provenance::ProvenanceTag;
use crate::retrieve::{QueryPipeline, QueryResponse};
use crate::source_index::SourceIndex;
use crate::store::{GraphStore, UploadStats, open_store};

/// The external capabilities an engine runs against.
pub struct Capabilities {
    pub store: Arc<dyn GraphStore>,
    pub model: Arc<dyn LanguageModel>,
    pub extractor: Arc<dyn GraphExtractor>,
    pub partitioner: Arc<dyn Partitioner>,
}

/// The kgscope retrieval engine.
pub struct Engine {
    config: ScopeConfig,
    paths: DataPaths,
    caps: Capabilities,
    checkpoints: CheckpointStore,
    label_cache: LabelCache,
    source_index: RwLock<Option<Arc<SourceIndex>>>,
    labels: RwLock<Option<Arc<CommunityNode>>>,
}

impl Engine {
    /// Open the configured store and connect to the configured Ollama server.
    pub fn open(config: ScopeConfig) -> ScopeResult<Self> {
        let paths = config.paths();
        ensure_dirs(&paths)?;
        let store = open_store(&config.store, &paths.db_dir)?;
        let client = Arc::new(OllamaClient::new(config.llm.clone()));
        let partitioner = config.community.partitioner.build();
        tracing::info!(
            backend = store.backend(),
            model = %config.llm.model,
            partitioner = ?config.community.partitioner,
            data_dir = %paths.root.display(),
            "opening kgscope engine"
        );
        Self::with_capabilities(
            config,
            Capabilities {
                store,
                model: client.clone(),
                extractor: client,
                partitioner,
            },
        )
    }

    /// Build an engine over explicit capabilities.
    pub fn with_capabilities(config: ScopeConfig, caps: Capabilities) -> ScopeResult<Self> {
        validate(&config)?;
        let paths = config.paths();
        ensure_dirs(&paths)?;
        Ok(Self {
            checkpoints: CheckpointStore::new(&paths.chunks_dir),
            label_cache: LabelCache::new(&paths.labels_file),
            source_index: RwLock::new(None),
            labels: RwLock::new(None),
            paths,
            config,
            caps,
        })
    }

    pub fn config(&self) -> &ScopeConfig {
        &self.config
    }

    pub fn paths(&self) -> &DataPaths {
        &self.paths
    }

    pub fn store(&self) -> &dyn GraphStore {
        self.caps.store.as_ref()
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    // -----------------------------------------------------------------------
    // Ingestion and derived artifacts
    // -----------------------------------------------------------------------

    /// Stream one document through chunking, extraction and store upserts.
    pub fn ingest_text(
        &self,
        document: &str,
        content: &str,
        cancel: &CancellationToken,
    ) -> ScopeResult<IngestStats> {
        let mut builder = StreamingBuilder::new(
            self.caps.extractor.as_ref(),
            self.caps.store.as_ref(),
            &self.checkpoints,
            &self.config.ingest,
            cancel.clone(),
        )?;
        for (text, origin) in document_pieces(document, content) {
            builder.feed(&text, origin)?;
        }
        builder.finish()
    }

    /// Ingest a file, naming the document after the file.
    pub fn ingest_file(&self, path: &Path, cancel: &CancellationToken) -> ScopeResult<IngestStats> {
        let content = std::fs::read_to_string(path).map_err(|source| EngineError::Input {
            path: path.display().to_string(),
            source,
        })?;
        let document = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.ingest_text(&document, &content, cancel)
    }

    /// Union of every checkpoint graph, written to `graph.json`.
    pub fn aggregate(&self) -> ScopeResult<Graph> {
        let records = self.checkpoints.records()?;
        let graph = Graph::aggregate(records.iter().map(|r| &r.graph));
        graph.save(&self.paths.graph_file)?;
        tracing::info!(
            chunks = records.len(),
            entities = graph.entities.len(),
            relations = graph.relations.len(),
            "graph aggregated"
        );
        Ok(graph)
    }

    /// Chunk relations absent from the aggregated graph on disk.
    pub fn missing_from_aggregate(&self) -> ScopeResult<Vec<Triple>> {
        let big = Graph::load(&self.paths.graph_file)?;
        let mut missing = Vec::new();
        for record in self.checkpoints.records()? {
            missing.extend(record.graph.missing_relations(&big).into_iter().cloned());
        }
        Ok(missing)
    }

    /// Rebuild the source index from checkpoints, persist it, and cache it.
    pub fn build_index(&self) -> ScopeResult<Arc<SourceIndex>> {
        let records = self.checkpoints.records()?;
        let index = SourceIndex::from_checkpoints(&records);
        index.save(&self.paths.index_file)?;
        let index = Arc::new(index);
        *self.source_index.write().expect("source index lock poisoned") = Some(index.clone());
        Ok(index)
    }

    /// The source index, loaded from disk on first use. `None` if never built.
    pub fn source_index(&self) -> ScopeResult<Option<Arc<SourceIndex>>> {
        if let Some(index) = self
            .source_index
            .read()
            .expect("source index lock poisoned")
            .as_ref()
        {
            return Ok(Some(index.clone()));
        }
        if !self.paths.index_file.is_file() {
            return Ok(None);
        }
        let index = Arc::new(SourceIndex::load(&self.paths.index_file)?);
        *self.source_index.write().expect("source index lock poisoned") = Some(index.clone());
        Ok(Some(index))
    }

    /// Re-upload every checkpoint graph under its chunk tags.
    ///
    /// With `clear`, the store is emptied first.
    pub fn upload(&self, clear: bool, cancel: &CancellationToken) -> ScopeResult<UploadStats> {
        if clear {
            self.caps.store.clear()?;
            tracing::info!(backend = self.caps.store.backend(), "store cleared");
        }
        let mut total = UploadStats::default();
        for record in self.checkpoints.records()? {
            cancel.check("upload")?;
            let stats = self.caps.store.upload(&record.graph, Some(&record.tags))?;
            total.entities += stats.entities;
            total.relations += stats.relations;
            total.changed += stats.changed;
        }
        tracing::info!(
            entities = total.entities,
            relations = total.relations,
            changed = total.changed,
            "checkpoints uploaded"
        );
        Ok(total)
    }

    // -----------------------------------------------------------------------
    // Label tree
    // -----------------------------------------------------------------------

    /// Partition the store's graph without labeling it.
    pub fn partition(&self, cancel: &CancellationToken) -> ScopeResult<Option<CommunityNode>> {
        let snapshot = self.caps.store.snapshot()?;
        let tree = CommunityPartitioner::new(
            self.caps.partitioner.as_ref(),
            self.config.community.subdivision_threshold,
        )
        .build(&snapshot, cancel)?;
        Ok(tree)
    }

    /// Model calls a label build would make.
    pub fn label_estimate(&self, cancel: &CancellationToken) -> ScopeResult<LabelEstimate> {
        Ok(self
            .partition(cancel)?
            .map(|tree| label::label_call_estimate(&tree))
            .unwrap_or_default())
    }

    /// Build the label tree, or reuse the cache unless `refresh` is set.
    ///
    /// Nothing is written if the build is cancelled or fails. `None` when the
    /// store holds no entities.
    pub fn build_labels(
        &self,
        refresh: bool,
        cancel: &CancellationToken,
    ) -> ScopeResult<Option<Arc<CommunityNode>>> {
        if !refresh {
            if let Some(tree) = self.labels()? {
                return Ok(Some(tree));
            }
        }
        let Some(tree) = self.partition(cancel)? else {
            return Ok(None);
        };
        let tree = label::build_label_tree(&tree, self.caps.model.as_ref(), cancel)?;
        cancel.check("label")?;
        self.label_cache.save(&tree)?;
        let tree = Arc::new(tree);
        *self.labels.write().expect("label tree lock poisoned") = Some(tree.clone());
        Ok(Some(tree))
    }

    /// The label tree, loaded from the cache on first use. `None` if never built.
    pub fn labels(&self) -> ScopeResult<Option<Arc<CommunityNode>>> {
        if let Some(tree) = self.labels.read().expect("label tree lock poisoned").as_ref() {
            return Ok(Some(tree.clone()));
        }
        let Some(tree) = self.label_cache.load()? else {
            return Ok(None);
        };
        let tree = Arc::new(tree);
        *self.labels.write().expect("label tree lock poisoned") = Some(tree.clone());
        Ok(Some(tree))
    }

    /// Drop the cached label tree, on disk and in memory.
    pub fn invalidate_labels(&self) -> ScopeResult<()> {
        self.label_cache.invalidate()?;
        *self.labels.write().expect("label tree lock poisoned") = None;
        Ok(())
    }

    fn require_labels(&self) -> ScopeResult<Arc<CommunityNode>> {
        Ok(self.labels()?.ok_or(LabelError::NotBuilt)?)
    }

    /// Subtree rooted at the first node labeled `label`.
    pub fn find_label(&self, label: &str) -> ScopeResult<Option<CommunityNode>> {
        let tree = self.require_labels()?;
        Ok(label::find_label(&tree, label).cloned())
    }

    /// Pruned root-to-leaf path to `entity`.
    pub fn label_path(&self, entity: &str) -> ScopeResult<Option<CommunityNode>> {
        let tree = self.require_labels()?;
        Ok(label::label_path_to(&tree, entity))
    }

    /// Pruned subtree covering `entities`.
    pub fn label_paths(&self, entities: &HashSet<String>) -> ScopeResult<Option<CommunityNode>> {
        let tree = self.require_labels()?;
        Ok(label::label_paths_to(&tree, entities))
    }

    // -----------------------------------------------------------------------
    // Query surface
    // -----------------------------------------------------------------------

    /// Answer a question from the graph.
    ///
    /// Uses the source index and label tree if they have been built; neither
    /// is built on demand.
    pub fn query(&self, question: &str, cancel: &CancellationToken) -> ScopeResult<QueryResponse> {
        let index = self.source_index()?;
        let labels = self.labels()?;
        QueryPipeline {
            store: self.caps.store.as_ref(),
            model: self.caps.model.as_ref(),
            extractor: self.caps.extractor.as_ref(),
            settings: &self.config.query,
            source_index: index.as_deref(),
            labels: labels.as_deref(),
        }
        .run(question, cancel)
    }

    /// A raw checkpoint record.
    pub fn checkpoint(&self, id: &str) -> ScopeResult<Option<ChunkRecord>> {
        Ok(self.checkpoints.load(id)?)
    }

    /// Chunk texts behind `sources`, one per distinct checkpoint, in order.
    ///
    /// Checkpoints that no longer exist are skipped.
    pub fn pull_source_texts(&self, sources: &[ProvenanceTag]) -> ScopeResult<Vec<String>> {
        let mut seen = HashSet::new();
        let mut texts = Vec::new();
        for tag in sources {
            if !seen.insert(tag.checkpoint.as_str()) {
                continue;
            }
            match self.checkpoints.load(&tag.checkpoint)? {
                Some(record) => texts.push(record.text),
                None => tracing::warn!(checkpoint = %tag.checkpoint, "source checkpoint missing"),
            }
        }
        Ok(texts)
    }

    /// Processing-time statistics over every checkpoint.
    pub fn stats(&self) -> ScopeResult<ProcessingStats> {
        Ok(self.checkpoints.stats()?)
    }

    pub fn info(&self) -> ScopeResult<EngineInfo> {
        let snapshot = self.caps.store.snapshot()?;
        Ok(EngineInfo {
            backend: self.caps.store.backend().to_string(),
            data_dir: self.paths.root.display().to_string(),
            entities: snapshot.entity_count(),
            relations: snapshot.relation_count(),
            checkpoints: self.checkpoints.ids()?.len(),
            index_built: self.paths.index_file.is_file(),
            labels_built: self.label_cache.exists(),
        })
    }
}

fn ensure_dirs(paths: &DataPaths) -> Result<(), EngineError> {
    paths.ensure_dirs().map_err(|source| EngineError::DataDir {
        path: paths.root.display().to_string(),
        source,
    })
}

fn validate(config: &ScopeConfig) -> Result<(), EngineError> {
    let invalid = |message: &str| {
        Err(EngineError::InvalidConfig {
            message: message.to_string(),
        })
    };
    if config.community.subdivision_threshold == 0 {
        return invalid("community.subdivision_threshold must be at least 1");
    }
    if config.query.path_hops == 0 || config.query.neighbor_hops == 0 {
        return invalid("query.path_hops and query.neighbor_hops must be at least 1");
    }
    if config.ingest.chunk_overlap >= config.ingest.chunk_size {
        return invalid("ingest.chunk_overlap must be smaller than ingest.chunk_size");
    }
    Ok(())
}

/// Summary information about the engine state.
#[derive(Debug, Clone, Serialize)]
pub struct EngineInfo {
    pub backend: String,
    pub data_dir: String,
    pub entities: usize,
    pub relations: usize,
    pub checkpoints: usize,
    pub index_built: bool,
    pub labels_built: bool,
}

impl std::fmt::Display for EngineInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "kgscope engine info")?;
        writeln!(f, "  backend:      {}", self.backend)?;
        writeln!(f, "  data dir:     {}", self.data_dir)?;
        writeln!(f, "  entities:     {}", self.entities)?;
        writeln!(f, "  relations:    {}", self.relations)?;
        writeln!(f, "  checkpoints:  {}", self.checkpoints)?;
        writeln!(f, "  index built:  {}", self.index_built)?;
        writeln!(f, "  labels built: {}", self.labels_built)?;
        Ok(())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("backend", &self.caps.store.backend())
            .finish()
    }
}
