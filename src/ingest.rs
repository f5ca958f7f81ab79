//! Streaming ingestion: word windows → checkpoints → store upserts.
//!
//! Text is fed in arbitrary pieces, each with the [`Origin`] it came from.
//! Whenever more than `chunk_size` words are buffered, the first `chunk_size`
//! form a chunk and the buffer advances by `chunk_size - chunk_overlap`.
//! [`StreamingBuilder::finish`] flushes whatever has not been covered yet.
//!
//! Each chunk is hashed and checkpointed before its graph is written to the
//! store, so an interrupted run resumes without re-extracting.

use std::sync::{Arc, LazyLock};
use std::time::Instant;

use regex::Regex;
use serde::Serialize;

use crate::cancel::CancellationToken;
use crate::checkpoint::{ChunkRecord, CheckpointStore, content_hash, file_name};
use crate::config::IngestConfig;
use crate::error::{EngineError, ScopeResult};
use crate::graph::Graph;
use crate::llm::GraphExtractor;
use crate::provenance::{ProvenanceTag, SourceRange};
use crate::store::GraphStore;

/// Where a piece of fed text came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Origin {
    pub document: Option<String>,
    pub range: Option<SourceRange>,
}

impl Origin {
    pub fn document(document: impl Into<String>) -> Self {
        Self {
            document: Some(document.into()),
            range: None,
        }
    }

    pub fn page(mut self, page: u32) -> Self {
        self.range = Some(SourceRange::Pages {
            start: page,
            end: page,
        });
        self
    }

    pub fn time(mut self, start_ms: u64, end_ms: u64) -> Self {
        self.range = Some(SourceRange::Time { start_ms, end_ms });
        self
    }
}

/// Widen `acc` to cover `next`. Ranges of a different kind are ignored.
fn widen(acc: Option<SourceRange>, next: Option<&SourceRange>) -> Option<SourceRange> {
    match (acc, next) {
        (None, next) => next.cloned(),
        (Some(acc), None) => Some(acc),
        (Some(SourceRange::Pages { start, end }), Some(SourceRange::Pages { start: s, end: e })) => {
            Some(SourceRange::Pages {
                start: start.min(*s),
                end: end.max(*e),
            })
        }
        (
            Some(SourceRange::Time { start_ms, end_ms }),
            Some(SourceRange::Time {
                start_ms: s,
                end_ms: e,
            }),
        ) => Some(SourceRange::Time {
            start_ms: start_ms.min(*s),
            end_ms: end_ms.max(*e),
        }),
        (Some(acc), Some(_)) => Some(acc),
    }
}

/// Counters for one ingestion run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub chunks: usize,
    /// Chunks whose checkpoint already existed.
    pub reused: usize,
    /// Chunks kept with an empty graph after extraction failed.
    pub failed: usize,
    pub entities: usize,
    pub relations: usize,
    /// Store upserts that created an element or appended a tag.
    pub changed: usize,
}

/// Buffers words and turns full windows into checkpointed, uploaded chunks.
pub struct StreamingBuilder<'a> {
    extractor: &'a dyn GraphExtractor,
    store: &'a dyn GraphStore,
    checkpoints: &'a CheckpointStore,
    chunk_size: usize,
    chunk_overlap: usize,
    skip_errors: bool,
    cancel: CancellationToken,
    buffer: Vec<(String, Arc<Origin>)>,
    /// Leading buffered words that already belong to an emitted chunk.
    covered: usize,
    next_chunk: usize,
    stats: IngestStats,
}

impl<'a> StreamingBuilder<'a> {
    pub fn new(
        extractor: &'a dyn GraphExtractor,
        store: &'a dyn GraphStore,
        checkpoints: &'a CheckpointStore,
        settings: &IngestConfig,
        cancel: CancellationToken,
    ) -> Result<Self, EngineError> {
        if settings.chunk_size == 0 {
            return Err(EngineError::InvalidConfig {
                message: "ingest.chunk_size must be at least 1".into(),
            });
        }
        if settings.chunk_overlap >= settings.chunk_size {
            return Err(EngineError::InvalidConfig {
                message: format!(
                    "ingest.chunk_overlap ({}) must be smaller than ingest.chunk_size ({})",
                    settings.chunk_overlap, settings.chunk_size
                ),
            });
        }
        Ok(Self {
            extractor,
            store,
            checkpoints,
            chunk_size: settings.chunk_size,
            chunk_overlap: settings.chunk_overlap,
            skip_errors: settings.skip_errors,
            cancel,
            buffer: Vec::new(),
            covered: 0,
            next_chunk: 0,
            stats: IngestStats::default(),
        })
    }

    /// Buffer the words of `text`, processing every full window.
    pub fn feed(&mut self, text: &str, origin: Origin) -> ScopeResult<()> {
        let origin = Arc::new(origin);
        self.buffer.extend(
            text.split_whitespace()
                .map(|w| (w.to_string(), Arc::clone(&origin))),
        );
        while self.buffer.len() > self.chunk_size {
            self.cancel.check("ingest")?;
            self.process(self.chunk_size)?;
            let advance = self.chunk_size - self.chunk_overlap;
            self.buffer.drain(..advance);
            self.covered = self.chunk_overlap.min(self.buffer.len());
        }
        Ok(())
    }

    /// Process any words no chunk has covered yet and return the run's counters.
    pub fn finish(mut self) -> ScopeResult<IngestStats> {
        if self.buffer.len() > self.covered {
            self.cancel.check("ingest")?;
            self.process(self.buffer.len())?;
        }
        self.buffer.clear();
        tracing::info!(
            chunks = self.stats.chunks,
            reused = self.stats.reused,
            failed = self.stats.failed,
            changed = self.stats.changed,
            "ingestion finished"
        );
        Ok(self.stats)
    }

    pub fn stats(&self) -> IngestStats {
        self.stats
    }

    fn process(&mut self, len: usize) -> ScopeResult<()> {
        let window = &self.buffer[..len];
        let text = window
            .iter()
            .map(|(w, _)| w.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let document = window.first().and_then(|(_, o)| o.document.clone());
        let range = window
            .iter()
            .fold(None, |acc, (_, o)| widen(acc, o.range.as_ref()));
        let chunk = self.next_chunk;
        self.next_chunk += 1;

        let record = match self.checkpoints.lookup(&text)? {
            Some(record) => {
                tracing::debug!(hash = %record.hash, "checkpoint exists; skipping extraction");
                self.stats.reused += 1;
                record
            }
            None => {
                let hash = content_hash(&text);
                let mut tags = ProvenanceTag::new(file_name(&hash)).with_chunk(chunk);
                tags.document = document;
                tags.range = range;
                let record = self.extract(text, hash, tags)?;
                self.checkpoints.save(&record)?;
                record
            }
        };
        if record.errors.is_some() {
            self.stats.failed += 1;
        }

        let upload = self.store.upload(&record.graph, Some(&record.tags))?;
        self.stats.chunks += 1;
        self.stats.entities += upload.entities;
        self.stats.relations += upload.relations;
        self.stats.changed += upload.changed;
        tracing::info!(
            checkpoint = %record.tags.checkpoint,
            words = len,
            entities = upload.entities,
            relations = upload.relations,
            "chunk processed"
        );
        Ok(())
    }

    fn extract(&self, text: String, hash: String, tags: ProvenanceTag) -> ScopeResult<ChunkRecord> {
        let started = Instant::now();
        let extracted = self.extractor.extract_graph(&text);
        let time = started.elapsed().as_secs_f64();
        let (graph, errors) = match extracted {
            Ok(graph) => (graph, None),
            Err(e) if self.skip_errors => {
                tracing::warn!(hash = %hash, error = %e, "extraction failed; keeping empty graph");
                (Graph::new(), Some(e.to_string()))
            }
            Err(e) => {
                return Err(EngineError::Extraction {
                    hash,
                    message: e.to_string(),
                }
                .into());
            }
        };
        Ok(ChunkRecord {
            text,
            hash,
            time,
            graph,
            tags,
            errors,
        })
    }
}

static SRT_TIMING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+):(\d{2}):(\d{2})[,.](\d{3})\s*-->\s*(\d+):(\d{2}):(\d{2})[,.](\d{3})")
        .expect("valid srt timing regex")
});

/// Split a document into fed pieces with their origins.
///
/// SubRip subtitles (`.srt`) yield one piece per cue with its time range.
/// Anything else is split on form feeds into 1-based pages.
pub fn document_pieces(document: &str, content: &str) -> Vec<(String, Origin)> {
    if document.to_ascii_lowercase().ends_with(".srt") {
        return srt_cues(content)
            .into_iter()
            .map(|(text, start, end)| (text, Origin::document(document).time(start, end)))
            .collect();
    }
    content
        .split('\u{c}')
        .enumerate()
        .filter(|(_, page)| !page.trim().is_empty())
        .map(|(i, page)| {
            let page_no = u32::try_from(i + 1).unwrap_or(u32::MAX);
            (page.to_string(), Origin::document(document).page(page_no))
        })
        .collect()
}

fn srt_cues(content: &str) -> Vec<(String, u64, u64)> {
    let ms = |c: &regex::Captures<'_>, at: usize| -> u64 {
        let n = |i: usize| c[at + i].parse::<u64>().unwrap_or(0);
        ((n(0) * 60 + n(1)) * 60 + n(2)) * 1000 + n(3)
    };
    let mut cues = Vec::new();
    let normalized = content.replace("\r\n", "\n");
    for block in normalized.split("\n\n") {
        let mut lines = block.lines().filter(|l| !l.trim().is_empty());
        let Some(timing) = lines.find_map(|l| SRT_TIMING.captures(l)) else {
            continue;
        };
        let text = lines.collect::<Vec<_>>().join(" ");
        if !text.trim().is_empty() {
            cues.push((text, ms(&timing, 1), ms(&timing, 5)));
        }
    }
    cues
}
