//! Provenance tags: where a triple or entity was observed.
//!
//! A tag names the content-addressed checkpoint of the chunk that produced the
//! observation, plus whatever document metadata the ingestion caller supplied
//! (document id, page or timestamp range, chunk position). Tags accumulate on
//! entities and relations; accumulation is append-if-absent, never overwrite.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The span of a source document a chunk was cut from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceRange {
    /// Inclusive page range (1-based).
    Pages { start: u32, end: u32 },
    /// Media time range in milliseconds.
    Time { start_ms: u64, end_ms: u64 },
}

/// A single provenance record attached to one observation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProvenanceTag {
    /// Checkpoint file name of the originating chunk (`chunk-<md5>.json`).
    pub checkpoint: String,
    /// Source document identifier.
    #[serde(default)]
    pub document: Option<String>,
    /// Page or time range within the document.
    #[serde(default)]
    pub range: Option<SourceRange>,
    /// Position of the chunk within its document.
    #[serde(default)]
    pub chunk: Option<usize>,
}

impl ProvenanceTag {
    /// A tag that only names its checkpoint.
    pub fn new(checkpoint: impl Into<String>) -> Self {
        Self {
            checkpoint: checkpoint.into(),
            document: None,
            range: None,
            chunk: None,
        }
    }

    pub fn with_document(mut self, document: impl Into<String>) -> Self {
        self.document = Some(document.into());
        self
    }

    pub fn with_pages(mut self, start: u32, end: u32) -> Self {
        self.range = Some(SourceRange::Pages { start, end });
        self
    }

    pub fn with_time(mut self, start_ms: u64, end_ms: u64) -> Self {
        self.range = Some(SourceRange::Time { start_ms, end_ms });
        self
    }

    pub fn with_chunk(mut self, chunk: usize) -> Self {
        self.chunk = Some(chunk);
        self
    }

    /// Checkpoint hash without the `chunk-` prefix and `.json` suffix.
    pub fn checkpoint_hash(&self) -> &str {
        let id = self.checkpoint.as_str();
        let id = id.strip_prefix("chunk-").unwrap_or(id);
        id.strip_suffix(".json").unwrap_or(id)
    }
}

impl fmt::Display for ProvenanceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(doc) = &self.document {
            write!(f, "{doc} ")?;
        }
        match &self.range {
            Some(SourceRange::Pages { start, end }) if start == end => write!(f, "p.{start} ")?,
            Some(SourceRange::Pages { start, end }) => write!(f, "pp.{start}-{end} ")?,
            Some(SourceRange::Time { start_ms, end_ms }) => {
                write!(f, "{:.1}s-{:.1}s ", *start_ms as f64 / 1000.0, *end_ms as f64 / 1000.0)?
            }
            None => {}
        }
        write!(f, "[{}]", self.checkpoint)
    }
}

/// Append `tag` to `tags` unless an equal tag is already present.
///
/// Returns whether the list changed. Applying the same tag twice is a no-op.
pub fn accumulate(tags: &mut Vec<ProvenanceTag>, tag: &ProvenanceTag) -> bool {
    if tags.contains(tag) {
        return false;
    }
    tags.push(tag.clone());
    true
}

/// Merge every tag of `incoming` into `tags`, preserving first-seen order.
pub fn merge(tags: &mut Vec<ProvenanceTag>, incoming: &[ProvenanceTag]) -> usize {
    incoming.iter().filter(|t| accumulate(tags, t)).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulate_is_idempotent() {
        let tag = ProvenanceTag::new("chunk-abc.json").with_pages(3, 4);
        let mut tags = Vec::new();
        assert!(accumulate(&mut tags, &tag));
        assert!(!accumulate(&mut tags, &tag));
        assert_eq!(tags.len(), 1);
    }

    #[test]
    fn accumulate_appends_distinct_tags_in_order() {
        let a = ProvenanceTag::new("chunk-a.json");
        let b = ProvenanceTag::new("chunk-b.json");
        let mut tags = vec![a.clone()];
        accumulate(&mut tags, &b);
        assert_eq!(tags, vec![a, b]);
    }

    #[test]
    fn merge_counts_only_new_tags() {
        let a = ProvenanceTag::new("chunk-a.json");
        let b = ProvenanceTag::new("chunk-b.json");
        let mut tags = vec![a.clone()];
        assert_eq!(merge(&mut tags, &[a, b.clone(), b]), 1);
        assert_eq!(tags.len(), 2);
    }

    #[test]
    fn checkpoint_hash_strips_file_decoration() {
        let tag = ProvenanceTag::new("chunk-d41d8cd98f00b204e9800998ecf8427e.json");
        assert_eq!(tag.checkpoint_hash(), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(ProvenanceTag::new("plain").checkpoint_hash(), "plain");
    }

    #[test]
    fn display_includes_document_and_pages() {
        let tag = ProvenanceTag::new("chunk-a.json")
            .with_document("fema.pdf")
            .with_pages(2, 5);
        assert_eq!(tag.to_string(), "fema.pdf pp.2-5 [chunk-a.json]");
    }

    #[test]
    fn json_round_trip() {
        let tag = ProvenanceTag::new("chunk-a.json")
            .with_document("talk.srt")
            .with_time(1_500, 9_000)
            .with_chunk(7);
        let json = serde_json::to_string(&tag).unwrap();
        let back: ProvenanceTag = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tag);
    }
}
