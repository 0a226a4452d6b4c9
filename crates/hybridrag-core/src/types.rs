//! Domain types shared by the store, both indexes and the hybrid engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

/// Store-assigned chunk identifier. Monotonic, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(pub u64);

/// Store-assigned document identifier. Monotonic, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub u64);

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chunk-{}", self.0)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "doc-{}", self.0)
    }
}

fn parse_prefixed(s: &str, prefix: &str) -> Result<u64, String> {
    let digits = s.strip_prefix(prefix).unwrap_or(s);
    digits.parse::<u64>().map_err(|e| format!("invalid identifier '{s}': {e}"))
}

impl FromStr for ChunkId {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> { parse_prefixed(s, "chunk-").map(Self) }
}

impl FromStr for DocumentId {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> { parse_prefixed(s, "doc-").map(Self) }
}

/// Where a document came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    File,
    Web,
    Structured,
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::File => "file",
            Self::Web => "web",
            Self::Structured => "structured",
        };
        f.write_str(s)
    }
}

impl FromStr for SourceType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "web" => Ok(Self::Web),
            "structured" | "csv" => Ok(Self::Structured),
            other => Err(format!("unknown source type '{other}' (expected file, web or structured)")),
        }
    }
}

/// Similarity metric of a vector index, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Cosine,
    Dot,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cosine => "cosine",
            Self::Dot => "dot",
        })
    }
}

pub type Tags = BTreeMap<String, String>;

/// An ingested source unit. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub source_type: SourceType,
    /// Origin locator: a filesystem path or URL.
    pub locator: String,
    pub title: Option<String>,
    pub ingested_at: DateTime<Utc>,
}

impl Document {
    /// Human-readable label: the title when present, else the last locator segment.
    pub fn label(&self) -> String {
        if let Some(title) = self.title.as_deref().filter(|t| !t.trim().is_empty()) {
            return title.trim().to_string();
        }
        self.locator
            .trim_end_matches('/')
            .rsplit(['/', '\\'])
            .find(|seg| !seg.is_empty())
            .unwrap_or(&self.locator)
            .to_string()
    }
}

/// A contiguous span of a document's text.
///
/// - `ordinal`: position within the parent document
/// - `char_range`: character (not byte) offsets into the parent text
/// - `tags`: structured-field tags, e.g. column names for tabular sources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub document_id: DocumentId,
    pub ordinal: usize,
    pub text: String,
    pub char_range: Range<usize>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: Tags,
}

/// Document metadata as submitted by an ingestion collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDocument {
    pub source_type: SourceType,
    pub locator: String,
    pub title: Option<String>,
}

impl NewDocument {
    pub fn new(source_type: SourceType, locator: impl Into<String>) -> Self {
        Self { source_type, locator: locator.into(), title: None }
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// Chunk payload as submitted by an ingestion collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewChunk {
    pub text: String,
    pub char_range: Range<usize>,
    pub tags: Tags,
}

impl NewChunk {
    /// A chunk spanning `start..start + text.chars().count()`.
    pub fn new(text: impl Into<String>, start: usize) -> Self {
        let text = text.into();
        let end = start + text.chars().count();
        Self { text, char_range: start..end, tags: Tags::new() }
    }

    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// Which retriever produced a candidate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RetrieverKind {
    Lexical,
    Vector,
}

impl fmt::Display for RetrieverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Lexical => "lexical",
            Self::Vector => "vector",
        })
    }
}

/// The minimal surface returned by both retrievers.
///
/// `score` is retriever-specific (raw BM25 or similarity) but higher is
/// always better.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub chunk_id: ChunkId,
    pub score: f32,
    pub source: RetrieverKind,
}

/// How a final result got its position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    /// 1-based rank in the lexical list, if present there.
    pub lexical_rank: Option<usize>,
    /// 1-based rank in the vector list, if present there.
    pub vector_rank: Option<usize>,
    /// 1-based rank after fusion.
    pub fused_rank: usize,
    /// Re-rank score; `None` when the re-ranker was disabled or failed.
    pub rerank_score: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    pub chunk_id: ChunkId,
    pub document_id: DocumentId,
    pub fused_score: f64,
    pub provenance: Provenance,
}

/// Optional restriction applied before retrieval. Empty sets mean "any".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryFilters {
    #[serde(default)]
    pub document_ids: BTreeSet<DocumentId>,
    #[serde(default)]
    pub source_types: BTreeSet<SourceType>,
}

impl QueryFilters {
    pub fn is_empty(&self) -> bool { self.document_ids.is_empty() && self.source_types.is_empty() }

    #[must_use]
    pub fn with_document(mut self, id: DocumentId) -> Self {
        self.document_ids.insert(id);
        self
    }

    #[must_use]
    pub fn with_source_type(mut self, source_type: SourceType) -> Self {
        self.source_types.insert(source_type);
        self
    }

    pub fn admits(&self, document: &Document) -> bool {
        (self.document_ids.is_empty() || self.document_ids.contains(&document.id))
            && (self.source_types.is_empty() || self.source_types.contains(&document.source_type))
    }
}
