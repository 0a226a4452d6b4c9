//! Citation assembly: turns the final ranking into a bounded context window
//! with per-chunk markers and document-level citations.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use hybridrag_core::store::ChunkStore;
use hybridrag_core::types::{ChunkId, DocumentId, RankedResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextBlock {
    pub marker: String,
    pub chunk_id: ChunkId,
    pub document_id: DocumentId,
    pub text: String,
}

/// One entry per cited document, listing every marker that points at it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub document_id: DocumentId,
    pub locator: String,
    pub label: String,
    pub markers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CitationTarget {
    pub doc_id: DocumentId,
    pub locator: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadBlock {
    pub marker: String,
    pub text: String,
}

/// What the answer generator receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationPayload {
    pub context_blocks: Vec<PayloadBlock>,
    pub citations: BTreeMap<String, CitationTarget>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssembledContext {
    pub blocks: Vec<ContextBlock>,
    pub citations: Vec<Citation>,
    /// Characters of chunk text included.
    pub used_chars: usize,
    /// Ranked chunks left out because they would overflow the budget.
    pub skipped: Vec<ChunkId>,
}

impl AssembledContext {
    pub fn is_empty(&self) -> bool { self.blocks.is_empty() }

    /// marker -> cited document.
    pub fn marker_map(&self) -> BTreeMap<String, CitationTarget> {
        let mut map = BTreeMap::new();
        for c in &self.citations {
            for m in &c.markers {
                map.insert(
                    m.clone(),
                    CitationTarget { doc_id: c.document_id, locator: c.locator.clone(), label: c.label.clone() },
                );
            }
        }
        map
    }

    pub fn payload(&self) -> GenerationPayload {
        GenerationPayload {
            context_blocks: self
                .blocks
                .iter()
                .map(|b| PayloadBlock { marker: b.marker.clone(), text: b.text.clone() })
                .collect(),
            citations: self.marker_map(),
        }
    }

    /// Plain-text rendering: numbered blocks followed by a source list.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for b in &self.blocks {
            let _ = writeln!(out, "{} {}\n", b.marker, b.text);
        }
        if !self.citations.is_empty() {
            out.push_str("Sources:\n");
            for c in &self.citations {
                let _ = writeln!(out, "{} {} ({})", c.markers.concat(), c.label, c.locator);
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CitationAssembler {
    budget: usize,
}

impl CitationAssembler {
    /// `budget` is measured in characters (Unicode scalar values).
    pub fn new(budget: usize) -> Self { Self { budget } }

    pub fn budget(&self) -> usize { self.budget }

    /// Greedily take chunks in rank order. A chunk that would overflow the
    /// budget is skipped whole; a later, shorter one may still fit.
    pub fn assemble(&self, ranked: &[RankedResult], store: &ChunkStore) -> AssembledContext {
        let mut ctx = AssembledContext::default();
        let mut by_doc: HashMap<DocumentId, usize> = HashMap::new();
        for r in ranked {
            let Some(chunk) = store.chunk(r.chunk_id) else { continue };
            let Some(doc) = store.document(chunk.document_id) else { continue };
            let len = chunk.text.chars().count();
            if ctx.used_chars + len > self.budget {
                ctx.skipped.push(chunk.id);
                continue;
            }
            ctx.used_chars += len;
            let marker = format!("[{}]", ctx.blocks.len() + 1);
            ctx.blocks.push(ContextBlock {
                marker: marker.clone(),
                chunk_id: chunk.id,
                document_id: doc.id,
                text: chunk.text.clone(),
            });
            let slot = *by_doc.entry(doc.id).or_insert_with(|| {
                ctx.citations.push(Citation {
                    document_id: doc.id,
                    locator: doc.locator.clone(),
                    label: doc.label(),
                    markers: Vec::new(),
                });
                ctx.citations.len() - 1
            });
            ctx.citations[slot].markers.push(marker);
        }
        if !ctx.skipped.is_empty() {
            tracing::debug!(skipped = ctx.skipped.len(), budget = self.budget, "chunks left out of context");
        }
        ctx
    }
}
