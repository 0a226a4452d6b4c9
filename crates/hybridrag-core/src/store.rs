//! Chunk Store: the single source of truth for documents and chunk text.
//!
//! Indexes only ever hold `ChunkId`s plus derived data. Identifiers come from
//! monotonic counters that survive removal and persistence, so an id is never
//! handed out twice.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::error::{Error, Result};
use crate::types::{Chunk, ChunkId, Document, DocumentId, NewChunk, NewDocument, QueryFilters, SourceType};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkStore {
    next_document_id: u64,
    next_chunk_id: u64,
    documents: BTreeMap<DocumentId, Document>,
    chunks: BTreeMap<ChunkId, Chunk>,
    by_document: BTreeMap<DocumentId, Vec<ChunkId>>,
}

impl ChunkStore {
    pub fn new() -> Self { Self::default() }

    /// Reject a submission the store would not accept, without touching it.
    pub fn validate(document: &NewDocument, chunks: &[NewChunk]) -> Result<()> {
        if document.locator.trim().is_empty() {
            return Err(Error::InvalidInput("document locator must not be empty".into()));
        }
        for (ordinal, c) in chunks.iter().enumerate() {
            if c.text.trim().is_empty() {
                return Err(Error::InvalidInput(format!("chunk {ordinal} of '{}' has no text", document.locator)));
            }
            if c.char_range.start > c.char_range.end {
                return Err(Error::InvalidInput(format!(
                    "chunk {ordinal} of '{}' has inverted offsets {:?}",
                    document.locator, c.char_range
                )));
            }
        }
        Ok(())
    }

    /// Store a document and its chunks, assigning fresh identifiers.
    ///
    /// The whole submission is validated before anything is inserted.
    pub fn insert(&mut self, document: NewDocument, chunks: Vec<NewChunk>) -> Result<(DocumentId, Vec<ChunkId>)> {
        Self::validate(&document, &chunks)?;

        let doc_id = DocumentId(self.next_document_id);
        self.next_document_id += 1;
        self.documents.insert(
            doc_id,
            Document {
                id: doc_id,
                source_type: document.source_type,
                locator: document.locator,
                title: document.title,
                ingested_at: Utc::now(),
            },
        );

        let mut ids = Vec::with_capacity(chunks.len());
        for (ordinal, c) in chunks.into_iter().enumerate() {
            let id = ChunkId(self.next_chunk_id);
            self.next_chunk_id += 1;
            self.chunks.insert(
                id,
                Chunk { id, document_id: doc_id, ordinal, text: c.text, char_range: c.char_range, tags: c.tags },
            );
            ids.push(id);
        }
        self.by_document.insert(doc_id, ids.clone());
        Ok((doc_id, ids))
    }

    pub fn chunk(&self, id: ChunkId) -> Option<&Chunk> { self.chunks.get(&id) }

    pub fn document(&self, id: DocumentId) -> Option<&Document> { self.documents.get(&id) }

    pub fn contains_chunk(&self, id: ChunkId) -> bool { self.chunks.contains_key(&id) }

    /// All chunks in id order.
    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> { self.chunks.values() }

    pub fn documents(&self) -> impl Iterator<Item = &Document> { self.documents.values() }

    /// Live chunk ids of a document, in ordinal order.
    pub fn chunks_of(&self, id: DocumentId) -> &[ChunkId] { self.by_document.get(&id).map_or(&[], Vec::as_slice) }

    pub fn chunk_count(&self) -> usize { self.chunks.len() }

    pub fn document_count(&self) -> usize { self.documents.len() }

    pub fn is_empty(&self) -> bool { self.chunks.is_empty() }

    pub fn chunk_count_by_source(&self) -> BTreeMap<SourceType, usize> {
        let mut counts = BTreeMap::new();
        for chunk in self.chunks.values() {
            if let Some(doc) = self.documents.get(&chunk.document_id) {
                *counts.entry(doc.source_type).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Remove one chunk. The parent document record stays.
    pub fn remove_chunk(&mut self, id: ChunkId) -> Option<Chunk> {
        let chunk = self.chunks.remove(&id)?;
        if let Some(ids) = self.by_document.get_mut(&chunk.document_id) {
            ids.retain(|c| *c != id);
        }
        Some(chunk)
    }

    /// Remove a document together with all of its chunks.
    pub fn remove_document(&mut self, id: DocumentId) -> Option<(Document, Vec<Chunk>)> {
        let doc = self.documents.remove(&id)?;
        let ids = self.by_document.remove(&id).unwrap_or_default();
        let chunks = ids.into_iter().filter_map(|c| self.chunks.remove(&c)).collect();
        Some((doc, chunks))
    }

    /// Chunk ids admitted by `filters`, or `None` when the filters are empty.
    pub fn matching_chunks(&self, filters: &QueryFilters) -> Option<HashSet<ChunkId>> {
        if filters.is_empty() {
            return None;
        }
        let allowed = self
            .documents
            .values()
            .filter(|doc| filters.admits(doc))
            .flat_map(|doc| self.chunks_of(doc.id).iter().copied())
            .collect();
        Some(allowed)
    }
}
