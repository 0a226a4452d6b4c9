//! Plain-text ingestion collaborator: turns a directory of `.txt` files into
//! `(NewDocument, Vec<NewChunk>)` submissions for the chunk store.

use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};

use crate::types::{NewChunk, NewDocument, SourceType};

/// One file's worth of input for `ChunkStore::insert`.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub document: NewDocument,
    pub chunks: Vec<NewChunk>,
}

#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    pub max_words: usize,
    pub overlap_percent: f32,
}

impl Default for ChunkingConfig {
    fn default() -> Self { Self { max_words: 300, overlap_percent: 0.2 } }
}

#[derive(Default)]
pub struct DataProcessor {
    chunking_config: ChunkingConfig,
}

impl DataProcessor {
    pub fn new() -> Self { Self::default() }

    pub fn with_config(chunking_config: ChunkingConfig) -> Self { Self { chunking_config } }

    pub fn process_directory(&self, data_dir: &Path) -> Result<Vec<SourceDocument>> {
        self.process_files(data_dir, self.list_txt_files(data_dir))
    }

    pub fn process_directory_limited(&self, data_dir: &Path, limit: usize) -> Result<Vec<SourceDocument>> {
        let mut files = self.list_txt_files(data_dir);
        if files.len() > limit {
            files.truncate(limit);
            tracing::info!(limit, "limited to first {limit} files");
        }
        self.process_files(data_dir, files)
    }

    fn process_files(&self, data_dir: &Path, files: Vec<PathBuf>) -> Result<Vec<SourceDocument>> {
        if files.is_empty() {
            tracing::warn!(dir = %data_dir.display(), "no .txt files found");
            return Ok(vec![]);
        }
        let mut out = Vec::with_capacity(files.len());
        for (file_index, file_path) in files.iter().enumerate() {
            tracing::debug!(file = %file_path.display(), "processing file {}/{}", file_index + 1, files.len());
            let content = self.read_file_content(file_path)?;
            let category = self.get_category_from_path(file_path, data_dir);
            let title = file_path.file_stem().map(|s| s.to_string_lossy().to_string());
            let mut doc = self.process_text(&file_path.to_string_lossy(), &content, category.as_deref());
            doc.document.title = title;
            out.push(doc);
        }
        let total: usize = out.iter().map(|d| d.chunks.len()).sum();
        tracing::info!(files = files.len(), chunks = total, "processed directory");
        Ok(out)
    }

    /// Split `content` into paragraph chunks (blank-line separated); paragraphs
    /// longer than `max_words` become overlapping word windows.
    pub fn process_text(&self, locator: &str, content: &str, category: Option<&str>) -> SourceDocument {
        let mut chunks = self.chunk_content(content);
        if let Some(category) = category {
            for c in &mut chunks {
                c.tags.insert("category".to_string(), category.to_string());
            }
        }
        SourceDocument { document: NewDocument::new(SourceType::File, locator), chunks }
    }

    fn read_file_content(&self, file_path: &Path) -> Result<String> {
        match fs::read_to_string(file_path) {
            Ok(content) => Ok(content),
            Err(_) => Ok(String::from_utf8_lossy(&fs::read(file_path)?).to_string()),
        }
    }

    fn get_category_from_path(&self, file_path: &Path, data_dir: &Path) -> Option<String> {
        let relative_path = file_path.strip_prefix(data_dir).unwrap_or(file_path);
        let mut components = relative_path.components();
        let first = components.next()?;
        // A bare file name has no category directory.
        components.next()?;
        Some(first.as_os_str().to_string_lossy().to_string())
    }

    fn chunk_content(&self, content: &str) -> Vec<NewChunk> {
        let mut chunks = Vec::new();
        let mut byte_pos = 0usize;
        for part in content.split("\n\n") {
            let part_start = byte_pos;
            byte_pos += part.len() + 2;
            let trimmed = part.trim();
            if trimmed.is_empty() {
                continue;
            }
            let start = part_start + (part.len() - part.trim_start().len());
            let words = word_spans(trimmed);
            if words.len() <= self.chunking_config.max_words {
                chunks.push(make_chunk(content, start, start + trimmed.len()));
                continue;
            }
            for (first, last) in self.windows(words.len()) {
                chunks.push(make_chunk(content, start + words[first].0, start + words[last].1));
            }
        }
        chunks
    }

    /// Inclusive word-index windows of `max_words` with the configured overlap.
    fn windows(&self, word_count: usize) -> Vec<(usize, usize)> {
        let per_chunk = self.chunking_config.max_words.max(1);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
        let overlap = ((per_chunk as f32 * self.chunking_config.overlap_percent) as usize).min(per_chunk - 1);
        let mut out = Vec::new();
        let mut start = 0;
        while start < word_count {
            let end = (start + per_chunk).min(word_count);
            out.push((start, end - 1));
            if end >= word_count {
                break;
            }
            start = end - overlap;
        }
        out
    }

    fn list_txt_files(&self, root: &Path) -> Vec<PathBuf> {
        let mut txt_files: Vec<PathBuf> = walkdir::WalkDir::new(root)
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("txt"))
            .map(|e| e.path().to_path_buf())
            .collect();
        txt_files.sort();
        txt_files
    }
}

/// Byte spans of whitespace-separated words.
fn word_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = None;
    for (i, c) in text.char_indices() {
        if c.is_whitespace() {
            if let Some(s) = start.take() {
                spans.push((s, i));
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        spans.push((s, text.len()));
    }
    spans
}

fn make_chunk(content: &str, byte_start: usize, byte_end: usize) -> NewChunk {
    let char_start = content[..byte_start].chars().count();
    NewChunk::new(&content[byte_start..byte_end], char_start)
}
