// SPDX-License-Identifier: MIT OR Apache-2.0

//! Text chunker for embedding generation.
//!
//! This module splits extracted page text into overlapping chunks suitable for
//! embedding generation. The chunking strategy uses character-based sliding
//! windows with configurable overlap. Boundaries are purely positional.

use serde::{Deserialize, Serialize};

use crate::errors::{IndexError, Result};
use crate::indexer::Page;

/// Default number of characters per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Default overlap between consecutive chunks.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Configuration for the text chunker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    /// Number of characters per chunk.
    pub chunk_size: usize,
    /// Number of overlapping characters between consecutive chunks.
    pub chunk_overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkConfig {
    /// Creates a new ChunkConfig with the specified parameters.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(IndexError::InvalidChunkConfig(
                "chunk_size must be greater than 0".into(),
            ));
        }
        if chunk_overlap >= chunk_size {
            return Err(IndexError::InvalidChunkConfig(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    /// Distance between the starts of consecutive windows.
    pub fn stride(&self) -> usize {
        self.chunk_size - self.chunk_overlap
    }
}

/// Provenance of a chunk.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Source document filename.
    pub source: String,
    /// Page number within the source (1-indexed).
    pub page: u32,
}

/// A window of page text, the unit of retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// Splits page text into overlapping chunks for embedding generation.
pub struct EmbeddingChunker {
    config: ChunkConfig,
}

impl EmbeddingChunker {
    /// Creates a new chunker with the given configuration.
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    /// Creates a chunker with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(ChunkConfig::default())
    }

    /// Returns the current configuration.
    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    /// Splits text into overlapping character windows.
    ///
    /// Algorithm:
    /// ```text
    /// start = 0
    /// step = chunk_size - chunk_overlap
    /// while start < total_chars:
    ///   end = min(start + chunk_size, total_chars)
    ///   emit chars[start..end]
    ///   start += step
    /// ```
    pub fn split_text<'a>(&self, content: &'a str) -> Vec<&'a str> {
        if content.is_empty() {
            return Vec::new();
        }

        // Byte offset of every char boundary, including the end of the string.
        let boundaries: Vec<usize> = content
            .char_indices()
            .map(|(idx, _)| idx)
            .chain(std::iter::once(content.len()))
            .collect();
        let total_chars = boundaries.len() - 1;

        let step = self.config.stride().max(1);
        let mut windows = Vec::with_capacity(total_chars.div_ceil(step));
        let mut start = 0_usize;

        while start < total_chars {
            let end = (start + self.config.chunk_size).min(total_chars);
            windows.push(&content[boundaries[start]..boundaries[end]]);
            start += step;
        }

        windows
    }

    /// Chunks a single page, copying its provenance onto every chunk.
    pub fn chunk_page(&self, page: &Page) -> Vec<Chunk> {
        self.split_text(&page.text)
            .into_iter()
            .map(|text| Chunk {
                text: text.to_string(),
                metadata: ChunkMetadata {
                    source: page.source.clone(),
                    page: page.page,
                },
            })
            .collect()
    }

    /// Chunks pages in order. Empty pages contribute nothing.
    pub fn chunk_pages<'a, I>(&self, pages: I) -> Vec<Chunk>
    where
        I: IntoIterator<Item = &'a Page>,
    {
        pages
            .into_iter()
            .flat_map(|page| self.chunk_page(page))
            .collect()
    }
}
