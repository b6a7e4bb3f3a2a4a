// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding module - chunking, vector encoding, the nearest-neighbour index
//! and its on-disk container

pub mod chunker;
pub mod index;
pub mod provider;
pub mod storage;

pub use chunker::{Chunk, ChunkConfig, ChunkMetadata, EmbeddingChunker};
pub use index::{FlatL2Index, Neighbor};
pub use provider::{
    CommandProvider, Embedder, EmbeddingProvider, EmbeddingProviderConfig, FastEmbedder,
    HashEmbedder,
};
pub use storage::{StoreState, VectorStore};
