// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration file support for policy-index
//!
//! Loads configuration from .policyindex.toml in current directory or
//! ~/.config/policy-index/config.toml

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::embedding::chunker::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use crate::embedding::storage::DEFAULT_STORE_FILE;
use crate::indexer::scanner::DEFAULT_EXTENSIONS;
use crate::indexer::store::DEFAULT_DOCS_DIR;

/// Local config file name, looked up in the working directory
pub const LOCAL_CONFIG_FILE: &str = ".policyindex.toml";

/// Default number of clauses returned by a search
pub const DEFAULT_TOP_K: usize = 5;

/// Embedding provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderType {
    /// Local fastembed model
    #[default]
    Builtin,
    /// External command speaking JSON on stdin/stdout
    Command,
    /// Deterministic feature hashing, no model download
    Hash,
}

/// Watched documents directory
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DocumentsConfig {
    pub dir: Option<PathBuf>,
    pub extensions: Option<Vec<String>>,
}

impl DocumentsConfig {
    /// Get documents directory (defaults to "policy_documents")
    pub fn dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_DOCS_DIR))
    }

    /// Get document extensions (defaults to pdf only)
    pub fn extensions(&self) -> Vec<String> {
        self.extensions
            .clone()
            .unwrap_or_else(|| DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect())
    }
}

/// Persisted store location
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: Option<PathBuf>,
}

impl StoreConfig {
    /// Get store file path (defaults to "vector_store.pidx")
    pub fn path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_FILE))
    }
}

/// Chunking parameters
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Characters per chunk
    pub chunk_size: Option<usize>,
    /// Characters shared by consecutive chunks
    pub chunk_overlap: Option<usize>,
}

impl ChunkingConfig {
    /// Get chunk size (defaults to 1000)
    pub fn chunk_size(&self) -> usize {
        self.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE)
    }

    /// Get chunk overlap (defaults to 200)
    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap.unwrap_or(DEFAULT_CHUNK_OVERLAP)
    }
}

/// Embedding configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Provider type (builtin, command, hash)
    pub provider: Option<EmbeddingProviderType>,
    /// Model identifier for the embedding provider
    pub model: Option<String>,
    /// Command to execute for command provider
    pub command: Option<String>,
    /// Texts per provider call
    pub batch_size: Option<usize>,
    /// L2-normalize builtin model output
    pub normalize: Option<bool>,
    /// Vector dimension for the hash provider
    pub dimension: Option<usize>,
}

impl EmbeddingConfig {
    /// Get provider type (defaults to Builtin)
    pub fn provider(&self) -> EmbeddingProviderType {
        self.provider.unwrap_or_default()
    }

    /// Get model identifier (defaults to "all-minilm-l6-v2")
    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or("all-minilm-l6-v2")
    }

    pub fn command(&self) -> Option<&str> {
        self.command.as_deref().filter(|c| !c.trim().is_empty())
    }

    pub fn batch_size(&self) -> Option<usize> {
        self.batch_size.filter(|&n| n > 0)
    }

    /// Get normalize flag (defaults to true)
    pub fn normalize(&self) -> bool {
        self.normalize.unwrap_or(true)
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension.filter(|&n| n > 0)
    }
}

/// Search configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub top_k: Option<usize>,
}

impl SearchConfig {
    /// Get result count (defaults to 5)
    pub fn top_k(&self) -> usize {
        self.top_k.unwrap_or(DEFAULT_TOP_K)
    }
}

/// Configuration loaded from .policyindex.toml or ~/.config/policy-index/config.toml
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub documents: DocumentsConfig,
    pub store: StoreConfig,
    pub chunking: ChunkingConfig,
    pub embeddings: EmbeddingConfig,
    pub search: SearchConfig,
}

impl Config {
    /// Load configuration from files
    ///
    /// Precedence (highest to lowest):
    /// 1. .policyindex.toml in current directory
    /// 2. ~/.config/policy-index/config.toml
    pub fn load() -> Self {
        if let Some(config) = Self::load_from_path(Path::new(LOCAL_CONFIG_FILE)) {
            return config;
        }

        if let Some(home) = dirs::home_dir() {
            let config_path = home.join(".config").join("policy-index").join("config.toml");
            if let Some(config) = Self::load_from_path(&config_path) {
                return config;
            }
        }

        Self::default()
    }

    fn load_from_path(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        match toml::from_str(&content) {
            Ok(config) => Some(config),
            Err(e) => {
                eprintln!("Warning: Failed to parse {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Override the documents directory (CLI wins)
    pub fn with_documents_dir(mut self, dir: Option<PathBuf>) -> Self {
        if dir.is_some() {
            self.documents.dir = dir;
        }
        self
    }

    /// Override the store path (CLI wins)
    pub fn with_store_path(mut self, path: Option<PathBuf>) -> Self {
        if path.is_some() {
            self.store.path = path;
        }
        self
    }

    /// Merge CLI result count with config (CLI wins)
    pub fn merge_top_k(&self, cli_value: Option<usize>) -> usize {
        cli_value.unwrap_or_else(|| self.search.top_k())
    }

    pub fn documents(&self) -> &DocumentsConfig {
        &self.documents
    }

    pub fn store(&self) -> &StoreConfig {
        &self.store
    }

    pub fn chunking(&self) -> &ChunkingConfig {
        &self.chunking
    }

    pub fn embeddings(&self) -> &EmbeddingConfig {
        &self.embeddings
    }

    pub fn search(&self) -> &SearchConfig {
        &self.search
    }
}
