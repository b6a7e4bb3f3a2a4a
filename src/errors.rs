// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for indexing and retrieval.
//!
//! Per-document extraction failures are recovered by the store manager and
//! reported; every other variant propagates to the caller.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, IndexError>;

/// Errors raised by the indexing and retrieval pipeline.
#[derive(Debug, Error)]
pub enum IndexError {
    /// A single document could not be read or parsed.
    #[error("failed to extract text from {}: {reason}", path.display())]
    Extraction { path: PathBuf, reason: String },

    /// The document extension has no registered extractor.
    #[error("unsupported document type: {}", path.display())]
    UnsupportedDocument { path: PathBuf },

    /// The embedding provider failed to initialize or a call failed.
    #[error("embedding model unavailable during {stage}: {reason}")]
    EmbeddingUnavailable { stage: &'static str, reason: String },

    /// A persisted store exists but its contents are invalid.
    #[error("vector store {} is corrupt: {reason}", path.display())]
    StoreCorrupt { path: PathBuf, reason: String },

    /// The persisted store could not be read or written.
    #[error("vector store {} unavailable while {action}: {source}", path.display())]
    StoreUnavailable {
        path: PathBuf,
        action: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Vector dimensionality disagrees with the established dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// An index row has no chunk at the same position.
    #[error("index row {position} has no chunk ({chunks} chunks loaded)")]
    MisalignedChunks { position: usize, chunks: usize },

    /// Chunking parameters violate `0 <= overlap < size`.
    #[error("invalid chunk configuration: {0}")]
    InvalidChunkConfig(String),

    /// Filesystem error outside the persisted store (documents directory, scans).
    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl IndexError {
    pub(crate) fn embedding(stage: &'static str, reason: impl std::fmt::Display) -> Self {
        Self::EmbeddingUnavailable {
            stage,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::StoreCorrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error is recovered per document rather than aborting a batch.
    pub fn is_per_document(&self) -> bool {
        matches!(
            self,
            Self::Extraction { .. } | Self::UnsupportedDocument { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_errors_are_per_document() {
        let err = IndexError::Extraction {
            path: PathBuf::from("a.pdf"),
            reason: "bad xref".into(),
        };
        assert!(err.is_per_document());
        assert!(err.to_string().contains("a.pdf"));

        let err = IndexError::DimensionMismatch {
            expected: 384,
            actual: 3,
        };
        assert!(!err.is_per_document());
        assert_eq!(err.to_string(), "dimension mismatch: expected 384, got 3");
    }
}
