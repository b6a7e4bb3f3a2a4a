// SPDX-License-Identifier: MIT OR Apache-2.0

//! policy-index - document indexing and semantic clause retrieval
//!
//! Shared modules for the policy-index CLI: text extraction, chunking,
//! embedding, the persisted vector store and the retriever.

pub mod config;
pub mod embedding;
pub mod errors;
pub mod indexer;
pub mod output;
pub mod query;

pub use errors::{IndexError, Result};
