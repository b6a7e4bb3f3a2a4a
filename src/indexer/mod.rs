// SPDX-License-Identifier: MIT OR Apache-2.0

//! Indexer module - turns a directory of policy documents into the
//! persisted knowledge base

pub mod extractor;
pub mod scanner;
pub mod store;
pub mod watch;

pub use extractor::{
    extract_document, extract_documents, extractor_for, ExtractionBatch, ExtractionFailure,
    Page, PdfExtractor, PlainTextExtractor, TextExtractor,
};
pub use scanner::DocumentScanner;
pub use store::{StoreManager, UpdateOutcome, UpdateReport};
pub use watch::Watcher;
