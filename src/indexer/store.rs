// SPDX-License-Identifier: MIT OR Apache-2.0

//! Store manager: loads the persisted knowledge base and folds new policy
//! documents into it.
//!
//! The update cycle is extract → chunk → embed → append → persist. Only files
//! missing from the processed-files record are touched, so repeated updates
//! without new documents never re-embed anything and never rewrite the store.

use anyhow::Context;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::embedding::chunker::{Chunk, ChunkConfig, EmbeddingChunker};
use crate::embedding::index::FlatL2Index;
use crate::embedding::provider::Embedder;
use crate::embedding::storage::{StoreState, VectorStore};
use crate::errors::{IndexError, Result};
use crate::indexer::extractor::{extract_documents, ExtractionFailure};
use crate::indexer::scanner::{DocumentScanner, DEFAULT_EXTENSIONS};
use crate::output::{colorize_source, use_colors, OutputFormat};

/// Default watched directory, relative to the working directory.
pub const DEFAULT_DOCS_DIR: &str = "policy_documents";

/// Number of chunks sent to the embedder per progress step.
const EMBED_BATCH: usize = 64;

/// What an update cycle did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateReport {
    /// The documents directory did not exist and was created.
    pub docs_dir_created: bool,
    /// Files not yet in the processed-files record, in scan order.
    pub new_files: Vec<String>,
    /// New files that contributed at least one chunk.
    pub indexed_files: Vec<String>,
    /// New files that extracted successfully but contained no text.
    pub empty_files: Vec<String>,
    /// New files that could not be read; left unprocessed for a later retry.
    pub failures: Vec<ExtractionFailure>,
    /// Chunks appended to the index.
    pub chunks_added: usize,
    /// Whether the store file was rewritten.
    pub persisted: bool,
}

impl UpdateReport {
    /// True when the cycle changed nothing on disk.
    pub fn is_noop(&self) -> bool {
        !self.persisted
    }
}

/// State after an update, plus the report describing how it was reached.
#[derive(Debug)]
pub struct UpdateOutcome {
    pub state: StoreState,
    pub report: UpdateReport,
}

/// Owns the persisted store and the watched documents directory.
pub struct StoreManager {
    docs_dir: PathBuf,
    store: VectorStore,
    chunker: EmbeddingChunker,
    scanner: DocumentScanner,
}

impl StoreManager {
    pub fn new(
        docs_dir: impl AsRef<Path>,
        store_path: impl AsRef<Path>,
        chunking: ChunkConfig,
    ) -> Self {
        let docs_dir = docs_dir.as_ref().to_path_buf();
        Self {
            scanner: DocumentScanner::new(&docs_dir),
            docs_dir,
            store: VectorStore::new(store_path),
            chunker: EmbeddingChunker::new(chunking),
        }
    }

    /// Builds a manager from the `[documents]`, `[store]` and `[chunking]`
    /// config sections.
    pub fn from_config(config: &Config) -> Result<Self> {
        let chunking = ChunkConfig::new(
            config.chunking().chunk_size(),
            config.chunking().chunk_overlap(),
        )?;
        Ok(Self::new(config.documents().dir(), config.store().path(), chunking)
            .with_extensions(config.documents().extensions()))
    }

    /// Restricts the document types picked up from the watched directory.
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.scanner = DocumentScanner::new(&self.docs_dir).with_extensions(extensions);
        self
    }

    pub fn docs_dir(&self) -> &Path {
        &self.docs_dir
    }

    pub fn store_path(&self) -> &Path {
        self.store.path()
    }

    pub fn chunk_config(&self) -> &ChunkConfig {
        self.chunker.config()
    }

    pub fn scanner(&self) -> &DocumentScanner {
        &self.scanner
    }

    /// Reads the persisted store. A missing store is the empty state; an
    /// unreadable one is an error.
    pub fn load(&self) -> Result<StoreState> {
        Ok(self.store.read()?.unwrap_or_default())
    }

    /// Documents in the watched directory that `state` has not processed.
    pub fn pending_files(&self, state: &StoreState) -> Result<Vec<PathBuf>> {
        Ok(self
            .scanner
            .list_files()?
            .into_iter()
            .filter(|path| !state.is_processed(&file_name(path)))
            .collect())
    }

    /// Runs one update cycle and returns the resulting state.
    pub fn update(&self, embedder: &Embedder) -> Result<UpdateOutcome> {
        if !self.docs_dir.exists() {
            std::fs::create_dir_all(&self.docs_dir).map_err(|source| IndexError::Io {
                path: self.docs_dir.clone(),
                source,
            })?;
            info!(
                "Created documents directory {}; add policy documents there",
                self.docs_dir.display()
            );
            return Ok(UpdateOutcome {
                state: self.load()?,
                report: UpdateReport {
                    docs_dir_created: true,
                    ..Default::default()
                },
            });
        }

        let state = self.load()?;
        let mut report = UpdateReport::default();
        let mut pending = Vec::new();
        for path in self.pending_files(&state)? {
            // Processed files are recorded by name, so the name must round-trip.
            match path.file_name().and_then(|name| name.to_str()) {
                Some(name) => {
                    report.new_files.push(name.to_string());
                    pending.push(path);
                }
                None => {
                    warn!("Skipping {}: file name is not valid UTF-8", path.display());
                    report.failures.push(ExtractionFailure {
                        path,
                        reason: "file name is not valid UTF-8".to_string(),
                    });
                }
            }
        }

        if pending.is_empty() {
            debug!("No new documents; index is up to date");
            return Ok(UpdateOutcome { state, report });
        }
        info!(
            "Found {} new document(s): {}",
            pending.len(),
            report.new_files.join(", ")
        );

        let batch = extract_documents(&pending);
        report.failures.extend(batch.failures);

        let mut new_chunks: Vec<Chunk> = Vec::new();
        for document in &batch.documents {
            let chunks = self.chunker.chunk_pages(&document.pages);
            if chunks.is_empty() {
                warn!("No text extracted from {}", document.filename);
                report.empty_files.push(document.filename.clone());
            } else {
                report.indexed_files.push(document.filename.clone());
                new_chunks.extend(chunks);
            }
        }

        if new_chunks.is_empty() && report.empty_files.is_empty() {
            warn!("Could not extract any text from the new documents");
            return Ok(UpdateOutcome { state, report });
        }

        let vectors = self.embed_chunks(embedder, &new_chunks)?;

        let mut next = state.clone();
        if !vectors.is_empty() {
            match next.index.as_mut() {
                Some(index) => index.add(&vectors)?,
                None => next.index = Some(FlatL2Index::from_vectors(&vectors)?),
            }
        }
        report.chunks_added = new_chunks.len();
        next.chunks.extend(new_chunks);

        // Recorded in scan order; failed files stay pending.
        for filename in &report.new_files {
            let succeeded =
                report.indexed_files.contains(filename) || report.empty_files.contains(filename);
            if succeeded && !next.is_processed(filename) {
                next.processed_files.push(filename.clone());
            }
        }

        self.store.write(&next)?;
        report.persisted = true;
        info!(
            "Updated index with {} new chunk(s) from {} document(s)",
            report.chunks_added,
            report.indexed_files.len()
        );

        Ok(UpdateOutcome {
            state: next,
            report,
        })
    }

    fn embed_chunks(&self, embedder: &Embedder, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let pb = ProgressBar::new(chunks.len() as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("[{bar:40.cyan/blue}] {pos}/{len} chunks | Embedding")
        {
            pb.set_style(style.progress_chars("##."));
        }

        let mut vectors = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(EMBED_BATCH) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            vectors.extend(embedder.encode(&texts)?);
            pb.inc(batch.len() as u64);
        }
        pb.finish_and_clear();

        Ok(vectors)
    }
}

impl Default for StoreManager {
    fn default() -> Self {
        Self::new(
            DEFAULT_DOCS_DIR,
            crate::embedding::storage::DEFAULT_STORE_FILE,
            ChunkConfig::default(),
        )
        .with_extensions(DEFAULT_EXTENSIONS)
    }
}

#[derive(Serialize)]
struct UpdateSummary<'a> {
    store: String,
    total_chunks: usize,
    processed_files: &'a [String],
    #[serde(flatten)]
    report: &'a UpdateReport,
}

/// Run the update command
pub fn run(config: &Config, embedder: &Embedder, format: OutputFormat) -> anyhow::Result<()> {
    let manager = StoreManager::from_config(config)?;
    let outcome = manager
        .update(embedder)
        .with_context(|| format!("failed to update {}", manager.store_path().display()))?;
    let report = &outcome.report;

    if format == OutputFormat::Json {
        let summary = UpdateSummary {
            store: manager.store_path().display().to_string(),
            total_chunks: outcome.state.chunk_count(),
            processed_files: &outcome.state.processed_files,
            report,
        };
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    if report.docs_dir_created {
        println!(
            "{} Created {}; add policy documents there and run update again",
            "✓".green(),
            manager.docs_dir().display()
        );
        return Ok(());
    }
    for failure in &report.failures {
        eprintln!("{} Skipped {}: {}", "!".yellow(), failure.path.display(), failure.reason);
    }
    for name in &report.empty_files {
        eprintln!("{} No text in {}", "!".yellow(), name);
    }
    if report.new_files.is_empty() {
        println!("{} Index is up to date ({} chunks)", "✓".green(), outcome.state.chunk_count());
    } else if report.persisted {
        println!(
            "{} Indexed {} document(s), {} new chunk(s), {} total",
            "✓".green(),
            report.indexed_files.len(),
            report.chunks_added,
            outcome.state.chunk_count()
        );
    } else {
        println!("{} No new documents could be indexed", "✗".red());
    }

    Ok(())
}

#[derive(Serialize)]
struct StatusOutput<'a> {
    store: String,
    exists: bool,
    documents_dir: String,
    chunks: usize,
    dimension: Option<usize>,
    processed_files: &'a [String],
    pending_files: Vec<String>,
}

/// Run the status command
pub fn status(config: &Config, format: OutputFormat) -> anyhow::Result<()> {
    let manager = StoreManager::from_config(config)?;
    let state = manager.load()?;
    let pending = if manager.docs_dir().is_dir() {
        manager
            .pending_files(&state)?
            .iter()
            .map(|p| file_name(p))
            .collect()
    } else {
        Vec::new()
    };

    let output = StatusOutput {
        store: manager.store_path().display().to_string(),
        exists: manager.store_path().exists(),
        documents_dir: manager.docs_dir().display().to_string(),
        chunks: state.chunk_count(),
        dimension: state.dimension(),
        processed_files: &state.processed_files,
        pending_files: pending,
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
        OutputFormat::Text => {
            let use_color = use_colors();
            println!("Store:      {}", colorize_source(&output.store, use_color));
            println!("Documents:  {}", colorize_source(&output.documents_dir, use_color));
            println!("Chunks:     {}", output.chunks);
            match output.dimension {
                Some(dim) => println!("Dimension:  {}", dim),
                None => println!("Dimension:  -"),
            }
            println!("Indexed ({}):", output.processed_files.len());
            for name in output.processed_files {
                println!("  {}", name);
            }
            if !output.pending_files.is_empty() {
                println!("Pending ({}):", output.pending_files.len());
                for name in &output.pending_files {
                    println!("  {}", name.yellow());
                }
            }
        }
    }

    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::provider::{EmbeddingProvider, HashEmbedder};
    use tempfile::TempDir;

    fn hash_embedder() -> Embedder {
        Embedder::from_provider(Box::new(HashEmbedder::new(32)))
    }

    fn manager(dir: &TempDir) -> StoreManager {
        StoreManager::new(
            dir.path().join("docs"),
            dir.path().join("store.pidx"),
            ChunkConfig::new(40, 10).unwrap(),
        )
        .with_extensions(["txt", "pdf"])
    }

    fn write_doc(dir: &TempDir, name: &str, contents: &str) {
        let docs = dir.path().join("docs");
        std::fs::create_dir_all(&docs).unwrap();
        std::fs::write(docs.join(name), contents).unwrap();
    }

    #[test]
    fn load_without_store_is_empty() {
        let dir = TempDir::new().unwrap();
        let state = manager(&dir).load().unwrap();
        assert!(state.index.is_none());
        assert!(state.chunks.is_empty());
        assert!(state.processed_files.is_empty());
    }

    #[test]
    fn first_update_creates_docs_dir_and_returns_empty_state() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let outcome = manager.update(&hash_embedder()).unwrap();

        assert!(outcome.report.docs_dir_created);
        assert!(dir.path().join("docs").is_dir());
        assert_eq!(outcome.state, StoreState::default());
        assert!(!dir.path().join("store.pidx").exists());
    }

    #[test]
    fn update_indexes_new_documents() {
        let dir = TempDir::new().unwrap();
        write_doc(&dir, "gold.txt", "Knee surgery is covered after a waiting period of 24 months.");
        let manager = manager(&dir);

        let outcome = manager.update(&hash_embedder()).unwrap();
        let state = outcome.state;

        assert!(outcome.report.persisted);
        assert_eq!(outcome.report.indexed_files, vec!["gold.txt"]);
        assert_eq!(state.processed_files, vec!["gold.txt"]);
        assert_eq!(state.index.as_ref().unwrap().len(), state.chunks.len());
        assert_eq!(manager.load().unwrap(), state);
    }

    #[test]
    fn repeated_update_is_byte_identical() {
        let dir = TempDir::new().unwrap();
        write_doc(&dir, "gold.txt", "Maternity benefits require 9 months of continuous cover.");
        let manager = manager(&dir);
        let embedder = hash_embedder();

        manager.update(&embedder).unwrap();
        let before = std::fs::read(manager.store_path()).unwrap();

        let outcome = manager.update(&embedder).unwrap();
        assert!(outcome.report.is_noop());
        assert!(outcome.report.new_files.is_empty());
        assert_eq!(std::fs::read(manager.store_path()).unwrap(), before);
    }

    #[test]
    fn incremental_update_appends_after_existing_chunks() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let embedder = hash_embedder();

        write_doc(&dir, "a.txt", "Hospitalisation expenses are covered up to the sum insured.");
        let first = manager.update(&embedder).unwrap().state;
        let n = first.chunks.len();

        let new_text = "Cosmetic surgery is excluded.";
        write_doc(&dir, "b.txt", new_text);
        let second = manager.update(&embedder).unwrap().state;
        let m = manager.chunker.chunk_pages(&[crate::indexer::Page {
            source: "b.txt".into(),
            page: 1,
            text: new_text.into(),
        }]).len();

        assert_eq!(second.chunks.len(), n + m);
        assert_eq!(&second.chunks[..n], &first.chunks[..]);
        assert_eq!(second.processed_files, vec!["a.txt", "b.txt"]);

        let index = second.index.as_ref().unwrap();
        assert_eq!(index.len(), n + m);
        let query = embedder.encode_one(&second.chunks[n].text).unwrap();
        let hits = index.search(&query, 1).unwrap();
        assert_eq!(hits[0].position, n);
        assert_eq!(second.chunks[hits[0].position].metadata.source, "b.txt");
    }

    #[test]
    fn positional_correspondence_holds_for_every_row() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let embedder = hash_embedder();

        write_doc(
            &dir,
            "a.txt",
            "Ambulance charges are reimbursed up to 2000 per claim.\u{000C}Day care procedures are listed in annexure two.",
        );
        manager.update(&embedder).unwrap();
        write_doc(&dir, "b.txt", "Pre-existing diseases are covered after 48 months.");
        let state = manager.update(&embedder).unwrap().state;

        let index = state.index.as_ref().unwrap();
        let mut provider = HashEmbedder::new(32);
        for (i, chunk) in state.chunks.iter().enumerate() {
            let expected = provider.embed_one(&chunk.text).unwrap();
            assert_eq!(index.vector(i).unwrap(), expected.as_slice(), "row {}", i);
        }
    }

    #[test]
    fn unreadable_documents_are_skipped_and_retried() {
        let dir = TempDir::new().unwrap();
        write_doc(&dir, "broken.pdf", "not a pdf at all");
        write_doc(&dir, "good.txt", "Room rent is capped at one percent of sum insured.");
        let manager = manager(&dir);
        let embedder = hash_embedder();

        let outcome = manager.update(&embedder).unwrap();
        assert_eq!(outcome.report.failures.len(), 1);
        assert_eq!(outcome.state.processed_files, vec!["good.txt"]);

        // The failed file is still pending on the next run.
        let again = manager.update(&embedder).unwrap();
        assert_eq!(again.report.new_files, vec!["broken.pdf"]);
        assert!(again.report.is_noop());
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_documents_are_indexed() {
        let dir = TempDir::new().unwrap();
        write_doc(&dir, "plain.txt", "Claims must be intimated within 48 hours of admission.");
        let target = dir.path().join("shared.txt");
        std::fs::write(&target, "Network hospitals offer cashless settlement.").unwrap();
        std::os::unix::fs::symlink(&target, dir.path().join("docs").join("linked.txt")).unwrap();

        let outcome = manager(&dir).update(&hash_embedder()).unwrap();
        assert_eq!(outcome.state.processed_files, vec!["linked.txt", "plain.txt"]);
        assert!(outcome
            .state
            .chunks
            .iter()
            .any(|chunk| chunk.metadata.source == "linked.txt"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn non_utf8_file_names_do_not_block_updates() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = TempDir::new().unwrap();
        let docs = dir.path().join("docs");
        std::fs::create_dir_all(&docs).unwrap();
        for (name, text) in [
            (&b"a\xff.txt"[..], "Claims settle in 30 days."),
            (&b"a\xfe.txt"[..], "Claims need a discharge summary."),
        ] {
            std::fs::write(docs.join(OsStr::from_bytes(name)), text).unwrap();
        }
        let manager = manager(&dir);
        let embedder = hash_embedder();

        let first = manager.update(&embedder).unwrap();
        assert_eq!(first.report.failures.len(), 2);
        assert!(first.report.new_files.is_empty());
        assert!(first.report.is_noop());

        write_doc(&dir, "b.txt", "Cashless claims are available at network hospitals.");
        let second = manager.update(&embedder).unwrap();
        assert_eq!(second.report.new_files, vec!["b.txt"]);
        assert_eq!(second.report.failures.len(), 2);
        assert_eq!(second.state.processed_files, vec!["b.txt"]);
        assert_eq!(manager.load().unwrap(), second.state);
    }

    #[test]
    fn empty_documents_are_marked_processed_without_chunks() {
        let dir = TempDir::new().unwrap();
        write_doc(&dir, "scanned.txt", "");
        let manager = manager(&dir);
        let embedder = Embedder::lazy(|| anyhow::bail!("embedding should not be needed"));

        let outcome = manager.update(&embedder).unwrap();
        assert_eq!(outcome.report.empty_files, vec!["scanned.txt"]);
        assert!(outcome.state.index.is_none());
        assert!(outcome.state.chunks.is_empty());
        assert_eq!(outcome.state.processed_files, vec!["scanned.txt"]);
        assert!(!embedder.is_initialized());

        let again = manager.update(&embedder).unwrap();
        assert!(again.report.new_files.is_empty());
    }

    #[test]
    fn embedding_failure_leaves_store_untouched() {
        let dir = TempDir::new().unwrap();
        write_doc(&dir, "a.txt", "Dental treatment is excluded unless due to accident.");
        let manager = manager(&dir);
        manager.update(&hash_embedder()).unwrap();
        let before = std::fs::read(manager.store_path()).unwrap();

        write_doc(&dir, "b.txt", "Organ donor expenses are covered.");
        let broken = Embedder::lazy(|| anyhow::bail!("onnx runtime missing"));
        let err = manager.update(&broken).unwrap_err();

        assert!(matches!(err, IndexError::EmbeddingUnavailable { .. }));
        assert_eq!(std::fs::read(manager.store_path()).unwrap(), before);
    }

    #[test]
    fn dimension_change_is_rejected() {
        let dir = TempDir::new().unwrap();
        write_doc(&dir, "a.txt", "Ayush treatment is covered up to the sum insured.");
        let manager = manager(&dir);
        manager
            .update(&Embedder::from_provider(Box::new(HashEmbedder::new(16))))
            .unwrap();

        write_doc(&dir, "b.txt", "Bariatric surgery needs prior approval.");
        let err = manager
            .update(&Embedder::from_provider(Box::new(HashEmbedder::new(8))))
            .unwrap_err();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch {
                expected: 16,
                actual: 8
            }
        ));
    }

    #[test]
    fn corrupt_store_is_reported_not_reset() {
        let dir = TempDir::new().unwrap();
        write_doc(&dir, "a.txt", "Cataract surgery is limited to 40000 per eye.");
        let manager = manager(&dir);
        std::fs::write(manager.store_path(), b"garbage").unwrap();

        let err = manager.update(&hash_embedder()).unwrap_err();
        assert!(matches!(err, IndexError::StoreCorrupt { .. }));
        assert!(matches!(manager.load(), Err(IndexError::StoreCorrupt { .. })));
        assert_eq!(std::fs::read(manager.store_path()).unwrap(), b"garbage");
    }
}
