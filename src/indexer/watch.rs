// SPDX-License-Identifier: MIT OR Apache-2.0

//! Directory watcher that re-runs the store update when policy documents
//! appear or change, with debouncing.

use anyhow::Result;
use colored::Colorize;
use notify::{
    Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher,
};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::mpsc::{channel, RecvTimeoutError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::embedding::provider::Embedder;
use crate::indexer::scanner::DocumentScanner;
use crate::indexer::store::StoreManager;

/// Default debounce interval in seconds
pub const DEFAULT_DEBOUNCE_SECS: u64 = 2;

/// Minimum time between update runs
const MIN_UPDATE_INTERVAL_SECS: u64 = 5;

/// Debounced watcher over the documents directory
pub struct Watcher<'a> {
    manager: &'a StoreManager,
    embedder: &'a Embedder,
    debounce_duration: Duration,
    min_update_interval: Duration,
}

impl<'a> Watcher<'a> {
    pub fn new(manager: &'a StoreManager, embedder: &'a Embedder) -> Self {
        Self {
            manager,
            embedder,
            debounce_duration: Duration::from_secs(DEFAULT_DEBOUNCE_SECS),
            min_update_interval: Duration::from_secs(MIN_UPDATE_INTERVAL_SECS),
        }
    }

    /// Overrides the debounce interval
    pub fn with_debounce(mut self, debounce_secs: u64) -> Self {
        self.debounce_duration = Duration::from_secs(debounce_secs);
        self.min_update_interval = Duration::from_secs(MIN_UPDATE_INTERVAL_SECS.max(debounce_secs));
        self
    }

    /// Runs an initial update, then updates again after each burst of
    /// document changes. Failed updates are reported and watching continues.
    pub fn watch(&self) -> Result<()> {
        self.run_update();

        let (tx, rx) = channel();
        let config = NotifyConfig::default().with_poll_interval(Duration::from_secs(2));
        let mut watcher = RecommendedWatcher::new(tx, config)?;
        watcher.watch(self.manager.docs_dir(), RecursiveMode::NonRecursive)?;

        println!(
            "{} Watching {} for new policy documents...",
            "👁".cyan(),
            self.manager.docs_dir().display()
        );
        println!(
            "  Debounce: {}s, Min interval: {}s",
            self.debounce_duration.as_secs(),
            self.min_update_interval.as_secs()
        );
        println!("Press Ctrl+C to stop\n");

        let mut pending_paths: HashSet<PathBuf> = HashSet::new();
        let mut last_event_time: Option<Instant> = None;
        let mut last_update_time: Option<Instant> = None;

        loop {
            let timeout = if pending_paths.is_empty() {
                Duration::from_secs(60)
            } else {
                self.debounce_duration
            };

            match rx.recv_timeout(timeout) {
                Ok(Ok(event)) => {
                    let relevant = relevant_paths(&event, self.manager.scanner());
                    if !relevant.is_empty() {
                        debug!("Document change: {:?}", relevant);
                        pending_paths.extend(relevant);
                        last_event_time = Some(Instant::now());
                    }
                }
                Ok(Err(e)) => {
                    warn!("Watch error: {}", e);
                    eprintln!("{} Watch error: {}", "✗".red(), e);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            if pending_paths.is_empty() {
                continue;
            }

            let settled = last_event_time
                .map(|t| t.elapsed() >= self.debounce_duration)
                .unwrap_or(false);
            let allowed = last_update_time
                .map(|t| t.elapsed() >= self.min_update_interval)
                .unwrap_or(true);

            if settled && allowed {
                println!(
                    "{} {} document(s) changed, updating index...",
                    "🔄".yellow(),
                    pending_paths.len()
                );
                // Cleared first so events during the update start a new burst
                pending_paths.clear();
                last_event_time = None;

                self.run_update();
                last_update_time = Some(Instant::now());
            }
        }

        Ok(())
    }

    fn run_update(&self) {
        let start = Instant::now();
        match self.manager.update(self.embedder) {
            Ok(outcome) => {
                for failure in &outcome.report.failures {
                    eprintln!(
                        "{} Skipped {}: {}",
                        "!".yellow(),
                        failure.path.display(),
                        failure.reason
                    );
                }
                if outcome.report.persisted {
                    println!(
                        "{} Added {} chunk(s) in {:.1}s ({} chunks total)",
                        "✓".green(),
                        outcome.report.chunks_added,
                        start.elapsed().as_secs_f64(),
                        outcome.state.chunk_count()
                    );
                }
            }
            Err(e) => {
                warn!("Update failed: {}", e);
                eprintln!("{} Update failed: {}", "✗".red(), e);
            }
        }
    }
}

/// Paths in `event` that are documents the scanner would pick up
fn relevant_paths(event: &Event, scanner: &DocumentScanner) -> Vec<PathBuf> {
    use notify::EventKind::*;
    if !matches!(event.kind, Create(_) | Modify(_)) {
        return Vec::new();
    }
    event
        .paths
        .iter()
        .filter(|path| scanner.matches(path))
        .cloned()
        .collect()
}
