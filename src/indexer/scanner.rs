// SPDX-License-Identifier: MIT OR Apache-2.0

//! Document scanner for the watched policy directory.

use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::errors::{IndexError, Result};

/// Default document extensions.
pub const DEFAULT_EXTENSIONS: &[&str] = &["pdf"];

/// Lists document files directly inside a directory.
pub struct DocumentScanner {
    root: PathBuf,
    extensions: Vec<String>,
}

impl DocumentScanner {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        }
    }

    /// Restricts scanning to the given extensions (case-insensitive, no dot).
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extensions = extensions
            .into_iter()
            .map(|e| e.as_ref().trim_start_matches('.').to_lowercase())
            .collect();
        self
    }

    /// Whether `path` has one of the scanned extensions.
    pub fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| self.extensions.contains(&ext.to_lowercase()))
            .unwrap_or(false)
    }

    /// Returns matching files sorted by filename. Symlinks to files are
    /// included; subdirectories and hidden files are not scanned.
    pub fn list_files(&self) -> Result<Vec<PathBuf>> {
        if !self.root.is_dir() {
            return Err(IndexError::Io {
                path: self.root.clone(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "documents directory does not exist",
                ),
            });
        }

        let walker = WalkBuilder::new(&self.root)
            .standard_filters(false)
            .hidden(true)
            .max_depth(Some(1))
            .follow_links(true)
            .build();

        let mut files = Vec::new();
        for entry in walker {
            // A dangling link or unreadable entry skips that entry only.
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("Skipping entry in {}: {}", self.root.display(), err);
                    continue;
                }
            };
            if entry.depth() == 0 {
                continue;
            }
            if entry.path().is_file() && self.matches(entry.path()) {
                files.push(entry.into_path());
            }
        }

        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(files)
    }
}
