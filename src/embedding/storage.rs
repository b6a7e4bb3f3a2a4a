// SPDX-License-Identifier: MIT OR Apache-2.0

//! Single-file persistence for the vector store.
//!
//! The store bundles the serialized index, the parallel chunk list and the
//! processed-files record into one versioned container:
//!
//! ```text
//! magic "PIDX" | version u16 | flags u16 | dimension u32 | count u64
//! index_len u64 | index bytes
//! chunks_len u64 | chunks (JSON)
//! files_len u64 | processed files (JSON)
//! blake3 checksum of everything above (32 bytes)
//! ```
//!
//! Writes go to a temporary file in the same directory which then replaces
//! the store in one rename, so readers see either the old or the new bundle.

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::embedding::chunker::Chunk;
use crate::embedding::index::FlatL2Index;
use crate::errors::{IndexError, Result};

/// Magic bytes identifying a store file.
const STORE_MAGIC: &[u8; 4] = b"PIDX";

/// Current container format version.
pub const STORE_FORMAT_VERSION: u16 = 1;

const FLAG_HAS_INDEX: u16 = 0b1;
const HEADER_LEN: usize = 4 + 2 + 2 + 4 + 8;
const CHECKSUM_LEN: usize = 32;

/// Default store filename.
pub const DEFAULT_STORE_FILE: &str = "vector_store.pidx";

/// In-memory state of the knowledge base.
///
/// `index` row `i` corresponds to `chunks[i]`; both are only mutated together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreState {
    pub index: Option<FlatL2Index>,
    pub chunks: Vec<Chunk>,
    pub processed_files: Vec<String>,
}

impl StoreState {
    /// Number of indexed chunks.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Dimension of the index, if one exists.
    pub fn dimension(&self) -> Option<usize> {
        self.index.as_ref().map(FlatL2Index::dimension)
    }

    /// Whether a searchable index with at least one vector exists.
    pub fn has_index(&self) -> bool {
        self.index.as_ref().is_some_and(|index| !index.is_empty())
    }

    /// Whether `filename` has already been processed.
    pub fn is_processed(&self, filename: &str) -> bool {
        self.processed_files.iter().any(|f| f == filename)
    }

    /// Checks the positional correspondence and uniqueness invariants.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        let vectors = self.index.as_ref().map(FlatL2Index::len).unwrap_or(0);
        if vectors != self.chunks.len() {
            return Err(format!(
                "index holds {} vectors but chunk list has {} entries",
                vectors,
                self.chunks.len()
            ));
        }

        let mut seen = HashSet::with_capacity(self.processed_files.len());
        for file in &self.processed_files {
            if !seen.insert(file.as_str()) {
                return Err(format!("processed file listed twice: {}", file));
            }
        }
        Ok(())
    }
}

/// Reads and writes the store file.
#[derive(Debug, Clone)]
pub struct VectorStore {
    path: PathBuf,
}

impl VectorStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Returns the path to the store file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a store file is present.
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Reads the store. `Ok(None)` means no store has been written yet; a file
    /// that exists but cannot be decoded is an error, never an empty state.
    pub fn read(&self) -> Result<Option<StoreState>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(IndexError::StoreUnavailable {
                    path: self.path.clone(),
                    action: "reading",
                    source,
                })
            }
        };

        let state = decode(&bytes).map_err(|reason| IndexError::corrupt(&self.path, reason))?;
        debug!(
            "Loaded store {} ({} chunks, {} files)",
            self.path.display(),
            state.chunks.len(),
            state.processed_files.len()
        );
        Ok(Some(state))
    }

    /// Replaces the store with `state` as one complete file.
    ///
    /// A rewrite keeps the permissions of the file it replaces; a new store
    /// is created readable by its owner only.
    pub fn write(&self, state: &StoreState) -> Result<()> {
        state
            .check_invariants()
            .map_err(|reason| IndexError::corrupt(&self.path, reason))?;
        let bytes = encode(state).map_err(|reason| IndexError::corrupt(&self.path, reason))?;

        let unavailable = |source: std::io::Error| IndexError::StoreUnavailable {
            path: self.path.clone(),
            action: "writing",
            source,
        };

        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent).map_err(unavailable)?;

        let mut tmp = NamedTempFile::new_in(&parent).map_err(unavailable)?;
        tmp.write_all(&bytes).map_err(unavailable)?;
        if let Ok(existing) = std::fs::metadata(&self.path) {
            tmp.as_file()
                .set_permissions(existing.permissions())
                .map_err(unavailable)?;
        }
        tmp.as_file().sync_all().map_err(unavailable)?;
        tmp.persist(&self.path).map_err(|err| unavailable(err.error))?;

        debug!(
            "Wrote store {} ({} bytes, {} chunks)",
            self.path.display(),
            bytes.len(),
            state.chunks.len()
        );
        Ok(())
    }
}

fn encode(state: &StoreState) -> std::result::Result<Vec<u8>, String> {
    let index_bytes = state
        .index
        .as_ref()
        .map(FlatL2Index::to_bytes)
        .unwrap_or_default();
    let chunks_json = serde_json::to_vec(&state.chunks).map_err(|e| e.to_string())?;
    let files_json = serde_json::to_vec(&state.processed_files).map_err(|e| e.to_string())?;

    let flags = if state.index.is_some() { FLAG_HAS_INDEX } else { 0 };
    let dimension = state.dimension().unwrap_or(0) as u32;

    let mut out = Vec::with_capacity(
        HEADER_LEN + 24 + index_bytes.len() + chunks_json.len() + files_json.len() + CHECKSUM_LEN,
    );
    out.extend_from_slice(STORE_MAGIC);
    out.extend_from_slice(&STORE_FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&flags.to_le_bytes());
    out.extend_from_slice(&dimension.to_le_bytes());
    out.extend_from_slice(&(state.chunks.len() as u64).to_le_bytes());
    for section in [&index_bytes, &chunks_json, &files_json] {
        out.extend_from_slice(&(section.len() as u64).to_le_bytes());
        out.extend_from_slice(section);
    }

    let checksum = blake3::hash(&out);
    out.extend_from_slice(checksum.as_bytes());
    Ok(out)
}

fn decode(bytes: &[u8]) -> std::result::Result<StoreState, String> {
    if bytes.len() < HEADER_LEN + CHECKSUM_LEN {
        return Err(format!("file too short ({} bytes)", bytes.len()));
    }

    let (body, checksum) = bytes.split_at(bytes.len() - CHECKSUM_LEN);
    if blake3::hash(body).as_bytes() != checksum {
        return Err("checksum mismatch".to_string());
    }

    let mut reader = Reader { bytes: body, pos: 0 };
    if reader.take(4)? != STORE_MAGIC {
        return Err("not a vector store file".to_string());
    }
    let version = reader.u16()?;
    if version != STORE_FORMAT_VERSION {
        return Err(format!("unsupported format version {}", version));
    }
    let flags = reader.u16()?;
    let dimension = reader.u32()? as usize;
    let count = reader.u64()? as usize;

    let index_bytes = reader.section()?;
    let chunks_json = reader.section()?;
    let files_json = reader.section()?;
    if reader.pos != body.len() {
        return Err("trailing bytes after processed-files section".to_string());
    }

    let index = if flags & FLAG_HAS_INDEX != 0 {
        let index = FlatL2Index::from_bytes(index_bytes)?;
        if index.dimension() != dimension {
            return Err(format!(
                "header dimension {} disagrees with index dimension {}",
                dimension,
                index.dimension()
            ));
        }
        Some(index)
    } else {
        None
    };

    let chunks: Vec<Chunk> = serde_json::from_slice(chunks_json).map_err(|e| e.to_string())?;
    let processed_files: Vec<String> =
        serde_json::from_slice(files_json).map_err(|e| e.to_string())?;
    if chunks.len() != count {
        return Err(format!(
            "header promises {} chunks, found {}",
            count,
            chunks.len()
        ));
    }

    let state = StoreState {
        index,
        chunks,
        processed_files,
    };
    state.check_invariants()?;
    Ok(state)
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> std::result::Result<&'a [u8], String> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| format!("unexpected end of file at byte {}", self.pos))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u16(&mut self) -> std::result::Result<u16, String> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> std::result::Result<u32, String> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> std::result::Result<u64, String> {
        let b = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(u64::from_le_bytes(buf))
    }

    fn section(&mut self) -> std::result::Result<&'a [u8], String> {
        let len = usize::try_from(self.u64()?).map_err(|e| e.to_string())?;
        self.take(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::chunker::ChunkMetadata;
    use tempfile::tempdir;

    fn chunk(text: &str, source: &str, page: u32) -> Chunk {
        Chunk {
            text: text.to_string(),
            metadata: ChunkMetadata {
                source: source.to_string(),
                page,
            },
        }
    }

    fn sample_state() -> StoreState {
        StoreState {
            index: Some(
                FlatL2Index::from_vectors(&[vec![0.1, 0.2], vec![0.3, 0.4]]).unwrap(),
            ),
            chunks: vec![
                chunk("Waiting period: 24 months", "gold.pdf", 1),
                chunk("Knee surgery is covered", "gold.pdf", 2),
            ],
            processed_files: vec!["gold.pdf".to_string()],
        }
    }

    #[test]
    fn test_missing_store_reads_as_none() {
        let dir = tempdir().unwrap();
        let store = VectorStore::new(dir.path().join("store.pidx"));
        assert!(!store.exists());
        assert!(store.read().unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_rewrite_keeps_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let store = VectorStore::new(dir.path().join("store.pidx"));
        store.write(&sample_state()).unwrap();
        std::fs::set_permissions(store.path(), std::fs::Permissions::from_mode(0o644)).unwrap();

        store.write(&StoreState::default()).unwrap();
        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o644);
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempdir().unwrap();
        let store = VectorStore::new(dir.path().join("nested").join("store.pidx"));
        let state = sample_state();

        store.write(&state).unwrap();
        assert!(store.exists());
        assert_eq!(store.read().unwrap().unwrap(), state);
    }

    #[test]
    fn test_state_without_index_round_trips() {
        let dir = tempdir().unwrap();
        let store = VectorStore::new(dir.path().join("store.pidx"));
        let state = StoreState {
            index: None,
            chunks: Vec::new(),
            processed_files: vec!["scanned.pdf".to_string()],
        };

        store.write(&state).unwrap();
        assert_eq!(store.read().unwrap().unwrap(), state);
    }

    #[test]
    fn test_encoding_is_stable() {
        let state = sample_state();
        assert_eq!(encode(&state).unwrap(), encode(&state).unwrap());
    }

    #[test]
    fn test_corrupted_byte_is_detected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.pidx");
        let store = VectorStore::new(&path);
        store.write(&sample_state()).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();

        let err = store.read().unwrap_err();
        assert!(matches!(err, IndexError::StoreCorrupt { .. }));
    }

    #[test]
    fn test_truncated_file_is_corrupt_not_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.pidx");
        let store = VectorStore::new(&path);
        store.write(&sample_state()).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() / 3]).unwrap();

        assert!(matches!(
            store.read(),
            Err(IndexError::StoreCorrupt { .. })
        ));
    }

    #[test]
    fn test_mismatched_state_is_not_written() {
        let dir = tempdir().unwrap();
        let store = VectorStore::new(dir.path().join("store.pidx"));
        let mut state = sample_state();
        state.chunks.pop();

        assert!(store.write(&state).is_err());
        assert!(!store.exists());
    }

    #[test]
    fn test_duplicate_processed_files_violate_invariants() {
        let mut state = sample_state();
        state.processed_files.push("gold.pdf".to_string());
        assert!(state.check_invariants().is_err());
    }

    #[test]
    fn test_store_path_is_a_directory() {
        let dir = tempdir().unwrap();
        let store = VectorStore::new(dir.path());
        assert!(matches!(
            store.read(),
            Err(IndexError::StoreUnavailable { .. })
        ));
    }
}
