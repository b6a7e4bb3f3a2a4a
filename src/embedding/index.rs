// SPDX-License-Identifier: MIT OR Apache-2.0

//! Exact nearest-neighbour index over embedding vectors.
//!
//! Vectors are kept row-major in one contiguous buffer, in insertion order.
//! Row `i` always corresponds to chunk `i` of the store's chunk list, so the
//! index only ever grows by appending.

use crate::errors::{IndexError, Result};

/// Magic bytes at the start of a serialized index.
const INDEX_MAGIC: &[u8; 4] = b"FL2I";

/// Size of the serialized header: magic, dimension (u32), count (u64).
const INDEX_HEADER_LEN: usize = 4 + 4 + 8;

/// A single nearest-neighbour hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Row position in the index (and the parallel chunk list).
    pub position: usize,
    /// Euclidean distance to the query.
    pub distance: f32,
}

/// Brute-force L2 index.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatL2Index {
    dimension: usize,
    data: Vec<f32>,
}

impl FlatL2Index {
    /// Creates an empty index for vectors of `dimension` components.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            data: Vec::new(),
        }
    }

    /// Creates an index from a first batch, taking its dimension.
    pub fn from_vectors(vectors: &[Vec<f32>]) -> Result<Self> {
        let dimension = vectors.first().map(Vec::len).unwrap_or_default();
        let mut index = Self::new(dimension);
        index.add(vectors)?;
        Ok(index)
    }

    /// Vector dimension.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the stored vector at `position`.
    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        let start = position.checked_mul(self.dimension)?;
        self.data.get(start..start + self.dimension)
    }

    /// Appends vectors in order. The whole batch is rejected if any vector has
    /// the wrong dimension; an empty index with dimension 0 adopts the batch's.
    pub fn add(&mut self, vectors: &[Vec<f32>]) -> Result<()> {
        if vectors.is_empty() {
            return Ok(());
        }
        if self.dimension == 0 && self.data.is_empty() {
            self.dimension = vectors[0].len();
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: bad.len(),
            });
        }
        if self.dimension == 0 {
            return Err(IndexError::DimensionMismatch {
                expected: 1,
                actual: 0,
            });
        }

        self.data.reserve(vectors.len() * self.dimension);
        for vector in vectors {
            self.data.extend_from_slice(vector);
        }
        Ok(())
    }

    /// Returns up to `k` nearest rows by Euclidean distance, nearest first.
    ///
    /// Equal distances are ordered by position, so repeated queries against an
    /// unchanged index always return the same sequence.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }
        if query.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let mut scored: Vec<Neighbor> = self
            .data
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(position, row)| Neighbor {
                position,
                distance: squared_l2(query, row),
            })
            .collect();

        scored.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then(a.position.cmp(&b.position))
        });
        scored.truncate(k);

        for neighbor in scored.iter_mut() {
            neighbor.distance = neighbor.distance.sqrt();
        }
        Ok(scored)
    }

    /// Serializes the index to a self-describing little-endian blob.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(INDEX_HEADER_LEN + self.data.len() * 4);
        out.extend_from_slice(INDEX_MAGIC);
        out.extend_from_slice(&(self.dimension as u32).to_le_bytes());
        out.extend_from_slice(&(self.len() as u64).to_le_bytes());
        for value in &self.data {
            out.extend_from_slice(&value.to_le_bytes());
        }
        out
    }

    /// Reconstructs an index produced by [`FlatL2Index::to_bytes`].
    ///
    /// The error carries only the reason; callers attach the store path.
    pub fn from_bytes(bytes: &[u8]) -> std::result::Result<Self, String> {
        if bytes.len() < INDEX_HEADER_LEN {
            return Err(format!("index blob too short ({} bytes)", bytes.len()));
        }
        if &bytes[..4] != INDEX_MAGIC {
            return Err("index blob has wrong magic".to_string());
        }

        let dimension = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        let mut count_bytes = [0u8; 8];
        count_bytes.copy_from_slice(&bytes[8..16]);
        let count = u64::from_le_bytes(count_bytes) as usize;

        let body = &bytes[INDEX_HEADER_LEN..];
        let expected = count
            .checked_mul(dimension)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| "index header overflows".to_string())?;
        if body.len() != expected {
            return Err(format!(
                "index body is {} bytes, header promises {} vectors of dimension {}",
                body.len(),
                count,
                dimension
            ));
        }

        let data = body
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Ok(Self { dimension, data })
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}
