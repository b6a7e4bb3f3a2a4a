// SPDX-License-Identifier: MIT OR Apache-2.0

//! Semantic clause retrieval over the persisted index
//!
//! A query is embedded with the same embedder that built the index, matched
//! against it by L2 distance and mapped back to chunks by position.

use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use tracing::debug;

use crate::config::Config;
use crate::embedding::chunker::{Chunk, ChunkMetadata};
use crate::embedding::index::FlatL2Index;
use crate::embedding::provider::Embedder;
use crate::embedding::storage::VectorStore;
use crate::errors::{self, IndexError};
use crate::output::{
    colorize_distance, colorize_heading, colorize_page, colorize_source, use_colors,
    OutputFormat,
};

/// Separator between clauses in the prompt context block
pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// A retrieved chunk with its distance to the query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClauseMatch {
    pub text: String,
    pub metadata: ChunkMetadata,
    pub distance: f32,
}

impl ClauseMatch {
    pub fn into_chunk(self) -> Chunk {
        Chunk {
            text: self.text,
            metadata: self.metadata,
        }
    }
}

/// Returns up to `top_k` matches, nearest first. An absent or empty index
/// yields no matches without touching the embedder.
pub fn search_with_distances(
    query: &str,
    embedder: &Embedder,
    index: Option<&FlatL2Index>,
    chunks: &[Chunk],
    top_k: usize,
) -> errors::Result<Vec<ClauseMatch>> {
    let index = match index {
        Some(index) if !index.is_empty() => index,
        _ => return Ok(Vec::new()),
    };
    if top_k == 0 {
        return Ok(Vec::new());
    }

    let query_vector = embedder.encode_one(query)?;
    let neighbors = index.search(&query_vector, top_k)?;
    debug!("{} neighbour(s) for query {:?}", neighbors.len(), query);

    neighbors
        .into_iter()
        .map(|neighbor| {
            let chunk = chunks
                .get(neighbor.position)
                .ok_or(IndexError::MisalignedChunks {
                    position: neighbor.position,
                    chunks: chunks.len(),
                })?;
            Ok(ClauseMatch {
                text: chunk.text.clone(),
                metadata: chunk.metadata.clone(),
                distance: neighbor.distance,
            })
        })
        .collect()
}

/// Returns the `top_k` chunks most relevant to `query`, nearest first.
pub fn search_relevant_clauses(
    query: &str,
    embedder: &Embedder,
    index: Option<&FlatL2Index>,
    chunks: &[Chunk],
    top_k: usize,
) -> errors::Result<Vec<Chunk>> {
    Ok(search_with_distances(query, embedder, index, chunks, top_k)?
        .into_iter()
        .map(ClauseMatch::into_chunk)
        .collect())
}

/// Renders chunks as the prompt context block consumed by the decision layer.
pub fn format_context(chunks: &[Chunk]) -> String {
    chunks
        .iter()
        .map(|chunk| {
            format!(
                "Clause from {}, Page {}:\n{}",
                chunk.metadata.source, chunk.metadata.page, chunk.text
            )
        })
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

#[derive(Serialize)]
struct ContextOutput<'a> {
    query: &'a str,
    context: String,
}

/// Run the search command
pub fn run(
    config: &Config,
    embedder: &Embedder,
    query: &str,
    top_k: Option<usize>,
    context: bool,
    format: OutputFormat,
) -> Result<()> {
    let store = VectorStore::new(config.store().path());
    let state = store.read()?.unwrap_or_default();
    if !state.has_index() {
        eprintln!(
            "No index at {}; run `policy-index update` first.",
            store.path().display()
        );
    }

    let top_k = config.merge_top_k(top_k);
    let matches =
        search_with_distances(query, embedder, state.index.as_ref(), &state.chunks, top_k)
            .with_context(|| format!("search failed for query {:?}", query))?;

    if context {
        let chunks: Vec<Chunk> = matches.into_iter().map(ClauseMatch::into_chunk).collect();
        let block = format_context(&chunks);
        match format {
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&ContextOutput { query, context: block })?
                );
            }
            OutputFormat::Text => {
                if !block.is_empty() {
                    println!("{}", block);
                }
            }
        }
        return Ok(());
    }

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&matches)?);
        }
        OutputFormat::Text => {
            let use_color = use_colors();
            if matches.is_empty() {
                if use_color {
                    println!("{} No clauses found for: {}", "✗".red(), query.yellow());
                } else {
                    println!("No clauses found for: {}", query);
                }
                return Ok(());
            }

            println!(
                "\n{}\n",
                colorize_heading(
                    &format!("Found {} clause(s) for: {}", matches.len(), query),
                    use_color
                )
            );
            for (rank, m) in matches.iter().enumerate() {
                println!(
                    "{}. {} page {} (distance {})",
                    rank + 1,
                    colorize_source(&m.metadata.source, use_color),
                    colorize_page(m.metadata.page, use_color),
                    colorize_distance(m.distance, use_color)
                );
                for line in m.text.lines() {
                    println!("    {}", line);
                }
                println!();
            }
        }
    }

    Ok(())
}
