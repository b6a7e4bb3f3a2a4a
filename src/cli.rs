// SPDX-License-Identifier: MIT OR Apache-2.0

//! CLI argument parsing using clap

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

use policy_index::indexer::watch::DEFAULT_DEBOUNCE_SECS;
use policy_index::output::OutputFormat;

/// policy-index - Semantic index over insurance policy documents
///
/// Extracts policy PDFs page by page, splits them into overlapping clauses,
/// embeds them locally and answers nearest-clause queries.
#[derive(Parser, Debug)]
#[command(name = "policy-index")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Location overrides shared by every store command
#[derive(clap::Args, Debug, Clone, Default)]
pub struct StoreArgs {
    /// Documents directory (defaults to policy_documents)
    #[arg(short, long)]
    pub path: Option<PathBuf>,

    /// Store file (defaults to vector_store.pidx)
    #[arg(long)]
    pub store: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Index policy documents not yet in the store
    Update {
        #[command(flatten)]
        location: StoreArgs,
    },

    /// Find the clauses most relevant to a query
    #[command(alias = "s")]
    Search {
        /// Natural-language query
        query: String,

        /// Number of clauses to return
        #[arg(short = 'k', long = "top-k")]
        top_k: Option<usize>,

        /// Print the prompt-ready clause block instead of a ranked list
        #[arg(long)]
        context: bool,

        #[command(flatten)]
        location: StoreArgs,
    },

    /// Show what the store contains
    Status {
        #[command(flatten)]
        location: StoreArgs,
    },

    /// Watch the documents directory and update on changes
    Watch {
        /// Debounce interval in seconds
        #[arg(short, long, default_value_t = DEFAULT_DEBOUNCE_SECS)]
        debounce: u64,

        #[command(flatten)]
        location: StoreArgs,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}
