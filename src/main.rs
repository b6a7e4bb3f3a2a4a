// SPDX-License-Identifier: MIT OR Apache-2.0

//! policy-index - Semantic clause index for insurance policy documents
//!
//! Builds and queries the persisted vector store behind claim decisions.

mod cli;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Commands, StoreArgs};
use tracing_subscriber::EnvFilter;

use policy_index::config::Config;
use policy_index::embedding::Embedder;
use policy_index::indexer::{self, StoreManager, Watcher};
use policy_index::query;

fn load_config(location: StoreArgs) -> Config {
    Config::load()
        .with_documents_dir(location.path)
        .with_store_path(location.store)
}

fn main() -> Result<()> {
    // Initialize tracing with POLICY_INDEX_LOG env var
    // (e.g., POLICY_INDEX_LOG=debug policy-index update)
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_env("POLICY_INDEX_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let format = cli.format;

    match cli.command {
        Commands::Update { location } => {
            let config = load_config(location);
            let embedder = Embedder::from_config(config.embeddings());
            indexer::store::run(&config, &embedder, format)?;
        }
        Commands::Search {
            query,
            top_k,
            context,
            location,
        } => {
            let config = load_config(location);
            let embedder = Embedder::from_config(config.embeddings());
            query::search::run(&config, &embedder, &query, top_k, context, format)?;
        }
        Commands::Status { location } => {
            let config = load_config(location);
            indexer::store::status(&config, format)?;
        }
        Commands::Watch { debounce, location } => {
            let config = load_config(location);
            let embedder = Embedder::from_config(config.embeddings());
            let manager = StoreManager::from_config(&config)?;
            Watcher::new(&manager, &embedder)
                .with_debounce(debounce)
                .watch()?;
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "policy-index", &mut std::io::stdout());
        }
    }

    Ok(())
}
