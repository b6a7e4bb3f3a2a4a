// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query module - clause retrieval

pub mod search;

pub use search::{format_context, search_relevant_clauses, search_with_distances, ClauseMatch};
