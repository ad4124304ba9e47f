//! Building and querying the index
//!
//! - **exclusion**: gitignore-style rules deciding which paths are left out
//! - **corpus_walker**: deterministic enumeration of the eligible files
//! - **ranker**: dot-product top-k ranking
//! - **index_builder**: walk, embed and persist in one pass
//! - **searcher**: embed a query and rank the stored files

pub mod corpus_walker;
pub mod exclusion;
pub mod index_builder;
pub mod ranker;
pub mod searcher;
