//! fusion-rank - Hybrid retrieval and reranking core
//!
//! Scores a chunk corpus with a lexical engine and a dense vector index,
//! normalizes and fuses the two result sets into a shortlist, and reorders the
//! shortlist with a cross-encoder.

pub mod cli;
pub mod config;
pub mod corpus;
pub mod embedding;
pub mod error;
pub mod retrieval;

pub use error::{FusionRankError, Result};
