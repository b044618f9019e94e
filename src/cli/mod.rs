//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "fusion-rank",
    version,
    author = "neur0map",
    about = "Hybrid lexical + dense retrieval with cross-encoder reranking",
    long_about = "fusion-rank scores a chunk corpus with a lexical engine and a dense vector index, \
                  fuses the normalized scores into a shortlist and reorders it with a cross-encoder."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/fusion-rank/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Search a corpus with hybrid retrieval and reranking
    Search {
        /// Search query text
        query: String,

        /// Corpus file (.jsonl records or one chunk per line)
        #[arg(long, value_name = "FILE")]
        corpus: PathBuf,

        /// Number of results to return
        #[arg(short, long)]
        k: Option<usize>,

        /// Sparse weight in fusion, between 0 and 1
        #[arg(short, long)]
        alpha: Option<f32>,

        /// Number of fused candidates passed to the reranker
        #[arg(long)]
        cutoff: Option<usize>,

        /// Profile to apply (e.g., "precise", "wide")
        #[arg(short, long)]
        profile: Option<String>,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show {
        /// Show only a specific section (e.g., "retrieval")
        #[arg(short, long)]
        section: Option<String>,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
