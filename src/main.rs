use anyhow::Context;
use fusion_rank::cli::{Cli, Commands, ConfigAction};
use fusion_rank::config::Config;
use fusion_rank::corpus::ChunkStore;
use fusion_rank::embedding::{FastEmbedProvider, IndexBuilder};
use fusion_rank::error::{FusionRankError, Result};
use fusion_rank::retrieval::{
    FastEmbedCrossEncoder, HybridSearcher, RerankedResult, SearchBackends, SearchQuery,
    SearchSettings,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    init_logging(cli.verbose);

    match cli.command {
        Commands::Search {
            query,
            corpus,
            k,
            alpha,
            cutoff,
            profile,
            json,
        } => {
            let config = load_config(cli.config, profile)?;
            let mut search = SearchQuery::new(query);
            search.k = k;
            search.alpha = alpha;
            search.reranker_cutoff = cutoff;
            cmd_search(&config, &corpus, &search, json)?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_level = if verbose {
        "fusion_rank=debug"
    } else {
        "fusion_rank=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn cmd_search(config: &Config, corpus: &Path, query: &SearchQuery, json: bool) -> Result<()> {
    let store = Arc::new(ChunkStore::load(corpus)?);

    let mut config = config.clone();
    config.indexing.data_dir = expand_path(&config.indexing.data_dir)?;

    let embedder = Arc::new(FastEmbedProvider::new(&config.embedding.model)?);
    let builder = IndexBuilder::new(embedder.clone(), config.embedding.batch_size);
    let (vector_index, _report) = builder
        .build_vector_index(&store, &config.indexing)
        .with_context(|| {
            format!(
                "Failed to build dense index for {} with {}",
                corpus.display(),
                config.embedding.model
            )
        })?;
    let lexical = IndexBuilder::build_lexical(&store, &config)?;
    let cross_encoder = Arc::new(FastEmbedCrossEncoder::new(
        &config.reranker.model,
        config.reranker.max_input_tokens,
        config.reranker.batch_size,
    )?);

    let backends = SearchBackends {
        store,
        lexical,
        dense: Arc::new(vector_index),
        embedder,
        cross_encoder,
    };
    let searcher = HybridSearcher::new(backends, SearchSettings::from_config(&config)?)?;

    let rt = tokio::runtime::Runtime::new().map_err(|e| FusionRankError::Io {
        source: e,
        context: "Failed to create tokio runtime".to_string(),
    })?;
    let results = rt.block_on(searcher.search(query))?;

    if json {
        let out = serde_json::to_string_pretty(&results).map_err(|e| FusionRankError::Json {
            source: e,
            context: "Failed to serialize results".to_string(),
        })?;
        println!("{}", out);
    } else {
        print_results(&query.text, &results);
    }

    Ok(())
}

fn print_results(query: &str, results: &[RerankedResult]) {
    if results.is_empty() {
        println!("No results for \"{}\"", query);
        return;
    }

    println!("Results for \"{}\":", query);
    for (rank, result) in results.iter().enumerate() {
        println!(
            "\n{}. [{}] score {:.4} (fusion {:.4})",
            rank + 1,
            result.external_id,
            result.score,
            result.fusion_score
        );
        println!("   {}", preview(&result.text, 200));
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", &flat[..end]),
        None => flat,
    }
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show { section } => {
            let config = load_config(config_path, None)?;
            let value = serde_json::to_value(&config).map_err(|e| FusionRankError::Json {
                source: e,
                context: "Failed to serialize config".to_string(),
            })?;

            let value = match section {
                Some(section) => value.get(&section).cloned().ok_or_else(|| {
                    FusionRankError::Config(format!("Unknown config section: {}", section))
                })?,
                None => value,
            };

            let json = serde_json::to_string_pretty(&value).map_err(|e| FusionRankError::Json {
                source: e,
                context: "Failed to serialize config".to_string(),
            })?;
            println!("{}", json);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
            println!("  Profiles: {}", config.profiles.len());
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            Config::default().save(&path)?;
            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>, profile: Option<String>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'fusion-rank config init' to create one."
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        if let Some(profile) = profile {
            config.apply_profile(&profile)?;
        }
        fusion_rank::config::ConfigValidator::validate(&config)?;
        return Ok(config);
    }

    match profile {
        Some(profile) => Config::load_with_profile(&path, &profile),
        None => Config::load(&path),
    }
}

fn expand_path(path: &Path) -> Result<PathBuf> {
    let path_str = path
        .to_str()
        .ok_or_else(|| FusionRankError::Config("Invalid path encoding".to_string()))?;

    if let Some(stripped) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir().ok_or_else(|| {
            FusionRankError::Config("Cannot determine home directory".to_string())
        })?;
        Ok(home.join(stripped))
    } else {
        Ok(path.to_path_buf())
    }
}
