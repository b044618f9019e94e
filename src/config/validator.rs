use crate::config::{parse_duration, Config, SCHEMA_VERSION};
use crate::error::{FusionRankError, Result, ValidationError};

const LEXICAL_BACKENDS: [&str; 2] = ["bm25", "tantivy"];

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, collecting every violation
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);
        Self::validate_fusion(config, &mut errors);
        Self::validate_bm25(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_indexing(config, &mut errors);
        Self::validate_reranker(config, &mut errors);
        Self::validate_timeouts(config, &mut errors);
        Self::validate_profiles(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(FusionRankError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != SCHEMA_VERSION {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        Self::check_unit_interval("retrieval.alpha", config.retrieval.alpha, errors);

        if config.retrieval.k == 0 {
            errors.push(ValidationError::new(
                "retrieval.k",
                "k must be greater than 0",
            ));
        }

        if config.retrieval.reranker_cutoff == 0 {
            errors.push(ValidationError::new(
                "retrieval.reranker_cutoff",
                "Reranker cutoff must be greater than 0",
            ));
        }

        let backend = &config.retrieval.lexical_backend;
        if !LEXICAL_BACKENDS.contains(&backend.as_str()) {
            errors.push(ValidationError::new(
                "retrieval.lexical_backend",
                format!(
                    "Lexical backend must be one of {:?}, got '{}'",
                    LEXICAL_BACKENDS, backend
                ),
            ));
        }
    }

    fn validate_fusion(config: &Config, errors: &mut Vec<ValidationError>) {
        Self::check_unit_interval("fusion.degenerate_score", config.fusion.degenerate_score, errors);
    }

    fn validate_bm25(config: &Config, errors: &mut Vec<ValidationError>) {
        let bm25 = &config.bm25;
        if !bm25.k1.is_finite() || bm25.k1 < 0.0 {
            errors.push(ValidationError::new(
                "bm25.k1",
                format!("k1 must be non-negative, got {}", bm25.k1),
            ));
        }
        Self::check_unit_interval("bm25.b", bm25.b, errors);
        if !bm25.epsilon.is_finite() || bm25.epsilon < 0.0 {
            errors.push(ValidationError::new(
                "bm25.epsilon",
                format!("epsilon must be non-negative, got {}", bm25.epsilon),
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }

        if config.embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }
    }

    fn validate_indexing(config: &Config, errors: &mut Vec<ValidationError>) {
        let indexing = &config.indexing;
        let positive = [
            ("indexing.vector_dim", indexing.vector_dim),
            ("indexing.hnsw_ef_construction", indexing.hnsw_ef_construction),
            ("indexing.hnsw_m", indexing.hnsw_m),
            ("indexing.hnsw_ef_search", indexing.hnsw_ef_search),
        ];
        for (path, value) in positive {
            if value == 0 {
                errors.push(ValidationError::new(path, "Value must be greater than 0"));
            }
        }

        if indexing.data_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "indexing.data_dir",
                "Data directory cannot be empty",
            ));
        }
    }

    fn validate_reranker(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.reranker.model.is_empty() {
            errors.push(ValidationError::new(
                "reranker.model",
                "Model name cannot be empty",
            ));
        }

        if config.reranker.batch_size == 0 {
            errors.push(ValidationError::new(
                "reranker.batch_size",
                "Batch size must be greater than 0",
            ));
        }

        if config.reranker.max_input_tokens == 0 {
            errors.push(ValidationError::new(
                "reranker.max_input_tokens",
                "Max input tokens must be greater than 0",
            ));
        }
    }

    fn validate_timeouts(config: &Config, errors: &mut Vec<ValidationError>) {
        let timeouts = [
            ("timeouts.sparse", &config.timeouts.sparse),
            ("timeouts.dense", &config.timeouts.dense),
            ("timeouts.rerank", &config.timeouts.rerank),
        ];
        for (path, value) in timeouts {
            if parse_duration(value).is_none() {
                errors.push(ValidationError::new(
                    path,
                    format!("Invalid duration format: {}", value),
                ));
            }
        }
    }

    fn validate_profiles(config: &Config, errors: &mut Vec<ValidationError>) {
        for (name, overrides) in &config.profiles {
            if let Some(alpha) = overrides.alpha {
                Self::check_unit_interval(&format!("profiles.{}.alpha", name), alpha, errors);
            }
            if overrides.k == Some(0) {
                errors.push(ValidationError::new(
                    format!("profiles.{}.k", name),
                    "k must be greater than 0",
                ));
            }
            if overrides.reranker_cutoff == Some(0) {
                errors.push(ValidationError::new(
                    format!("profiles.{}.reranker_cutoff", name),
                    "Reranker cutoff must be greater than 0",
                ));
            }
        }
    }

    fn check_unit_interval(path: &str, value: f32, errors: &mut Vec<ValidationError>) {
        if !(0.0..=1.0).contains(&value) {
            errors.push(ValidationError::new(
                path,
                format!("Value must be between 0.0 and 1.0, got {}", value),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProfileOverrides;

    fn violations(config: &Config) -> Vec<String> {
        match ConfigValidator::validate(config) {
            Ok(()) => Vec::new(),
            Err(FusionRankError::ConfigValidation { errors }) => {
                errors.into_iter().map(|e| e.path).collect()
            }
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    #[test]
    fn test_valid_config() {
        let config = Config::default();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_alpha_out_of_range() {
        let mut config = Config::default();
        config.retrieval.alpha = 1.2;
        assert_eq!(violations(&config), vec!["retrieval.alpha"]);

        config.retrieval.alpha = f32::NAN;
        assert_eq!(violations(&config), vec!["retrieval.alpha"]);
    }

    #[test]
    fn test_collects_all_violations() {
        let mut config = Config::default();
        config.retrieval.k = 0;
        config.retrieval.lexical_backend = "elastic".to_string();
        config.reranker.batch_size = 0;
        config.timeouts.dense = "soon".to_string();

        let paths = violations(&config);
        assert_eq!(paths.len(), 4);
        assert!(paths.contains(&"retrieval.lexical_backend".to_string()));
        assert!(paths.contains(&"timeouts.dense".to_string()));
    }

    #[test]
    fn test_invalid_profile() {
        let mut config = Config::default();
        config.profiles.insert(
            "bad".to_string(),
            ProfileOverrides {
                alpha: Some(-0.1),
                reranker_cutoff: Some(0),
                k: None,
            },
        );
        assert_eq!(violations(&config).len(), 2);
    }
}
