use crate::config::Config;
use crate::error::{LecternError, Result, ValidationError};

/// Tolerance for the fusion weight sum
pub const WEIGHT_SUM_TOLERANCE: f32 = 1e-4;

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_indexing(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);
        Self::validate_scoring(config, &mut errors);
        Self::validate_context(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(LecternError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != "1.0.0" {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
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
        if config.indexing.vector_dim == 0 {
            errors.push(ValidationError::new(
                "indexing.vector_dim",
                "Vector dimension must be greater than 0",
            ));
        }

        if config.indexing.hnsw_ef_construction == 0 {
            errors.push(ValidationError::new(
                "indexing.hnsw_ef_construction",
                "HNSW ef_construction must be greater than 0",
            ));
        }

        if config.indexing.hnsw_m == 0 {
            errors.push(ValidationError::new(
                "indexing.hnsw_m",
                "HNSW M must be greater than 0",
            ));
        }

        if config.indexing.hnsw_ef_search == 0 {
            errors.push(ValidationError::new(
                "indexing.hnsw_ef_search",
                "HNSW ef_search must be greater than 0",
            ));
        }

        if let Some(dimension) = crate::embedding::model_dimension(&config.embedding.model) {
            if dimension != config.indexing.vector_dim {
                errors.push(ValidationError::new(
                    "indexing.vector_dim",
                    format!(
                        "Model {} produces {}-dimensional vectors, index expects {}",
                        config.embedding.model, dimension, config.indexing.vector_dim
                    ),
                ));
            }
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        let retrieval = &config.retrieval;

        if retrieval.default_top_k == 0 {
            errors.push(ValidationError::new(
                "retrieval.default_top_k",
                "Default top_k must be greater than 0",
            ));
        }

        if retrieval.max_query_length == 0 {
            errors.push(ValidationError::new(
                "retrieval.max_query_length",
                "Maximum query length must be greater than 0",
            ));
        }

        if retrieval.candidate_multiplier == 0 {
            errors.push(ValidationError::new(
                "retrieval.candidate_multiplier",
                "Candidate multiplier must be greater than 0",
            ));
        }

        if !(retrieval.rrf_k.is_finite() && retrieval.rrf_k > 0.0) {
            errors.push(ValidationError::new(
                "retrieval.rrf_k",
                format!("RRF k must be positive, got {}", retrieval.rrf_k),
            ));
        }

        if let Err(reason) = check_weights(retrieval.semantic_weight, retrieval.lexical_weight) {
            errors.push(ValidationError::new("retrieval.semantic_weight", reason));
        }

        if retrieval.oracle_timeout_ms == 0 {
            errors.push(ValidationError::new(
                "retrieval.oracle_timeout_ms",
                "Oracle timeout must be greater than 0",
            ));
        }
    }

    fn validate_scoring(config: &Config, errors: &mut Vec<ValidationError>) {
        let scoring = &config.scoring;
        let boosts = [
            ("scoring.exact_match_boost", scoring.exact_match_boost),
            ("scoring.section_match_boost", scoring.section_match_boost),
            ("scoring.ideal_length_boost", scoring.ideal_length_boost),
            ("scoring.section_present_boost", scoring.section_present_boost),
            ("scoring.recency_boost", scoring.recency_boost),
        ];

        for (path, boost) in boosts {
            if !(0.0..=1.0).contains(&boost) {
                errors.push(ValidationError::new(
                    path,
                    format!("Boost must be between 0.0 and 1.0, got {}", boost),
                ));
            }
        }

        if scoring.ideal_length_min > scoring.ideal_length_max {
            errors.push(ValidationError::new(
                "scoring.ideal_length_min",
                format!(
                    "Ideal length range is empty: {} > {}",
                    scoring.ideal_length_min, scoring.ideal_length_max
                ),
            ));
        }

        if scoring.recency_window_days < 0 {
            errors.push(ValidationError::new(
                "scoring.recency_window_days",
                "Recency window cannot be negative",
            ));
        }
    }

    fn validate_context(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.context.chars_per_token == 0 {
            errors.push(ValidationError::new(
                "context.chars_per_token",
                "Characters per token must be greater than 0",
            ));
        }
    }
}

/// Check a pair of fusion weights: each in [0, 1], finite, summing to 1.0
pub fn check_weights(semantic: f32, lexical: f32) -> std::result::Result<(), String> {
    if !semantic.is_finite() || !lexical.is_finite() {
        return Err("Fusion weights must be finite".to_string());
    }
    if semantic < 0.0 || lexical < 0.0 {
        return Err(format!(
            "Fusion weights cannot be negative (semantic={}, lexical={})",
            semantic, lexical
        ));
    }
    let sum = semantic + lexical;
    if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
        return Err(format!(
            "Fusion weights must sum to 1.0, got {} + {} = {}",
            semantic, lexical, sum
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config() {
        let config = Config::default();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let mut config = Config::default();
        config.retrieval.semantic_weight = 0.3;
        config.retrieval.lexical_weight = 0.8;
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = Config::default();
        config.embedding.batch_size = 0;
        config.scoring.exact_match_boost = 1.5;
        config.context.chars_per_token = 0;

        match ConfigValidator::validate(&config) {
            Err(LecternError::ConfigValidation { errors }) => assert_eq!(errors.len(), 3),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_ideal_length_range() {
        let mut config = Config::default();
        config.scoring.ideal_length_min = 500;
        config.scoring.ideal_length_max = 100;
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_model_dimension_must_match_index() {
        let mut config = Config::default();
        config.embedding.model = "bge-base-en-v1.5".to_string();
        assert!(ConfigValidator::validate(&config).is_err());

        config.indexing.vector_dim = 768;
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_check_weights() {
        assert!(check_weights(0.5, 0.5).is_ok());
        assert!(check_weights(1.0, 0.0).is_ok());
        assert!(check_weights(0.7, 0.3).is_ok());
        assert!(check_weights(0.3, 0.8).is_err());
        assert!(check_weights(-0.5, 1.5).is_err());
        assert!(check_weights(f32::NAN, 0.5).is_err());
    }
}
